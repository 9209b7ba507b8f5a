//! rsrcedit library
//!
//! A portable editor for Windows PE/PE32+ executables: rewrites the
//! embedded resource section (icons, version information) and selected
//! header fields (subsystem, checksum) without requiring Windows or
//! the native `rcedit` tool.
//!
//! The editing session reads the 4 KiB header prefix, resolves the
//! resource directory, parses the section into a [`ResTable`], applies
//! the requested mutations, serializes the tree back with its RVA
//! pointers rebased, and flushes the mutated header.

pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

pub use domain::pe::{ExeHeader, ResolvedDirectory, SectionHeader, Subsystem, DIR_RESOURCE};
pub use domain::range::{align_up, FileRange, Range, RvaRange};
pub use domain::rsrc::{ResData, ResId, ResTable, RT_GROUP_ICON, RT_ICON, RT_VERSION};
pub use domain::version::{
    format_version_info, parse_version_info, VersionBlock, VersionQuad, VersionValue,
};
pub use infra::device::{FileDevice, MemDevice, ReadAt, WriteAt};
pub use infra::error::{EditError, EditResult};
pub use pipelines::edit::{edit_exe_file, run_edit, EditOptions, IconAction};
pub use services::icon::IconImporter;
pub use services::version_editor::VersionEdits;
