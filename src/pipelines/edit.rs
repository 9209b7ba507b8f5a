//! The edit pass: read header, apply header edits, rebuild the
//! resource section if requested, flush the header, close.
//!
//! The pass operates on a file the caller has already copied to its
//! output path, so a failure simply aborts; there is no partial-commit
//! handling. A pass with no requested mutations validates the header
//! and leaves the file byte-identical.

use std::path::Path;

use log::{debug, info};

use crate::domain::pe::{ExeHeader, Subsystem, DIR_RESOURCE};
use crate::domain::rsrc;
use crate::infra::device::{FileDevice, ReadAt, WriteAt};
use crate::infra::error::{EditError, EditResult};
use crate::services::icon::IconImporter;
use crate::services::section_writer::ResourceSectionWriter;
use crate::services::version_editor::{apply_version_edits, VersionEdits};

/// Requested icon mutation.
#[derive(Debug, Clone)]
pub enum IconAction {
    /// Replace all icons with the images from this `.ico` file.
    Replace(std::path::PathBuf),
    /// Remove all icon resources.
    Remove,
}

/// Everything one edit pass may change.
#[derive(Debug, Default, Clone)]
pub struct EditOptions {
    pub subsystem: Option<Subsystem>,
    pub icon: Option<IconAction>,
    pub version: VersionEdits,
}

impl EditOptions {
    fn wants_resource_edit(&self) -> bool {
        self.icon.is_some() || !self.version.is_empty()
    }

    fn is_noop(&self) -> bool {
        self.subsystem.is_none() && !self.wants_resource_edit()
    }
}

/// Copy `input` to `output` and run the edit pass on the copy.
///
/// The device is closed on every exit path; on failure the output file
/// is left behind for the caller to discard.
pub fn edit_exe_file(input: &Path, output: &Path, options: &EditOptions) -> EditResult<()> {
    std::fs::copy(input, output).map_err(|e| {
        EditError::Io(format!(
            "failed to copy {} to {}: {e}",
            input.display(),
            output.display()
        ))
    })?;

    let mut device = FileDevice::open_rw(output)?;
    let result = run_edit(&mut device, options);
    let closed = device.close();
    result.and(closed)
}

/// Run one edit pass against an already-open device.
pub fn run_edit<D: ReadAt + WriteAt>(device: &mut D, options: &EditOptions) -> EditResult<()> {
    let mut header = ExeHeader::read(device)?;
    debug!("parsed header:\n{}", header.summary());

    if options.is_noop() {
        info!("no mutations requested, leaving the file untouched");
        return Ok(());
    }

    if let Some(subsystem) = options.subsystem {
        debug!("setting subsystem to {subsystem:?}");
        header.set_subsystem(subsystem);
    }

    if options.wants_resource_edit() {
        let directory = header.resolve_rva(DIR_RESOURCE)?.ok_or_else(|| {
            EditError::Unsupported(
                "executable has no resource section; creating one is not supported".to_string(),
            )
        })?;
        let raw = device.read_at(
            u64::from(directory.file.start),
            directory.file.size as usize,
        )?;
        let mut table = rsrc::parse(&raw, directory.virt.start)?;
        debug!("parsed resource tree with {} leaves", table.leaf_count());

        match &options.icon {
            Some(IconAction::Remove) => IconImporter::remove(&mut table),
            Some(IconAction::Replace(path)) => IconImporter::replace(path, &mut table)?,
            None => {}
        }
        apply_version_edits(&mut table, &options.version)?;

        ResourceSectionWriter::write(&mut header, &directory, &table, device)?;
    }

    header.zero_checksum();
    header.write_back(device)?;
    Ok(())
}
