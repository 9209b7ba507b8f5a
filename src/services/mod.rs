//! Service layer: the operations the edit pipeline composes.

pub mod icon;
pub mod section_writer;
pub mod version_editor;
