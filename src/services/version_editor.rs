//! Version resource editing service.
//!
//! Applies the user-requested version mutations to a resource table:
//! parses the existing `RT_VERSION` payload (or synthesizes the
//! default tree when absent), updates the fixed version quads and the
//! string table, and writes the re-serialized block back under the
//! resource's existing name and language.

use indexmap::IndexMap;
use log::debug;

use crate::domain::rsrc::{ResId, ResTable, RT_VERSION};
use crate::domain::version::{
    default_version_info, format_version_info, parse_version_info, VersionQuad,
};
use crate::infra::error::EditResult;

/// Language used when a version resource is created from scratch.
const VERSION_LANGUAGE: u16 = 0x0409;

/// The set of version mutations requested for one edit pass.
#[derive(Debug, Default, Clone)]
pub struct VersionEdits {
    pub file_version: Option<VersionQuad>,
    pub product_version: Option<VersionQuad>,
    /// Ordered string edits: `Some` upserts, `None` deletes.
    pub strings: IndexMap<String, Option<String>>,
}

impl VersionEdits {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_version.is_none() && self.product_version.is_none() && self.strings.is_empty()
    }
}

/// Apply `edits` to the table's version resource.
pub fn apply_version_edits(table: &mut ResTable, edits: &VersionEdits) -> EditResult<()> {
    if edits.is_empty() {
        return Ok(());
    }

    let version_type: ResId = RT_VERSION.into();
    let (mut root, name, lang) = match table.find(&version_type, None) {
        Some((ty, name, lang)) => {
            let data = table
                .get(&ty, Some(&name), Some(&lang))
                .expect("find returned an existing leaf");
            (parse_version_info(&data.data)?, name, lang)
        }
        None => {
            debug!("no version resource present, synthesizing the default tree");
            (
                default_version_info(),
                ResId::Id(1),
                ResId::Id(VERSION_LANGUAGE),
            )
        }
    };

    if let Some(quad) = edits.file_version {
        root.set_file_version(quad);
    }
    if let Some(quad) = edits.product_version {
        root.set_product_version(quad);
    }
    for (key, value) in &edits.strings {
        match value {
            Some(value) => root.set_string(key, value),
            None => root.delete_string(key),
        }
    }

    let bytes = format_version_info(&root)?;
    table.set(version_type, name, lang, bytes);
    Ok(())
}
