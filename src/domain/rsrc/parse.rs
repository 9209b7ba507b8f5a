//! Recursive-descent parser for the on-disk resource directory.

use indexmap::IndexMap;
use log::warn;

use crate::domain::bytes::{get_u16, get_u32};
use crate::domain::rsrc::{NameNode, ResData, ResId, ResTable, ResTableHeader, TypeNode};
use crate::infra::error::{EditError, EditResult};

const SUBDIR_FLAG: u32 = 0x8000_0000;

/// Parse a resource section into a [`ResTable`].
///
/// `virtual_base` is the RVA at which the section is mapped; leaf
/// payload offsets are recovered by subtracting it from each data
/// entry's RVA.
pub fn parse(section: &[u8], virtual_base: u32) -> EditResult<ResTable> {
    let (header, entries) = parse_directory(section, 0)?;
    let mut types = IndexMap::new();
    for (key, pointer) in entries {
        let offset = subdirectory_offset(&key, pointer, "type")?;
        types.insert(key, parse_type(section, virtual_base, offset)?);
    }
    Ok(ResTable {
        header: Some(header),
        types,
    })
}

fn parse_type(section: &[u8], virtual_base: u32, offset: u32) -> EditResult<TypeNode> {
    let (header, entries) = parse_directory(section, offset)?;
    let mut names = IndexMap::new();
    for (key, pointer) in entries {
        let offset = subdirectory_offset(&key, pointer, "name")?;
        names.insert(key, parse_name(section, virtual_base, offset)?);
    }
    Ok(TypeNode {
        header: Some(header),
        names,
    })
}

fn parse_name(section: &[u8], virtual_base: u32, offset: u32) -> EditResult<NameNode> {
    let (header, entries) = parse_directory(section, offset)?;
    let mut langs = IndexMap::new();
    for (key, pointer) in entries {
        if pointer & SUBDIR_FLAG != 0 {
            return Err(EditError::InvalidFormat(format!(
                "language entry {key} points at a subdirectory instead of a data entry"
            )));
        }
        langs.insert(key, parse_data_entry(section, virtual_base, pointer)?);
    }
    Ok(NameNode {
        header: Some(header),
        langs,
    })
}

fn subdirectory_offset(key: &ResId, pointer: u32, level: &str) -> EditResult<u32> {
    if pointer & SUBDIR_FLAG == 0 {
        return Err(EditError::InvalidFormat(format!(
            "{level} entry {key} points at a data entry instead of a subdirectory"
        )));
    }
    Ok(pointer & !SUBDIR_FLAG)
}

/// Read one 16-byte directory header and its 8-byte entries, returning
/// each entry's key and raw pointer field.
fn parse_directory(section: &[u8], offset: u32) -> EditResult<(ResTableHeader, Vec<(ResId, u32)>)> {
    let offset = offset as usize;
    let header = ResTableHeader {
        characteristics: get_u32(section, offset)?,
        timestamp: get_u32(section, offset + 4)?,
        major_version: get_u16(section, offset + 8)?,
        minor_version: get_u16(section, offset + 10)?,
    };
    let name_count = get_u16(section, offset + 12)? as usize;
    let id_count = get_u16(section, offset + 14)? as usize;

    let mut entries = Vec::with_capacity(name_count + id_count);
    let mut entry_offset = offset + 16;
    for _ in 0..name_count + id_count {
        let id_field = get_u32(section, entry_offset)?;
        let pointer = get_u32(section, entry_offset + 4)?;
        entries.push((parse_key(section, id_field)?, pointer));
        entry_offset += 8;
    }
    Ok((header, entries))
}

fn parse_key(section: &[u8], id_field: u32) -> EditResult<ResId> {
    if id_field & SUBDIR_FLAG != 0 {
        let offset = (id_field & !SUBDIR_FLAG) as usize;
        let length = get_u16(section, offset)? as usize;
        let mut units = Vec::with_capacity(length);
        for i in 0..length {
            units.push(get_u16(section, offset + 2 + i * 2)?);
        }
        let name = String::from_utf16(&units).map_err(|_| {
            EditError::InvalidFormat(format!(
                "resource name at offset {offset:#x} is not valid UTF-16"
            ))
        })?;
        Ok(ResId::Name(name))
    } else {
        let id = u16::try_from(id_field).map_err(|_| {
            EditError::InvalidFormat(format!("resource id {id_field:#x} exceeds 16 bits"))
        })?;
        Ok(ResId::Id(id))
    }
}

fn parse_data_entry(section: &[u8], virtual_base: u32, offset: u32) -> EditResult<ResData> {
    let offset = offset as usize;
    let data_rva = get_u32(section, offset)?;
    let size = get_u32(section, offset + 4)?;
    let codepage = get_u32(section, offset + 8)?;
    let reserved = get_u32(section, offset + 12)?;
    if reserved != 0 {
        warn!("resource data entry at {offset:#x} has nonzero reserved word {reserved:#x}");
    }

    let start = data_rva.checked_sub(virtual_base).ok_or_else(|| {
        EditError::InvalidFormat(format!(
            "resource data RVA {data_rva:#x} lies before the section base {virtual_base:#x}"
        ))
    })? as usize;
    let end = start.checked_add(size as usize).filter(|&end| end <= section.len());
    let Some(end) = end else {
        return Err(EditError::InvalidFormat(format!(
            "resource data at {start:#x}+{size:#x} exceeds the section"
        )));
    };

    Ok(ResData {
        data: section[start..end].to_vec(),
        codepage,
        reserved,
    })
}
