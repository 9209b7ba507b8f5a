//! Icon import service.
//!
//! Converts a Windows `.ico` file into the pair of resource types the
//! loader expects: one `RT_GROUP_ICON` directory payload plus one
//! `RT_ICON` entry per image. On disk an `.ico` starts with a 6-byte
//! ICONDIR header followed by 16-byte ICONDIRENTRY records; inside the
//! resource section the group uses 14-byte entries whose last field is
//! the id of the `RT_ICON` resource holding the image bytes.

use std::path::Path;

use log::debug;

use crate::domain::bytes::{get_u16, get_u32};
use crate::domain::rsrc::{ResId, ResTable, RT_GROUP_ICON, RT_ICON};
use crate::infra::device::{FileDevice, ReadAt};
use crate::infra::error::{EditError, EditResult};

/// All icon resources are written under US-English.
pub const ICON_LANGUAGE: u16 = 0x0409;

const ICONDIR_LEN: usize = 6;
const ICONDIRENTRY_LEN: usize = 16;
const GRPICONDIRENTRY_LEN: usize = 14;

pub struct IconImporter;

impl IconImporter {
    /// Import every image of the `.ico` file at `path` into `table`.
    pub fn import(path: &Path, table: &mut ResTable) -> EditResult<()> {
        let mut device = FileDevice::open(path)?;
        let result = Self::import_from(&mut device, table);
        device.close()?;
        result
    }

    fn import_from(device: &mut impl ReadAt, table: &mut ResTable) -> EditResult<()> {
        let header = device.read_at(0, ICONDIR_LEN)?;
        let count = get_u16(&header, 4)? as usize;
        if count == 0 {
            return Err(EditError::InvalidFormat(
                "icon file contains no images".to_string(),
            ));
        }
        debug!("importing {count} icon images");

        let mut group = Vec::with_capacity(ICONDIR_LEN + GRPICONDIRENTRY_LEN * count);
        group.extend_from_slice(&header);

        for index in 0..count {
            let entry_pos = (ICONDIR_LEN + ICONDIRENTRY_LEN * index) as u64;
            let entry = device.read_at(entry_pos, ICONDIRENTRY_LEN)?;
            let bytes_in_res = get_u32(&entry, 8)?;
            let image_offset = get_u32(&entry, 12)?;

            let id = table.next_id(&RT_ICON.into());
            // GRPICONDIRENTRY: the first 12 ICONDIRENTRY bytes, then the
            // resource id instead of the file offset
            group.extend_from_slice(&entry[..12]);
            group.extend_from_slice(&id.to_le_bytes());

            let image = device.read_at(u64::from(image_offset), bytes_in_res as usize)?;
            table.set(
                RT_ICON.into(),
                ResId::Id(id),
                ResId::Id(ICON_LANGUAGE),
                image,
            );
        }

        let group_id = table.next_id(&RT_GROUP_ICON.into());
        table.set(
            RT_GROUP_ICON.into(),
            ResId::Id(group_id),
            ResId::Id(ICON_LANGUAGE),
            group,
        );
        Ok(())
    }

    /// Remove every icon resource from the table.
    pub fn remove(table: &mut ResTable) {
        table.delete_type(&RT_ICON.into());
        table.delete_type(&RT_GROUP_ICON.into());
    }

    /// Replace the executable's icons with the images from `path`:
    /// existing icon types are dropped first so exactly one group
    /// remains.
    pub fn replace(path: &Path, table: &mut ResTable) -> EditResult<()> {
        Self::remove(table);
        Self::import(path, table)
    }
}
