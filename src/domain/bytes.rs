//! Bounds-checked little-endian field access used by all the binary
//! codecs.

use crate::infra::error::{EditError, EditResult};

pub(crate) fn get_u16(buf: &[u8], offset: usize) -> EditResult<u16> {
    let end = offset.checked_add(2).filter(|&end| end <= buf.len());
    match end {
        Some(_) => Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]])),
        None => Err(truncated(offset, 2, buf.len())),
    }
}

pub(crate) fn get_u32(buf: &[u8], offset: usize) -> EditResult<u32> {
    let end = offset.checked_add(4).filter(|&end| end <= buf.len());
    match end {
        Some(_) => Ok(u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ])),
        None => Err(truncated(offset, 4, buf.len())),
    }
}

pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn truncated(offset: usize, len: usize, available: usize) -> EditError {
    EditError::InvalidFormat(format!(
        "truncated structure: {len}-byte field at offset {offset:#x} exceeds {available:#x} available bytes"
    ))
}
