//! VS_VERSIONINFO codec.
//!
//! The version resource is a recursively nested, length-delimited
//! record format: every record carries a total length, a value length,
//! a binary/text type flag and a NUL-terminated UTF-16 key, with
//! 32-bit alignment between the key, the value and each child record.
//! The fixed version numbers live in a 52-byte binary FIXEDFILEINFO
//! value distinguished by its 0xFEEF04BD signature.

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::domain::bytes::{get_u16, get_u32};
use crate::infra::error::{EditError, EditResult};

/// Signature at offset 0 of a FIXEDFILEINFO record.
pub const FIXED_INFO_SIGNATURE: u32 = 0xfeef_04bd;
/// Minimum byte length of a FIXEDFILEINFO record.
pub const FIXED_INFO_LEN: usize = 52;

/// Default string-table key: US-English, Unicode codepage.
pub const DEFAULT_STRING_TABLE: &str = "040904b0";

const FILE_VERSION_OFFSET: usize = 8;
const PRODUCT_VERSION_OFFSET: usize = 16;

/// Record value: raw bytes (wire type 0) or text (wire type 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionValue {
    Binary(Vec<u8>),
    Text(String),
}

impl VersionValue {
    #[must_use]
    pub fn empty_text() -> Self {
        VersionValue::Text(String::new())
    }
}

/// One node of the version info tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBlock {
    pub key: String,
    pub value: VersionValue,
    pub children: Vec<VersionBlock>,
}

impl VersionBlock {
    #[must_use]
    pub fn new(key: impl Into<String>, value: VersionValue) -> Self {
        Self {
            key: key.into(),
            value,
            children: Vec::new(),
        }
    }

    fn has_fixed_info(&self) -> bool {
        match &self.value {
            VersionValue::Binary(bytes) => {
                bytes.len() >= FIXED_INFO_LEN
                    && get_u32(bytes, 0).is_ok_and(|sig| sig == FIXED_INFO_SIGNATURE)
            }
            VersionValue::Text(_) => false,
        }
    }

    /// The FIXEDFILEINFO record of this tree, if any.
    #[must_use]
    pub fn fixed_info(&self) -> Option<&[u8]> {
        if self.has_fixed_info() {
            match &self.value {
                VersionValue::Binary(bytes) => return Some(bytes),
                VersionValue::Text(_) => unreachable!(),
            }
        }
        self.children.iter().find_map(VersionBlock::fixed_info)
    }

    /// The FIXEDFILEINFO record, installing a default one at the root
    /// when the tree has none.
    pub fn ensure_fixed_info(&mut self) -> &mut Vec<u8> {
        if find_fixed_block(self).is_none() {
            if !matches!(self.value, VersionValue::Binary(_)) {
                warn!("version info root {:?} carries no binary value, replacing", self.key);
            }
            self.value = VersionValue::Binary(default_fixed_info());
        }
        let block = find_fixed_block(self).expect("fixed info just ensured");
        match &mut block.value {
            VersionValue::Binary(bytes) => bytes,
            VersionValue::Text(_) => unreachable!(),
        }
    }

    /// Overwrite the file version quad of the FIXEDFILEINFO record.
    pub fn set_file_version(&mut self, quad: VersionQuad) {
        set_quad(self.ensure_fixed_info(), FILE_VERSION_OFFSET, quad);
    }

    /// Overwrite the product version quad of the FIXEDFILEINFO record.
    pub fn set_product_version(&mut self, quad: VersionQuad) {
        set_quad(self.ensure_fixed_info(), PRODUCT_VERSION_OFFSET, quad);
    }

    #[must_use]
    pub fn file_version(&self) -> Option<VersionQuad> {
        self.fixed_info().map(|b| get_quad(b, FILE_VERSION_OFFSET))
    }

    #[must_use]
    pub fn product_version(&self) -> Option<VersionQuad> {
        self.fixed_info().map(|b| get_quad(b, PRODUCT_VERSION_OFFSET))
    }

    /// Set a string under `StringFileInfo → <first table>`, creating
    /// both when absent.
    pub fn set_string(&mut self, key: &str, value: &str) {
        let table = self.first_string_table_mut();
        match table.children.iter_mut().find(|c| c.key == key) {
            Some(child) => child.value = VersionValue::Text(value.to_string()),
            None => table
                .children
                .push(VersionBlock::new(key, VersionValue::Text(value.to_string()))),
        }
    }

    /// Delete a string from the first string table, if present.
    pub fn delete_string(&mut self, key: &str) {
        let Some(info) = self.children.iter_mut().find(|c| c.key == "StringFileInfo") else {
            return;
        };
        if let Some(table) = info.children.first_mut() {
            table.children.retain(|c| c.key != key);
        }
    }

    /// Read a string from the first string table.
    #[must_use]
    pub fn version_string(&self, key: &str) -> Option<&str> {
        let info = self.children.iter().find(|c| c.key == "StringFileInfo")?;
        let table = info.children.first()?;
        let entry = table.children.iter().find(|c| c.key == key)?;
        match &entry.value {
            VersionValue::Text(s) => Some(s),
            VersionValue::Binary(_) => None,
        }
    }

    fn first_string_table_mut(&mut self) -> &mut VersionBlock {
        let info_index = match self.children.iter().position(|c| c.key == "StringFileInfo") {
            Some(index) => index,
            None => {
                self.children.push(VersionBlock::new(
                    "StringFileInfo",
                    VersionValue::empty_text(),
                ));
                self.children.len() - 1
            }
        };
        let info = &mut self.children[info_index];
        if info.children.is_empty() {
            info.children.push(VersionBlock::new(
                DEFAULT_STRING_TABLE,
                VersionValue::empty_text(),
            ));
        }
        &mut info.children[0]
    }
}

fn find_fixed_block(block: &mut VersionBlock) -> Option<&mut VersionBlock> {
    if block.has_fixed_info() {
        return Some(block);
    }
    block.children.iter_mut().find_map(find_fixed_block)
}

/// Default version tree synthesized when an executable has no
/// RT_VERSION resource yet.
#[must_use]
pub fn default_version_info() -> VersionBlock {
    let mut root = VersionBlock::new(
        "VS_VERSION_INFO",
        VersionValue::Binary(default_fixed_info()),
    );
    let mut string_file_info = VersionBlock::new("StringFileInfo", VersionValue::empty_text());
    string_file_info
        .children
        .push(VersionBlock::new(DEFAULT_STRING_TABLE, VersionValue::empty_text()));
    let mut var_file_info = VersionBlock::new("VarFileInfo", VersionValue::empty_text());
    var_file_info.children.push(VersionBlock::new(
        "Translation",
        VersionValue::Binary(vec![0x09, 0x04, 0xb0, 0x04]),
    ));
    root.children.push(string_file_info);
    root.children.push(var_file_info);
    root
}

fn default_fixed_info() -> Vec<u8> {
    let mut bytes = vec![0u8; FIXED_INFO_LEN];
    bytes[0..4].copy_from_slice(&FIXED_INFO_SIGNATURE.to_le_bytes());
    bytes[4..8].copy_from_slice(&0x0001_0000u32.to_le_bytes()); // struct version
    bytes[32..36].copy_from_slice(&0x0004_0004u32.to_le_bytes()); // VOS_NT_WINDOWS32
    bytes[36..40].copy_from_slice(&1u32.to_le_bytes()); // VFT_APP
    bytes
}

/// The binary version quads are stored as four 16-bit LE words in the
/// order (MS low, MS high, LS low, LS high), reflecting the Microsoft
/// DWORD pair layout emitted low-word-first.
fn get_quad(bytes: &[u8], offset: usize) -> VersionQuad {
    let word = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
    VersionQuad([
        word(offset + 2),
        word(offset),
        word(offset + 6),
        word(offset + 4),
    ])
}

fn set_quad(bytes: &mut [u8], offset: usize, quad: VersionQuad) {
    let [a, b, c, d] = quad.0;
    bytes[offset + 2..offset + 4].copy_from_slice(&a.to_le_bytes());
    bytes[offset..offset + 2].copy_from_slice(&b.to_le_bytes());
    bytes[offset + 6..offset + 8].copy_from_slice(&c.to_le_bytes());
    bytes[offset + 4..offset + 6].copy_from_slice(&d.to_le_bytes());
}

/// A dotted version of up to four 16-bit components; missing
/// components are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionQuad(pub [u16; 4]);

impl FromStr for VersionQuad {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(EditError::Usage(format!(
                "version '{s}' must have 1 to 4 dot-separated components"
            )));
        }
        let mut quad = [0u16; 4];
        for (slot, part) in quad.iter_mut().zip(&parts) {
            *slot = part.parse::<u16>().map_err(|_| {
                EditError::Usage(format!(
                    "version component '{part}' is not an integer in [0, 65535]"
                ))
            })?;
        }
        Ok(VersionQuad(quad))
    }
}

impl fmt::Display for VersionQuad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// Parse a serialized VS_VERSIONINFO resource.
pub fn parse_version_info(bytes: &[u8]) -> EditResult<VersionBlock> {
    let (block, _) = parse_block(bytes, 0)?;
    Ok(block)
}

fn parse_block(data: &[u8], start: usize) -> EditResult<(VersionBlock, usize)> {
    let length = get_u16(data, start)? as usize;
    if length < 6 {
        return Err(EditError::InvalidFormat(format!(
            "version record at {start:#x} declares impossible length {length}"
        )));
    }
    let end = start + length;
    if end > data.len() {
        return Err(EditError::InvalidFormat(format!(
            "version record at {start:#x} of length {length} exceeds the resource"
        )));
    }
    let value_len = get_u16(data, start + 2)? as usize;
    let value_type = get_u16(data, start + 4)?;

    let mut pos = start + 6;
    let mut key_units = Vec::new();
    loop {
        let unit = get_u16(data, pos)?;
        pos += 2;
        if unit == 0 {
            break;
        }
        if pos >= end {
            return Err(EditError::InvalidFormat(format!(
                "unterminated key in version record at {start:#x}"
            )));
        }
        key_units.push(unit);
    }
    let key = String::from_utf16(&key_units).map_err(|_| {
        EditError::InvalidFormat(format!("version record key at {start:#x} is not valid UTF-16"))
    })?;

    pos = align4(pos);
    let value = match value_type {
        0 => {
            let value_end = pos + value_len;
            if value_end > end {
                return Err(EditError::InvalidFormat(format!(
                    "binary value of version record '{key}' exceeds the record"
                )));
            }
            let value = VersionValue::Binary(data[pos..value_end].to_vec());
            pos = value_end;
            value
        }
        1 => {
            let value_end = pos + value_len * 2;
            if value_end > end {
                return Err(EditError::InvalidFormat(format!(
                    "text value of version record '{key}' exceeds the record"
                )));
            }
            let mut units = Vec::with_capacity(value_len);
            while pos < value_end {
                units.push(get_u16(data, pos)?);
                pos += 2;
            }
            if units.last() == Some(&0) {
                units.pop();
            }
            let text = String::from_utf16(&units).map_err(|_| {
                EditError::InvalidFormat(format!(
                    "text value of version record '{key}' is not valid UTF-16"
                ))
            })?;
            VersionValue::Text(text)
        }
        other => {
            return Err(EditError::InvalidFormat(format!(
                "unknown version record type {other} in record '{key}'"
            )))
        }
    };

    let mut children = Vec::new();
    loop {
        let child_start = align4(pos);
        if child_start >= end {
            break;
        }
        let (child, child_end) = parse_block(data, child_start)?;
        children.push(child);
        pos = child_end;
    }

    Ok((
        VersionBlock {
            key,
            value,
            children,
        },
        end,
    ))
}

/// Serialize a version info tree back to its wire form, padding each
/// child record to a 4-byte boundary.
pub fn format_version_info(root: &VersionBlock) -> EditResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_block(&mut buf, root)?;
    Ok(buf)
}

fn write_block(buf: &mut Vec<u8>, block: &VersionBlock) -> EditResult<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0, 0]); // length, backpatched below

    let (value_len, value_type, value_bytes) = match &block.value {
        VersionValue::Binary(bytes) => (bytes.len(), 0u16, bytes.clone()),
        VersionValue::Text(text) => {
            if text.is_empty() {
                (0, 1u16, Vec::new())
            } else {
                let mut units: Vec<u16> = text.encode_utf16().collect();
                units.push(0);
                let bytes = units.iter().flat_map(|u| u.to_le_bytes()).collect();
                (units.len(), 1u16, bytes)
            }
        }
    };
    buf.extend_from_slice(&(value_len as u16).to_le_bytes());
    buf.extend_from_slice(&value_type.to_le_bytes());
    for unit in block.key.encode_utf16() {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    buf.extend_from_slice(&[0, 0]); // key terminator

    pad_buf(buf);
    buf.extend_from_slice(&value_bytes);

    for child in &block.children {
        pad_buf(buf);
        write_block(buf, child)?;
    }

    let length = u16::try_from(buf.len() - start).map_err(|_| {
        EditError::InvalidFormat(format!(
            "version record '{}' exceeds the 64 KiB record limit",
            block.key
        ))
    })?;
    buf[start..start + 2].copy_from_slice(&length.to_le_bytes());
    Ok(())
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

fn pad_buf(buf: &mut Vec<u8>) {
    let len = align4(buf.len());
    buf.resize(len, 0);
}
