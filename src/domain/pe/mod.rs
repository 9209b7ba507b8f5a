//! PE/PE32+ header reader.
//!
//! Reads the first 4 KiB of an executable into a mutable prefix buffer,
//! validates the DOS stub pointer, COFF header, optional header and
//! section table, and resolves data-directory RVAs to file offsets.
//! Header edits (subsystem, checksum, directory and section sizes) are
//! patched into the prefix buffer in place and flushed once at the end
//! of the editing session.

use crate::domain::bytes::{get_u16, get_u32, put_u16, put_u32};
use crate::domain::range::{align_up, FileRange, RvaRange};
use crate::infra::device::{ReadAt, WriteAt};
use crate::infra::error::{EditError, EditResult};

/// Length of the header prefix buffer read from the start of the file.
pub const HEADER_PREFIX_LEN: usize = 0x1000;

/// Optional-header magic for PE32 (32-bit).
pub const PE32_MAGIC: u16 = 0x010b;
/// Optional-header magic for PE32+ (64-bit).
pub const PE32PLUS_MAGIC: u16 = 0x020b;

// Well-known data directory indices.
pub const DIR_EXPORT: usize = 0;
pub const DIR_IMPORT: usize = 1;
pub const DIR_RESOURCE: usize = 2;
pub const DIR_SECURITY: usize = 4;
pub const DIR_BASERELOC: usize = 5;

/// Number of data-directory slots in the optional header.
const DIR_SLOT_COUNT: usize = 16;

/// Windows subsystem selector stored in the optional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Gui,
    Console,
}

impl Subsystem {
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Subsystem::Gui => 2,
            Subsystem::Console => 3,
        }
    }
}

/// One 40-byte section table entry, with both of its address ranges.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    /// Position in the section table.
    pub index: usize,
    /// Offset of the 40-byte entry within the header prefix buffer.
    pub table_offset: usize,
    /// Section name, trailing NULs stripped.
    pub name: String,
    pub characteristics: u32,
    pub file: FileRange,
    pub virt: RvaRange,
}

impl SectionHeader {
    /// Delta translating RVAs inside this section to file offsets:
    /// `virtual.start - file.start`.
    #[must_use]
    pub fn adjustment(&self) -> i64 {
        i64::from(self.virt.start) - i64::from(self.file.start)
    }
}

/// One populated data-directory slot. Slots with zero address and size
/// are omitted from the parsed table.
#[derive(Debug, Clone)]
pub struct RvaEntry {
    pub index: usize,
    pub virt: RvaRange,
}

/// A data directory resolved to the section that hosts it.
#[derive(Debug, Clone)]
pub struct ResolvedDirectory {
    pub section_index: usize,
    pub virt: RvaRange,
    pub file: FileRange,
}

/// Parsed view over the mutable 4 KiB header prefix of an executable.
#[derive(Debug)]
pub struct ExeHeader {
    buf: Vec<u8>,
    pe_offset: usize,
    opt_offset: usize,
    magic: u16,
    machine: u16,
    dir_table_offset: usize,
    pub rva_table: Vec<RvaEntry>,
    pub sections: Vec<SectionHeader>,
    file_alignment: u32,
    section_alignment: u32,
    size_of_headers: u32,
}

impl ExeHeader {
    /// Read and validate the header prefix from the device.
    pub fn read(device: &mut impl ReadAt) -> EditResult<Self> {
        let buf = device.read_at(0, HEADER_PREFIX_LEN)?;
        Self::parse(buf)
    }

    fn parse(buf: Vec<u8>) -> EditResult<Self> {
        if &buf[0..2] != b"MZ" {
            return Err(EditError::InvalidFormat(
                "missing MZ signature in DOS header".to_string(),
            ));
        }

        let pe_offset = get_u32(&buf, 0x3c)? as usize;
        if pe_offset > HEADER_PREFIX_LEN {
            return Err(EditError::InvalidFormat(format!(
                "PE header offset {pe_offset:#x} exceeds the {HEADER_PREFIX_LEN:#x} header prefix"
            )));
        }
        if get_u32(&buf, pe_offset)? != u32::from_le_bytes(*b"PE\0\0") {
            return Err(EditError::InvalidFormat(
                "missing PE signature".to_string(),
            ));
        }

        let coff_offset = pe_offset + 4;
        let machine = get_u16(&buf, coff_offset)?;
        let section_count = get_u16(&buf, coff_offset + 2)? as usize;
        let opt_header_size = get_u16(&buf, coff_offset + 16)? as usize;

        let opt_offset = coff_offset + 20;
        let magic = get_u16(&buf, opt_offset)?;
        let dir_table_offset = match magic {
            PE32_MAGIC => opt_offset + 96,
            PE32PLUS_MAGIC => opt_offset + 112,
            other => {
                return Err(EditError::InvalidFormat(format!(
                    "unknown optional header magic {other:#06x}"
                )))
            }
        };

        let section_alignment = get_u32(&buf, opt_offset + 32)?;
        let file_alignment = get_u32(&buf, opt_offset + 36)?;
        if !file_alignment.is_power_of_two() {
            return Err(EditError::InvalidFormat(format!(
                "file alignment {file_alignment:#x} is not a power of two"
            )));
        }
        let size_of_headers = get_u32(&buf, opt_offset + 60)?;

        let mut rva_table = Vec::new();
        for index in 0..DIR_SLOT_COUNT {
            let base = dir_table_offset + index * 8;
            let start = get_u32(&buf, base)?;
            let size = get_u32(&buf, base + 4)?;
            if start == 0 && size == 0 {
                continue;
            }
            rva_table.push(RvaEntry {
                index,
                virt: RvaRange::new(start, size),
            });
        }

        let section_table_offset = opt_offset + opt_header_size;
        let mut sections = Vec::with_capacity(section_count);
        for index in 0..section_count {
            let table_offset = section_table_offset + index * 40;
            if table_offset + 40 > buf.len() {
                return Err(EditError::InvalidFormat(
                    "section table exceeds the header prefix".to_string(),
                ));
            }
            let name_bytes = &buf[table_offset..table_offset + 8];
            let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(8);
            let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

            let virtual_size = get_u32(&buf, table_offset + 8)?;
            let virtual_address = get_u32(&buf, table_offset + 12)?;
            let raw_size = get_u32(&buf, table_offset + 16)?;
            let raw_offset = get_u32(&buf, table_offset + 20)?;
            let characteristics = get_u32(&buf, table_offset + 36)?;

            sections.push(SectionHeader {
                index,
                table_offset,
                name,
                characteristics,
                file: FileRange::new(raw_offset, raw_size),
                virt: RvaRange::new(virtual_address, virtual_size),
            });
        }

        let end_of_section_table = (section_table_offset + section_count * 40) as u32;
        let expected = align_up(end_of_section_table, file_alignment);
        if size_of_headers != expected {
            return Err(EditError::InvalidFormat(format!(
                "size of headers {size_of_headers:#x} does not match the aligned section table end {expected:#x}"
            )));
        }
        if size_of_headers as usize > buf.len() {
            return Err(EditError::InvalidFormat(format!(
                "size of headers {size_of_headers:#x} exceeds the {HEADER_PREFIX_LEN:#x} header prefix"
            )));
        }

        Ok(Self {
            buf,
            pe_offset,
            opt_offset,
            magic,
            machine,
            dir_table_offset,
            rva_table,
            sections,
            file_alignment,
            section_alignment,
            size_of_headers,
        })
    }

    /// Resolve a data-directory slot to the section hosting it.
    ///
    /// Returns `Ok(None)` when the slot is empty. Fails when the RVA is
    /// present but lies outside every section.
    pub fn resolve_rva(&self, dir_index: usize) -> EditResult<Option<ResolvedDirectory>> {
        let Some(entry) = self.rva_table.iter().find(|e| e.index == dir_index) else {
            return Ok(None);
        };
        let section = self
            .sections
            .iter()
            .find(|s| s.virt.contains(entry.virt.start))
            .ok_or_else(|| {
                EditError::InvalidFormat(format!(
                    "directory {dir_index} RVA {:#x} is not covered by any section",
                    entry.virt.start
                ))
            })?;
        let file_start = section.file.start + (entry.virt.start - section.virt.start);
        Ok(Some(ResolvedDirectory {
            section_index: section.index,
            virt: entry.virt,
            file: FileRange::new(file_start, entry.virt.size),
        }))
    }

    /// Overwrite the 16-bit subsystem field at optional-header offset 68.
    pub fn set_subsystem(&mut self, subsystem: Subsystem) {
        put_u16(&mut self.buf, self.opt_offset + 68, subsystem.as_u16());
    }

    #[must_use]
    pub fn subsystem(&self) -> u16 {
        u16::from_le_bytes([
            self.buf[self.opt_offset + 68],
            self.buf[self.opt_offset + 69],
        ])
    }

    /// Zero the 32-bit checksum field at optional-header offset 64.
    pub fn zero_checksum(&mut self) {
        put_u32(&mut self.buf, self.opt_offset + 64, 0);
    }

    /// Overwrite the size field of a data-directory slot.
    pub fn set_directory_size(&mut self, dir_index: usize, size: u32) {
        let offset = self.dir_table_offset + dir_index * 8 + 4;
        put_u32(&mut self.buf, offset, size);
        if let Some(entry) = self.rva_table.iter_mut().find(|e| e.index == dir_index) {
            entry.virt = RvaRange::new(entry.virt.start, size);
        }
    }

    /// Overwrite the virtual and raw size fields of a section table
    /// entry. The raw size is rounded up to the file alignment.
    pub fn set_section_sizes(&mut self, section_index: usize, virtual_size: u32, raw_size: u32) {
        let section = &mut self.sections[section_index];
        let aligned_raw = align_up(raw_size, self.file_alignment);
        put_u32(&mut self.buf, section.table_offset + 8, virtual_size);
        put_u32(&mut self.buf, section.table_offset + 16, aligned_raw);
        section.virt = RvaRange::new(section.virt.start, virtual_size);
        section.file = FileRange::new(section.file.start, aligned_raw);
    }

    #[must_use]
    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }

    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.magic == PE32PLUS_MAGIC
    }

    /// The raw (possibly mutated) header prefix.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Human-readable header dump for verbose diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "PE{} image, machine {:#06x}, subsystem {}, headers {:#x} (file alignment {:#x}, section alignment {:#x})\n",
            if self.is_pe32_plus() { "32+" } else { "32" },
            self.machine,
            self.subsystem(),
            self.size_of_headers,
            self.file_alignment,
            self.section_alignment,
        ));
        for entry in &self.rva_table {
            out.push_str(&format!(
                "  directory {:>2}: rva {:?}\n",
                entry.index, entry.virt
            ));
        }
        for section in &self.sections {
            out.push_str(&format!(
                "  section {:<8} virt {:?} file {:?}\n",
                section.name, section.virt, section.file
            ));
        }
        out
    }

    /// Flush the header prefix buffer back to position 0.
    pub fn write_back(&self, device: &mut impl WriteAt) -> EditResult<()> {
        device.write_at(0, &self.buf)
    }

    #[must_use]
    pub fn pe_offset(&self) -> usize {
        self.pe_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::device::MemDevice;

    fn put16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    // Minimal PE32+ image: one .text section plus a .rsrc section with a
    // populated resource directory slot.
    fn build_test_image() -> Vec<u8> {
        let pe_offset = 0x80usize;
        let coff = pe_offset + 4;
        let opt = coff + 20;
        let opt_size: u16 = 112 + 16 * 8;
        let section_table = opt + opt_size as usize;

        let mut buf = vec![0u8; 0x1400];
        buf[0] = b'M';
        buf[1] = b'Z';
        put32(&mut buf, 0x3c, pe_offset as u32);
        buf[pe_offset..pe_offset + 4].copy_from_slice(b"PE\0\0");

        put16(&mut buf, coff, 0x8664);
        put16(&mut buf, coff + 2, 2); // sections
        put16(&mut buf, coff + 16, opt_size);

        put16(&mut buf, opt, PE32PLUS_MAGIC);
        put32(&mut buf, opt + 32, 0x1000); // section alignment
        put32(&mut buf, opt + 36, 0x200); // file alignment
        put32(&mut buf, opt + 60, 0x200); // size of headers
        put32(&mut buf, opt + 64, 0xdead_beef); // checksum
        put16(&mut buf, opt + 68, 3); // console subsystem

        // resource directory slot
        put32(&mut buf, opt + 112 + DIR_RESOURCE * 8, 0x2000);
        put32(&mut buf, opt + 112 + DIR_RESOURCE * 8 + 4, 0x100);

        // .text
        let s = section_table;
        buf[s..s + 5].copy_from_slice(b".text");
        put32(&mut buf, s + 8, 0x1000);
        put32(&mut buf, s + 12, 0x1000);
        put32(&mut buf, s + 16, 0x200);
        put32(&mut buf, s + 20, 0x200);
        // .rsrc
        let s = section_table + 40;
        buf[s..s + 5].copy_from_slice(b".rsrc");
        put32(&mut buf, s + 8, 0x1000);
        put32(&mut buf, s + 12, 0x2000);
        put32(&mut buf, s + 16, 0x400);
        put32(&mut buf, s + 20, 0x400);

        buf
    }

    fn parse(buf: Vec<u8>) -> EditResult<ExeHeader> {
        ExeHeader::read(&mut MemDevice::new(buf))
    }

    #[test]
    fn parses_valid_image() {
        let header = parse(build_test_image()).unwrap();
        assert!(header.is_pe32_plus());
        assert_eq!(header.sections.len(), 2);
        assert_eq!(header.sections[1].name, ".rsrc");
        assert_eq!(header.sections[1].adjustment(), 0x2000 - 0x400);
        assert_eq!(header.file_alignment(), 0x200);
        assert_eq!(header.rva_table.len(), 1);
        assert_eq!(header.subsystem(), 3);
    }

    #[test]
    fn rejects_missing_mz() {
        let mut buf = build_test_image();
        buf[0] = b'X';
        let err = parse(buf).unwrap_err();
        assert!(err.to_string().contains("MZ"));
    }

    #[test]
    fn rejects_pe_offset_past_prefix() {
        let mut buf = build_test_image();
        put32(&mut buf, 0x3c, 0x1001);
        let err = parse(buf).unwrap_err();
        assert!(err.to_string().contains("PE header offset"));
    }

    #[test]
    fn pe_offset_at_prefix_boundary_passes_the_offset_check() {
        let mut buf = build_test_image();
        put32(&mut buf, 0x3c, 0x1000);
        // The offset itself is in bounds; the failure is the signature
        // lying outside the prefix, not the offset check.
        let err = parse(buf).unwrap_err();
        assert!(!err.to_string().contains("PE header offset"));
    }

    #[test]
    fn rejects_bad_optional_magic() {
        let mut buf = build_test_image();
        put16(&mut buf, 0x98, 0x0107);
        let err = parse(buf).unwrap_err();
        assert!(err.to_string().contains("optional header magic"));
    }

    #[test]
    fn rejects_size_of_headers_mismatch() {
        let mut buf = build_test_image();
        put32(&mut buf, 0x98 + 60, 0x400);
        let err = parse(buf).unwrap_err();
        assert!(err.to_string().contains("size of headers"));
    }

    #[test]
    fn resolves_resource_directory() {
        let header = parse(build_test_image()).unwrap();
        let dir = header.resolve_rva(DIR_RESOURCE).unwrap().unwrap();
        assert_eq!(dir.section_index, 1);
        assert_eq!(dir.file.start, 0x400);
        assert_eq!(dir.file.size, 0x100);
        assert!(header.resolve_rva(DIR_IMPORT).unwrap().is_none());
    }

    #[test]
    fn resolve_fails_outside_sections() {
        let mut buf = build_test_image();
        // point the resource slot at an RVA no section covers
        put32(&mut buf, 0x98 + 112 + DIR_RESOURCE * 8, 0x9000);
        let header = parse(buf).unwrap();
        assert!(header.resolve_rva(DIR_RESOURCE).is_err());
    }

    #[test]
    fn subsystem_and_checksum_edits() {
        let mut header = parse(build_test_image()).unwrap();
        header.set_subsystem(Subsystem::Gui);
        header.zero_checksum();
        assert_eq!(header.subsystem(), 2);
        assert_eq!(&header.bytes()[0x98 + 64..0x98 + 68], &[0, 0, 0, 0]);
    }

    #[test]
    fn unmutated_header_round_trips() {
        let buf = build_test_image();
        let header = parse(buf.clone()).unwrap();
        let mut dev = MemDevice::new(vec![0u8; HEADER_PREFIX_LEN]);
        header.write_back(&mut dev).unwrap();
        assert_eq!(dev.bytes(), &buf[..HEADER_PREFIX_LEN]);
    }

    #[test]
    fn section_size_update_respects_file_alignment() {
        let mut header = parse(build_test_image()).unwrap();
        header.set_section_sizes(1, 0x234, 0x234);
        assert_eq!(header.sections[1].virt.size, 0x234);
        assert_eq!(header.sections[1].file.size, 0x400);
    }

    #[test]
    fn summary_names_sections() {
        let header = parse(build_test_image()).unwrap();
        let summary = header.summary();
        assert!(summary.contains(".rsrc"));
        assert!(summary.contains("directory  2"));
    }
}
