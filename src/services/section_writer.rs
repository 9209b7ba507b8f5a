//! Resource section writer.
//!
//! Serializes a mutated resource tree, rebases its section-relative
//! data pointers onto the section's virtual address, verifies the
//! result still fits the existing virtual and file extents, updates
//! the header's size fields, and writes the buffer at the section's
//! file offset. Growing a section is out of scope: a tree that no
//! longer fits is refused rather than relocated.

use log::{debug, info};

use crate::domain::bytes::{get_u32, put_u32};
use crate::domain::pe::{ExeHeader, ResolvedDirectory, DIR_RESOURCE};
use crate::domain::rsrc::{build, ResTable};
use crate::infra::device::WriteAt;
use crate::infra::error::{EditError, EditResult};

pub struct ResourceSectionWriter;

impl ResourceSectionWriter {
    /// Serialize `table` into the resolved resource section and patch
    /// the header accordingly. The header buffer itself is flushed by
    /// the caller at the end of the pass.
    pub fn write(
        header: &mut ExeHeader,
        directory: &ResolvedDirectory,
        table: &ResTable,
        device: &mut impl WriteAt,
    ) -> EditResult<()> {
        if table.leaf_count() == 0 {
            return Err(EditError::Unsupported(
                "resource tree became empty; refusing to write an empty section".to_string(),
            ));
        }

        let (mut buf, patch_offsets) = build(table);
        for offset in patch_offsets {
            let relative = get_u32(&buf, offset)?;
            put_u32(&mut buf, offset, relative + directory.virt.start);
        }

        // The rebuilt tree must fit what the hosting section already
        // allocates, both virtually and on disk. The directory usually
        // starts at the section base; account for an offset anyway.
        let section = &header.sections[directory.section_index];
        let virt_offset = directory.virt.start - section.virt.start;
        let file_offset = directory.file.start - section.file.start;
        let available_virt = section.virt.size - virt_offset;
        let available_file = section.file.size - file_offset;

        let len = buf.len() as u32;
        if len > available_virt || len > available_file {
            return Err(EditError::Unsupported(format!(
                "serialized resource directory ({len:#x} bytes) exceeds the existing section \
                 allocation (virtual {available_virt:#x}, file {available_file:#x}); \
                 section growth is not supported"
            )));
        }

        header.set_directory_size(DIR_RESOURCE, len);
        header.set_section_sizes(directory.section_index, virt_offset + len, file_offset + len);
        debug!(
            "resource section rebuilt: {len:#x} bytes at file offset {:#x}, rva {:#x}",
            directory.file.start, directory.virt.start
        );

        device.write_at(u64::from(directory.file.start), &buf)?;
        info!("wrote resource section ({} leaves, {len:#x} bytes)", table.leaf_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::range::{FileRange, RvaRange};
    use crate::domain::rsrc::{parse, ResId};
    use crate::infra::device::MemDevice;

    fn directory(virt_size: u32, file_size: u32) -> ResolvedDirectory {
        ResolvedDirectory {
            section_index: 0,
            virt: RvaRange::new(0x2000, virt_size),
            file: FileRange::new(0x400, file_size),
        }
    }

    fn sample_table() -> ResTable {
        let mut table = ResTable::new();
        table.set(ResId::Id(3), ResId::Id(1), ResId::Id(0x409), vec![1, 2, 3, 4]);
        table
    }

    fn test_header() -> ExeHeader {
        // a single-section image whose .rsrc matches `directory`
        let pe_offset = 0x80usize;
        let opt = pe_offset + 24;
        let opt_size: u16 = 112 + 16 * 8;
        let section_table = opt + opt_size as usize;

        let mut buf = vec![0u8; 0x1000];
        buf[0] = b'M';
        buf[1] = b'Z';
        buf[0x3c..0x40].copy_from_slice(&(pe_offset as u32).to_le_bytes());
        buf[pe_offset..pe_offset + 4].copy_from_slice(b"PE\0\0");
        buf[pe_offset + 4 + 2..pe_offset + 4 + 4].copy_from_slice(&1u16.to_le_bytes());
        buf[pe_offset + 4 + 16..pe_offset + 4 + 18].copy_from_slice(&opt_size.to_le_bytes());
        buf[opt..opt + 2].copy_from_slice(&0x020bu16.to_le_bytes());
        buf[opt + 32..opt + 36].copy_from_slice(&0x1000u32.to_le_bytes());
        buf[opt + 36..opt + 40].copy_from_slice(&0x200u32.to_le_bytes());
        buf[opt + 60..opt + 64].copy_from_slice(&0x200u32.to_le_bytes());
        buf[opt + 112 + DIR_RESOURCE * 8..opt + 112 + DIR_RESOURCE * 8 + 4]
            .copy_from_slice(&0x2000u32.to_le_bytes());
        buf[opt + 112 + DIR_RESOURCE * 8 + 4..opt + 112 + DIR_RESOURCE * 8 + 8]
            .copy_from_slice(&0x100u32.to_le_bytes());
        buf[section_table..section_table + 5].copy_from_slice(b".rsrc");
        buf[section_table + 8..section_table + 12].copy_from_slice(&0x1000u32.to_le_bytes());
        buf[section_table + 12..section_table + 16].copy_from_slice(&0x2000u32.to_le_bytes());
        buf[section_table + 16..section_table + 20].copy_from_slice(&0x400u32.to_le_bytes());
        buf[section_table + 20..section_table + 24].copy_from_slice(&0x400u32.to_le_bytes());

        ExeHeader::read(&mut MemDevice::new(buf)).unwrap()
    }

    #[test]
    fn writes_patched_section_at_file_offset() {
        let mut header = test_header();
        let dir = directory(0x1000, 0x400);
        let mut device = MemDevice::new(vec![0u8; 0x1000]);

        ResourceSectionWriter::write(&mut header, &dir, &sample_table(), &mut device).unwrap();

        let written = &device.bytes()[0x400..];
        let reparsed = parse(written, 0x2000).unwrap();
        assert_eq!(
            reparsed.get(&ResId::Id(3), None, None).unwrap().data,
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn updates_header_size_fields() {
        let mut header = test_header();
        let dir = directory(0x1000, 0x400);
        let mut device = MemDevice::new(vec![0u8; 0x1000]);

        ResourceSectionWriter::write(&mut header, &dir, &sample_table(), &mut device).unwrap();

        let (buf, _) = build(&sample_table());
        let entry = header
            .rva_table
            .iter()
            .find(|e| e.index == DIR_RESOURCE)
            .unwrap();
        assert_eq!(entry.virt.size as usize, buf.len());
        assert_eq!(header.sections[0].virt.size as usize, buf.len());
        // raw size stays file-aligned
        assert_eq!(header.sections[0].file.size % 0x200, 0);
    }

    #[test]
    fn refuses_tree_larger_than_the_section() {
        let mut header = test_header();
        // the .rsrc section allocates 0x400 file bytes
        let dir = directory(0x1000, 0x400);
        let mut device = MemDevice::new(vec![0u8; 0x1000]);
        let mut table = sample_table();
        table.set(ResId::Id(3), ResId::Id(2), ResId::Id(0x409), vec![0; 0x500]);

        let err =
            ResourceSectionWriter::write(&mut header, &dir, &table, &mut device).unwrap_err();
        assert!(matches!(err, EditError::Unsupported(_)));
    }

    #[test]
    fn refuses_empty_tree() {
        let mut header = test_header();
        let dir = directory(0x1000, 0x400);
        let mut device = MemDevice::new(vec![0u8; 0x1000]);

        let err = ResourceSectionWriter::write(&mut header, &dir, &ResTable::new(), &mut device)
            .unwrap_err();
        assert!(matches!(err, EditError::Unsupported(_)));
    }
}
