//! Serializer for the on-disk resource directory.
//!
//! The output buffer is laid out in four regions, in order: directory
//! tables with their entries, UTF-16 name strings, 16-byte data-entry
//! records, and payload bytes. Each region is padded to 16 bytes and
//! each payload to 8. Data-entry RVA fields are written as
//! section-relative offsets; the returned patch list marks where the
//! target section's virtual base still has to be added.

use crate::domain::rsrc::{ResData, ResId, ResTable, ResTableHeader};

const SUBDIR_FLAG: u32 = 0x8000_0000;

/// Serialize a resource tree.
///
/// Returns the section buffer and the byte offsets of every
/// section-relative data pointer that must be rebased onto the target
/// virtual address.
#[must_use]
pub fn build(table: &ResTable) -> (Vec<u8>, Vec<usize>) {
    let root = canonicalize_root(table);

    let tables_total = tables_size(&root);
    let strings_total = strings_size(&root);
    let leaves_total = 16 * leaf_count(&root);

    let strings_base = pad16(tables_total);
    let entries_base = pad16(strings_base + strings_total);
    let payload_base = pad16(entries_base + leaves_total);

    let mut ctx = EmitCtx {
        tables: Vec::with_capacity(tables_total),
        strings: Vec::with_capacity(strings_total),
        entries: Vec::with_capacity(leaves_total),
        payload: Vec::new(),
        strings_base,
        entries_base,
        payload_base,
        patch_offsets: Vec::new(),
    };
    emit_dir(&root, 0, &mut ctx);

    let mut out = ctx.tables;
    pad_to(&mut out, strings_base);
    out.extend_from_slice(&ctx.strings);
    pad_to(&mut out, entries_base);
    out.extend_from_slice(&ctx.entries);
    pad_to(&mut out, payload_base);
    out.extend_from_slice(&ctx.payload);
    let end = pad16(out.len());
    pad_to(&mut out, end);

    (out, ctx.patch_offsets)
}

enum CanonChild<'a> {
    Dir(CanonDir<'a>),
    Leaf(&'a ResData),
}

struct CanonDir<'a> {
    header: ResTableHeader,
    entries: Vec<(&'a ResId, CanonChild<'a>)>,
    id_count: u16,
    name_count: u16,
}

impl<'a> CanonDir<'a> {
    fn new(
        header: Option<ResTableHeader>,
        mut entries: Vec<(&'a ResId, CanonChild<'a>)>,
    ) -> Self {
        // canonical emit order: integer ids ascending, then names
        // ascending by UTF-16 code units
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        let id_count = entries.iter().filter(|(k, _)| k.as_id().is_some()).count() as u16;
        let name_count = entries.len() as u16 - id_count;
        Self {
            header: header.unwrap_or_default(),
            entries,
            id_count,
            name_count,
        }
    }
}

fn canonicalize_root(table: &ResTable) -> CanonDir<'_> {
    let entries = table
        .types
        .iter()
        .map(|(ty, type_node)| {
            let names = type_node
                .names
                .iter()
                .map(|(name, name_node)| {
                    let langs = name_node
                        .langs
                        .iter()
                        .map(|(lang, data)| (lang, CanonChild::Leaf(data)))
                        .collect();
                    (
                        name,
                        CanonChild::Dir(CanonDir::new(name_node.header, langs)),
                    )
                })
                .collect();
            (ty, CanonChild::Dir(CanonDir::new(type_node.header, names)))
        })
        .collect();
    CanonDir::new(table.header, entries)
}

fn tables_size(dir: &CanonDir) -> usize {
    16 + 8 * dir.entries.len()
        + dir
            .entries
            .iter()
            .map(|(_, child)| match child {
                CanonChild::Dir(d) => tables_size(d),
                CanonChild::Leaf(_) => 0,
            })
            .sum::<usize>()
}

fn strings_size(dir: &CanonDir) -> usize {
    dir.entries
        .iter()
        .map(|(key, child)| {
            let own = match key {
                ResId::Name(name) => 2 + 2 * name.encode_utf16().count(),
                ResId::Id(_) => 0,
            };
            own + match child {
                CanonChild::Dir(d) => strings_size(d),
                CanonChild::Leaf(_) => 0,
            }
        })
        .sum()
}

fn leaf_count(dir: &CanonDir) -> usize {
    dir.entries
        .iter()
        .map(|(_, child)| match child {
            CanonChild::Dir(d) => leaf_count(d),
            CanonChild::Leaf(_) => 1,
        })
        .sum()
}

struct EmitCtx {
    tables: Vec<u8>,
    strings: Vec<u8>,
    entries: Vec<u8>,
    payload: Vec<u8>,
    strings_base: usize,
    entries_base: usize,
    payload_base: usize,
    patch_offsets: Vec<usize>,
}

/// Emit one directory block at `offset` within the tables region, then
/// recurse into its subdirectories, which follow it in pre-order.
fn emit_dir(dir: &CanonDir, offset: usize, ctx: &mut EmitCtx) {
    debug_assert_eq!(ctx.tables.len(), offset);

    push_u32(&mut ctx.tables, dir.header.characteristics);
    push_u32(&mut ctx.tables, dir.header.timestamp);
    push_u16(&mut ctx.tables, dir.header.major_version);
    push_u16(&mut ctx.tables, dir.header.minor_version);
    push_u16(&mut ctx.tables, dir.name_count);
    push_u16(&mut ctx.tables, dir.id_count);

    let mut next_dir_offset = offset + 16 + 8 * dir.entries.len();
    let mut child_offsets = Vec::new();
    for (key, child) in &dir.entries {
        let id_field = match key {
            ResId::Id(id) => u32::from(*id),
            ResId::Name(name) => {
                let string_offset = ctx.strings_base + ctx.strings.len();
                let units: Vec<u16> = name.encode_utf16().collect();
                push_u16(&mut ctx.strings, units.len() as u16);
                for unit in units {
                    push_u16(&mut ctx.strings, unit);
                }
                SUBDIR_FLAG | string_offset as u32
            }
        };
        let pointer = match child {
            CanonChild::Dir(d) => {
                let dir_offset = next_dir_offset;
                child_offsets.push(dir_offset);
                next_dir_offset += tables_size(d);
                SUBDIR_FLAG | dir_offset as u32
            }
            CanonChild::Leaf(data) => {
                let record_offset = ctx.entries_base + ctx.entries.len();
                let payload_offset = ctx.payload_base + ctx.payload.len();
                ctx.payload.extend_from_slice(&data.data);
                let padded = pad8(ctx.payload.len());
                ctx.payload.resize(padded, 0);

                ctx.patch_offsets.push(record_offset);
                push_u32(&mut ctx.entries, payload_offset as u32);
                push_u32(&mut ctx.entries, data.data.len() as u32);
                push_u32(&mut ctx.entries, data.codepage);
                push_u32(&mut ctx.entries, data.reserved);
                record_offset as u32
            }
        };
        push_u32(&mut ctx.tables, id_field);
        push_u32(&mut ctx.tables, pointer);
    }

    let mut child_offsets = child_offsets.into_iter();
    for (_, child) in &dir.entries {
        if let CanonChild::Dir(d) = child {
            let offset = child_offsets.next().expect("offset per subdirectory");
            emit_dir(d, offset, ctx);
        }
    }
}

fn pad8(value: usize) -> usize {
    (value + 7) & !7
}

fn pad16(value: usize) -> usize {
    (value + 15) & !15
}

fn pad_to(buf: &mut Vec<u8>, len: usize) {
    debug_assert!(len >= buf.len());
    buf.resize(len, 0);
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rsrc::{parse, RT_GROUP_ICON, RT_ICON};

    fn sample_table() -> ResTable {
        let mut table = ResTable::new();
        table.set(RT_ICON.into(), ResId::Id(2), ResId::Id(0x409), vec![1, 2, 3]);
        table.set(RT_ICON.into(), ResId::Id(1), ResId::Id(0x409), vec![4; 9]);
        table.set(
            ResId::name("CUSTOM"),
            ResId::name("ENTRY"),
            ResId::Id(0),
            vec![5, 6],
        );
        table.set(RT_GROUP_ICON.into(), ResId::Id(1), ResId::Id(0x409), vec![7]);
        table
    }

    #[test]
    fn round_trips_through_parse() {
        let table = sample_table();
        let (buf, _) = build(&table);
        let reparsed = parse(&buf, 0).unwrap();
        for (ty, name, lang, data) in table.iter_leaves() {
            let found = reparsed.get(ty, Some(name), Some(lang)).unwrap();
            assert_eq!(found.data, data.data, "payload for {ty}/{name}/{lang}");
        }
        assert_eq!(reparsed.leaf_count(), table.leaf_count());
    }

    #[test]
    fn patched_buffer_parses_at_virtual_base() {
        let table = sample_table();
        let (mut buf, patches) = build(&table);
        let base = 0xa000u32;
        for offset in patches {
            let rva = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) + base;
            buf[offset..offset + 4].copy_from_slice(&rva.to_le_bytes());
        }
        let reparsed = parse(&buf, base).unwrap();
        assert_eq!(reparsed.leaf_count(), table.leaf_count());
    }

    #[test]
    fn emits_canonical_key_order() {
        let (buf, _) = build(&sample_table());
        let reparsed = parse(&buf, 0).unwrap();
        let order: Vec<String> = reparsed.type_ids().map(ToString::to_string).collect();
        // ids ascending first, then names by code units
        assert_eq!(order, vec!["#3", "#14", "CUSTOM"]);
    }

    #[test]
    fn partitions_entry_counts() {
        let (buf, _) = build(&sample_table());
        // root header: name count at offset 12, id count at offset 14
        assert_eq!(u16::from_le_bytes([buf[12], buf[13]]), 1);
        assert_eq!(u16::from_le_bytes([buf[14], buf[15]]), 2);
    }

    #[test]
    fn regions_are_aligned() {
        let (buf, patches) = build(&sample_table());
        assert_eq!(buf.len() % 16, 0);
        for offset in patches {
            // every patch site is a data-entry record start, 16-byte spaced
            assert_eq!(offset % 16, 0);
        }
    }

    #[test]
    fn empty_tree_is_one_padded_header() {
        let (buf, patches) = build(&ResTable::new());
        assert_eq!(buf.len(), 16);
        assert!(patches.is_empty());
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn preserves_parsed_directory_headers() {
        let table = sample_table();
        let (buf, _) = build(&table);
        let mut reparsed = parse(&buf, 0).unwrap();
        // stamp the root header and round-trip again
        reparsed.header.as_mut().unwrap().timestamp = 0x5150_1234;
        let (buf2, _) = build(&reparsed);
        assert_eq!(
            u32::from_le_bytes(buf2[4..8].try_into().unwrap()),
            0x5150_1234
        );
        let again = parse(&buf2, 0).unwrap();
        assert_eq!(again.header.unwrap().timestamp, 0x5150_1234);
    }
}
