// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Logical-partition ("super") metadata. The on-disk structures count
//! in 512-byte sectors no matter what the device uses; translating to
//! device sectors is this module's job.

use crate::fs::{FsError, ReadAt, le_u32, le_u64};
use crate::ParseError;

const LP_GEOMETRY_OFFSET: u64 = 4096;
const LP_GEOMETRY_SIZE: usize = 4096;
/// "gDla"
const LP_GEOMETRY_MAGIC: u32 = 0x616c4467;

/// Primary header magic, plus the vendor variant ("0PLA") seen on some
/// heavily customized builds.
const LP_HEADER_MAGICS: [u32; 2] = [0x41680530, 0x414c5030];

/// Where a header may start, depending on geometry sector size and
/// build age. First match wins.
const LP_HEADER_OFFSETS: [u64; 4] = [8192, 12288, 4096, 16384];

const LP_TABLES_SIZE_MAX: u32 = 256 * 1024;
const LP_METADATA_MAX: usize = 1024 * 1024;

/// Descriptor block: (offset, count, entry size) for the partition,
/// extent and group sub-tables, at a fixed spot inside the header.
const LP_TABLE_DESCRIPTORS_OFFSET: usize = 0x50;

const LP_PARTITION_NAME_LEN: usize = 36;
const LP_PARTITION_ENTRY_MIN: u32 = 52;
const LP_EXTENT_ENTRY_MIN: u32 = 24;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LpPartition {
    pub name: String,
    pub attrs: u32,
    /// Offset inside super, in the metadata's native 512-byte units.
    pub relative_sector_512: u64,
    /// Offset from the start of the disk, in device sectors.
    pub absolute_sector: u64,
    /// Length in device sectors.
    pub size_sectors: u64,
    pub size_bytes: u64,
}

struct TableDescriptor {
    offset: u32,
    num_entries: u32,
    entry_size: u32,
}

fn descriptor(header: &[u8], at: usize) -> Result<TableDescriptor, ParseError> {
    if header.len() < at + 12 {
        return Err(ParseError::Truncated { what: "LP header" });
    }
    Ok(TableDescriptor {
        offset: le_u32(header, at),
        num_entries: le_u32(header, at + 4),
        entry_size: le_u32(header, at + 8),
    })
}

fn exact(buf: Vec<u8>, len: usize, what: &'static str) -> Result<Vec<u8>, ParseError> {
    if buf.len() < len {
        return Err(ParseError::Truncated { what });
    }
    Ok(buf)
}

/// Translate a 512-unit sector count/offset into device sectors.
pub fn lp_sectors_to_device(sectors_512: u64, device_sector_size: u32) -> u64 {
    sectors_512 * 512 / device_sector_size as u64
}

/// Parse the LP metadata of a super partition exposed through `reader`
/// (rooted at super's byte 0).
///
/// Any structural problem yields an error and no partial catalog.
pub fn parse_lp_metadata<R: ReadAt + ?Sized>(
    reader: &mut R,
    super_start_sector: u64,
    device_sector_size: u32,
) -> Result<Vec<LpPartition>, FsError> {
    let geometry = exact(
        reader.read_at(LP_GEOMETRY_OFFSET, LP_GEOMETRY_SIZE)?,
        52,
        "LP geometry",
    )?;
    let geo_magic = le_u32(&geometry, 0);
    if geo_magic != LP_GEOMETRY_MAGIC {
        return Err(ParseError::BadMagic {
            what: "LP geometry",
            got: geo_magic as u64,
        }
        .into());
    }
    let metadata_max_size = le_u32(&geometry, 40);
    let _metadata_slot_count = le_u32(&geometry, 44);
    if metadata_max_size == 0 {
        return Err(ParseError::Unsupported("zero metadata_max_size".into()).into());
    }

    // Hunt for the header; its offset moves with the geometry block
    // size and the build age.
    let mut found: Option<(u64, Vec<u8>)> = None;
    for off in LP_HEADER_OFFSETS {
        let probe = reader.read_at(off, 4096)?;
        if probe.len() >= 0x50 + 36 && LP_HEADER_MAGICS.contains(&le_u32(&probe, 0)) {
            found = Some((off, probe));
            break;
        }
    }
    let Some((header_off, probe)) = found else {
        return Err(ParseError::BadMagic {
            what: "LP header",
            got: le_u32(&probe_first(reader)?, 0) as u64,
        }
        .into());
    };

    let header_size = le_u32(&probe, 8);
    if !(128..=4096).contains(&header_size) {
        return Err(ParseError::Unsupported(format!(
            "implausible LP header size {header_size}"
        ))
        .into());
    }

    // Two words have carried tables_size across schema generations;
    // prefer the newer one and only fall back when it is implausible.
    let mut tables_size = le_u32(&probe, 16);
    if tables_size == 0 || tables_size > LP_TABLES_SIZE_MAX {
        tables_size = le_u32(&probe, 24);
    }
    if tables_size == 0 || tables_size > LP_TABLES_SIZE_MAX {
        return Err(ParseError::Unsupported(format!(
            "implausible LP tables size {tables_size}"
        ))
        .into());
    }

    let total = ((header_size + tables_size) as usize).min(LP_METADATA_MAX);
    let meta = exact(reader.read_at(header_off, total)?, total, "LP metadata")?;
    let header = &meta[..header_size as usize];
    let tables = &meta[header_size as usize..];

    let parts_desc = descriptor(header, LP_TABLE_DESCRIPTORS_OFFSET)?;
    let extents_desc = descriptor(header, LP_TABLE_DESCRIPTORS_OFFSET + 12)?;

    if parts_desc.entry_size < LP_PARTITION_ENTRY_MIN
        || extents_desc.entry_size < LP_EXTENT_ENTRY_MIN
    {
        return Err(ParseError::Unsupported("LP entry size mismatch".into()).into());
    }

    // Extents first: (num_sectors_512, target_data_512) pairs.
    let mut extents = Vec::with_capacity(extents_desc.num_entries as usize);
    for i in 0..extents_desc.num_entries {
        let e = table_entry(tables, &extents_desc, i)?;
        extents.push((le_u64(e, 0), le_u64(e, 12)));
    }

    let mut catalog = Vec::with_capacity(parts_desc.num_entries as usize);
    for i in 0..parts_desc.num_entries {
        let p = table_entry(tables, &parts_desc, i)?;

        let name_raw = &p[..LP_PARTITION_NAME_LEN];
        let name_end = name_raw.iter().position(|b| *b == 0).unwrap_or(name_raw.len());
        let name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();

        let attrs = le_u32(p, 36);
        let first_extent = le_u32(p, 40) as usize;
        let num_extents = le_u32(p, 44) as usize;

        let (relative_512, total_512) = if num_extents > 0 {
            let slice = extents
                .get(first_extent..first_extent + num_extents)
                .ok_or(ParseError::Truncated {
                    what: "LP extent table",
                })?;
            let total: u64 = slice.iter().map(|(n, _)| n).sum();
            (slice[0].1, total)
        } else {
            (0, 0)
        };

        catalog.push(LpPartition {
            name,
            attrs,
            relative_sector_512: relative_512,
            absolute_sector: super_start_sector
                + lp_sectors_to_device(relative_512, device_sector_size),
            size_sectors: lp_sectors_to_device(total_512, device_sector_size),
            size_bytes: total_512 * 512,
        });
    }

    Ok(catalog)
}

fn table_entry<'t>(
    tables: &'t [u8],
    d: &TableDescriptor,
    idx: u32,
) -> Result<&'t [u8], ParseError> {
    let start = d.offset as usize + (idx * d.entry_size) as usize;
    let end = start + d.entry_size as usize;
    tables.get(start..end).ok_or(ParseError::Truncated { what: "LP tables" })
}

fn probe_first<R: ReadAt + ?Sized>(reader: &mut R) -> Result<Vec<u8>, FsError> {
    exact(reader.read_at(LP_HEADER_OFFSETS[0], 4)?, 4, "LP header").map_err(Into::into)
}

#[cfg(test)]
pub(crate) mod testimg {
    use super::*;

    pub(crate) struct LpSpec<'a> {
        pub name: &'a str,
        pub relative_512: u64,
        pub num_sectors_512: u64,
    }

    /// Assemble a minimal super image: geometry at +4096, header at
    /// `header_off`, tables right after the header.
    pub(crate) fn build_super(
        header_off: u64,
        header_magic: u32,
        tables_size_at_24: bool,
        parts: &[LpSpec],
    ) -> Vec<u8> {
        let header_size: u32 = 256;
        let extents_off: u32 = 0;
        let parts_off: u32 = extents_off + (parts.len() as u32 * 24);
        let tables_size: u32 = parts_off + parts.len() as u32 * 52;

        let mut img = vec![0u8; (header_off as usize) + 256 + tables_size as usize + 4096];

        // Geometry.
        img[4096..4100].copy_from_slice(&LP_GEOMETRY_MAGIC.to_le_bytes());
        img[4096 + 40..4096 + 44].copy_from_slice(&65536u32.to_le_bytes());
        img[4096 + 44..4096 + 48].copy_from_slice(&2u32.to_le_bytes());

        // Header.
        let h = header_off as usize;
        img[h..h + 4].copy_from_slice(&header_magic.to_le_bytes());
        img[h + 8..h + 12].copy_from_slice(&header_size.to_le_bytes());
        if tables_size_at_24 {
            // Poison the preferred word with something implausible.
            img[h + 16..h + 20].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
            img[h + 24..h + 28].copy_from_slice(&tables_size.to_le_bytes());
        } else {
            img[h + 16..h + 20].copy_from_slice(&tables_size.to_le_bytes());
        }

        let d = h + LP_TABLE_DESCRIPTORS_OFFSET;
        // Partitions descriptor.
        img[d..d + 4].copy_from_slice(&parts_off.to_le_bytes());
        img[d + 4..d + 8].copy_from_slice(&(parts.len() as u32).to_le_bytes());
        img[d + 8..d + 12].copy_from_slice(&52u32.to_le_bytes());
        // Extents descriptor.
        img[d + 12..d + 16].copy_from_slice(&extents_off.to_le_bytes());
        img[d + 16..d + 20].copy_from_slice(&(parts.len() as u32).to_le_bytes());
        img[d + 20..d + 24].copy_from_slice(&24u32.to_le_bytes());

        let tables = h + header_size as usize;
        for (i, p) in parts.iter().enumerate() {
            // One extent per partition.
            let e = tables + extents_off as usize + i * 24;
            img[e..e + 8].copy_from_slice(&p.num_sectors_512.to_le_bytes());
            img[e + 12..e + 20].copy_from_slice(&p.relative_512.to_le_bytes());

            let pe = tables + parts_off as usize + i * 52;
            img[pe..pe + p.name.len()].copy_from_slice(p.name.as_bytes());
            img[pe + 40..pe + 44].copy_from_slice(&(i as u32).to_le_bytes());
            img[pe + 44..pe + 48].copy_from_slice(&1u32.to_le_bytes());
        }

        img
    }
}

#[cfg(test)]
mod tests {
    use super::testimg::{LpSpec, build_super};
    use super::*;

    #[test]
    fn translation_under_4k_sectors() {
        let img = build_super(
            8192,
            LP_HEADER_MAGICS[0],
            false,
            &[LpSpec {
                name: "system_a",
                relative_512: 2048,
                num_sectors_512: 8192,
            }],
        );

        let mut r: &[u8] = &img;
        let parts = parse_lp_metadata(&mut r, 1280, 4096).unwrap();
        assert_eq!(parts.len(), 1);
        let p = &parts[0];
        assert_eq!(p.name, "system_a");
        assert_eq!(p.relative_sector_512, 2048);
        // 1280 + 2048 * 512 / 4096 = 1280 + 256
        assert_eq!(p.absolute_sector, 1536);
        assert_eq!(p.size_sectors, 1024);
        assert_eq!(p.size_bytes, 8192 * 512);
    }

    #[test]
    fn translation_invariant_holds_for_512_and_4096() {
        for (rel, start) in [(0u64, 0u64), (2048, 1280), (7, 99), (123456, 4096)] {
            for dss in [512u32, 4096] {
                // Only translate when the division is exact, like on
                // real devices where everything is 4k-aligned anyway.
                if (rel * 512) % dss as u64 != 0 {
                    continue;
                }
                let absolute = start + lp_sectors_to_device(rel, dss);
                assert_eq!(absolute * dss as u64, start * dss as u64 + rel * 512);
            }
        }
    }

    #[test]
    fn vendor_magic_and_alternate_offset_are_accepted() {
        let img = build_super(
            12288,
            LP_HEADER_MAGICS[1],
            false,
            &[LpSpec {
                name: "vendor_b",
                relative_512: 4096,
                num_sectors_512: 2048,
            }],
        );

        let mut r: &[u8] = &img;
        let parts = parse_lp_metadata(&mut r, 0, 512).unwrap();
        assert_eq!(parts[0].name, "vendor_b");
        assert_eq!(parts[0].absolute_sector, 4096);
    }

    #[test]
    fn implausible_tables_size_falls_back_to_legacy_word() {
        let img = build_super(
            8192,
            LP_HEADER_MAGICS[0],
            true,
            &[LpSpec {
                name: "odm_a",
                relative_512: 512,
                num_sectors_512: 512,
            }],
        );

        let mut r: &[u8] = &img;
        let parts = parse_lp_metadata(&mut r, 0, 512).unwrap();
        assert_eq!(parts[0].name, "odm_a");
        assert_eq!(parts[0].absolute_sector, 512);
    }

    #[test]
    fn bad_geometry_magic_yields_no_partial_catalog() {
        let img = vec![0u8; 64 * 1024];
        let mut r: &[u8] = &img;
        match parse_lp_metadata(&mut r, 0, 4096) {
            Err(FsError::Parse(ParseError::BadMagic { what, .. })) => {
                assert_eq!(what, "LP geometry")
            }
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }
}
