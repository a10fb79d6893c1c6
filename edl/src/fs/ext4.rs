// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Minimal read-only EXT4 walk: superblock, group descriptors, linear
//! directories and extent trees. Just enough to pull one small file off
//! a live partition.

use crate::fs::{FsError, MAX_FILE_SIZE, ReadAt, le_u16, le_u32};
use crate::ParseError;

const SB_OFFSET: u64 = 1024;
const SB_MAGIC: u16 = 0xef53;

const INCOMPAT_EXTENTS: u32 = 0x40;
const INCOMPAT_64BIT: u32 = 0x80;

const EXTENTS_FL: u32 = 0x0008_0000;
const EXTENT_MAGIC: u16 = 0xf30a;
const EXTENT_MAX_DEPTH: u16 = 5;

const ROOT_INO: u64 = 2;
const S_IFMT: u16 = 0xf000;
const S_IFDIR: u16 = 0x4000;
const S_IFREG: u16 = 0x8000;

/// Directory payloads stay bounded even on big system partitions.
const MAX_DIR_SIZE: usize = 256 * 1024;

struct Superblock {
    block_size: u64,
    first_data_block: u64,
    inodes_per_group: u64,
    inode_size: u64,
    desc_size: u64,
    has_64bit: bool,
}

struct Inode {
    mode: u16,
    size: u64,
    flags: u32,
    block: [u8; 60],
}

fn parse_superblock<R: ReadAt + ?Sized>(reader: &mut R) -> Result<Superblock, FsError> {
    let sb = reader.read_at(SB_OFFSET, 1024)?;
    if sb.len() < 0x100 {
        return Err(ParseError::Truncated { what: "ext4 superblock" }.into());
    }
    let magic = le_u16(&sb, 0x38);
    if magic != SB_MAGIC {
        return Err(ParseError::BadMagic {
            what: "ext4 superblock",
            got: magic as u64,
        }
        .into());
    }

    let log_block_size = le_u32(&sb, 24);
    if log_block_size > 6 {
        return Err(ParseError::Unsupported(format!(
            "ext4 block size 2^{}",
            10 + log_block_size
        ))
        .into());
    }
    let features_incompat = le_u32(&sb, 96);
    let has_64bit = features_incompat & INCOMPAT_64BIT != 0;

    let inode_size = match le_u16(&sb, 88) {
        0 => 128,
        n => n as u64,
    };
    let desc_size = if has_64bit {
        (le_u16(&sb, 254) as u64).max(32)
    } else {
        32
    };

    Ok(Superblock {
        block_size: 1024u64 << log_block_size,
        first_data_block: le_u32(&sb, 20) as u64,
        inodes_per_group: le_u32(&sb, 40) as u64,
        inode_size,
        desc_size,
        has_64bit,
    })
}

fn read_inode<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    ino: u64,
) -> Result<Option<Inode>, FsError> {
    if ino == 0 || sb.inodes_per_group == 0 {
        return Ok(None);
    }
    let group = (ino - 1) / sb.inodes_per_group;
    let index = (ino - 1) % sb.inodes_per_group;

    // Group descriptor for the inode's group.
    let gdt_block = sb.first_data_block + 1;
    let desc_off = gdt_block * sb.block_size + group * sb.desc_size;
    let desc = reader.read_at(desc_off, sb.desc_size as usize)?;
    if desc.len() < 32 {
        return Ok(None);
    }
    let mut inode_table = le_u32(&desc, 8) as u64;
    if sb.has_64bit && desc.len() >= 44 {
        inode_table |= (le_u32(&desc, 40) as u64) << 32;
    }

    let off = inode_table * sb.block_size + index * sb.inode_size;
    let raw = reader.read_at(off, sb.inode_size as usize)?;
    if raw.len() < 128 {
        return Ok(None);
    }

    let mut block = [0u8; 60];
    block.copy_from_slice(&raw[40..100]);
    Ok(Some(Inode {
        mode: le_u16(&raw, 0),
        size: le_u32(&raw, 4) as u64 | ((le_u32(&raw, 108) as u64) << 32),
        flags: le_u32(&raw, 32),
        block,
    }))
}

/// A resolved mapping: `count` blocks of file data starting at logical
/// block `logical`, stored at physical block `physical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Extent {
    pub logical: u64,
    pub physical: u64,
    pub count: u64,
}

/// Parse one extent-tree node. Depth 0 is a leaf; anything deeper holds
/// index entries pointing at child blocks.
pub(crate) fn parse_extent_node(node: &[u8]) -> Option<(u16, Vec<(u64, u64, u64)>)> {
    if node.len() < 12 || le_u16(node, 0) != EXTENT_MAGIC {
        return None;
    }
    let entries = le_u16(node, 2) as usize;
    let depth = le_u16(node, 6);
    if node.len() < 12 + entries * 12 {
        return None;
    }

    let mut out = Vec::with_capacity(entries);
    for i in 0..entries {
        let e = &node[12 + i * 12..12 + (i + 1) * 12];
        if depth == 0 {
            let len = le_u16(e, 4);
            // MSB marks an uninitialized extent: allocated, never
            // written, reads as zeros.
            if len & 0x8000 != 0 {
                continue;
            }
            let physical = ((le_u16(e, 6) as u64) << 32) | le_u32(e, 8) as u64;
            out.push((le_u32(e, 0) as u64, physical, len as u64));
        } else {
            let child = le_u32(e, 4) as u64 | ((le_u16(e, 8) as u64) << 32);
            out.push((le_u32(e, 0) as u64, child, 0));
        }
    }
    Some((depth, out))
}

fn collect_extents<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    node: &[u8],
    depth_budget: u16,
    out: &mut Vec<Extent>,
) -> Result<bool, FsError> {
    let Some((depth, entries)) = parse_extent_node(node) else {
        return Ok(false);
    };
    if depth > depth_budget {
        return Ok(false);
    }

    for (logical, ptr, count) in entries {
        if depth == 0 {
            out.push(Extent {
                logical,
                physical: ptr,
                count,
            });
        } else {
            let child = reader.read_at(ptr * sb.block_size, sb.block_size as usize)?;
            if !collect_extents(reader, sb, &child, depth - 1, out)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Read up to `cap` bytes of an inode's data. Holes read as zeros.
fn read_inode_data<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    inode: &Inode,
    cap: usize,
) -> Result<Option<Vec<u8>>, FsError> {
    let want = (inode.size as usize).min(cap);
    let mut out = vec![0u8; want];

    let mut extents = Vec::new();
    if inode.flags & EXTENTS_FL != 0 {
        if !collect_extents(reader, sb, &inode.block, EXTENT_MAX_DEPTH, &mut extents)? {
            return Ok(None);
        }
    } else {
        // Legacy layout: the twelve direct pointers cover everything a
        // build.prop-sized read needs.
        for i in 0..12u64 {
            let phys = le_u32(&inode.block, (i * 4) as usize) as u64;
            if phys != 0 {
                extents.push(Extent {
                    logical: i,
                    physical: phys,
                    count: 1,
                });
            }
        }
    }

    for e in extents {
        let from = e.logical * sb.block_size;
        if from >= want as u64 {
            continue;
        }
        let len = (e.count * sb.block_size).min(want as u64 - from) as usize;
        let data = reader.read_at(e.physical * sb.block_size, len)?;
        let got = data.len().min(len);
        out[from as usize..from as usize + got].copy_from_slice(&data[..got]);
    }

    Ok(Some(out))
}

/// Scan linear directory entries for `name`; returns the inode number.
fn lookup_dir_entry(data: &[u8], name: &str) -> Option<u64> {
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let ino = le_u32(data, pos);
        let rec_len = le_u16(data, pos + 4) as usize;
        let name_len = data[pos + 6] as usize;
        if rec_len < 8 || pos + rec_len > data.len() {
            return None;
        }
        if ino != 0 && pos + 8 + name_len <= data.len() {
            let entry_name = &data[pos + 8..pos + 8 + name_len];
            if entry_name == name.as_bytes() {
                return Some(ino as u64);
            }
        }
        pos += rec_len;
    }
    None
}

fn resolve_path<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    path: &str,
) -> Result<Option<Vec<u8>>, FsError> {
    let mut ino = ROOT_INO;

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    for (i, comp) in components.iter().enumerate() {
        let Some(inode) = read_inode(reader, sb, ino)? else {
            return Ok(None);
        };
        let last = i == components.len() - 1;

        if inode.mode & S_IFMT != S_IFDIR {
            return Ok(None);
        }
        let Some(dir_data) = read_inode_data(reader, sb, &inode, MAX_DIR_SIZE)? else {
            return Ok(None);
        };
        let Some(next) = lookup_dir_entry(&dir_data, comp) else {
            return Ok(None);
        };

        if last {
            let Some(file) = read_inode(reader, sb, next)? else {
                return Ok(None);
            };
            if file.mode & S_IFMT != S_IFREG {
                return Ok(None);
            }
            return read_inode_data(reader, sb, &file, MAX_FILE_SIZE);
        }
        ino = next;
    }
    Ok(None)
}

/// Try each path in order; first hit wins. Superblock-level breakage is
/// a parse error, per-path misses are just `None`.
pub fn find_file_by_paths<R: ReadAt + ?Sized>(
    reader: &mut R,
    paths: &[&str],
) -> Result<Option<Vec<u8>>, FsError> {
    let sb = parse_superblock(reader)?;
    for path in paths {
        if let Some(data) = resolve_path(reader, &sb, path)? {
            return Ok(Some(data));
        }
    }
    Ok(None)
}

#[cfg(test)]
pub(crate) mod testimg {
    use super::*;

    pub(crate) const BLOCK: usize = 1024;

    /// Hand-rolled single-group ext4 image, 1 KiB blocks:
    /// block 1 superblock, block 2 GDT, block 5 inode table,
    /// directory/file data in the teens.
    pub(crate) struct Ext4Builder {
        pub img: Vec<u8>,
        extents: bool,
    }

    impl Ext4Builder {
        pub(crate) fn new(extents: bool) -> Self {
            let mut img = vec![0u8; BLOCK * 64];

            // Superblock.
            let sb = BLOCK;
            img[sb + 20..sb + 24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
            img[sb + 24..sb + 28].copy_from_slice(&0u32.to_le_bytes()); // log_block_size
            img[sb + 40..sb + 44].copy_from_slice(&16u32.to_le_bytes()); // inodes_per_group
            img[sb + 0x38..sb + 0x3a].copy_from_slice(&SB_MAGIC.to_le_bytes());
            img[sb + 88..sb + 90].copy_from_slice(&128u16.to_le_bytes()); // inode_size
            let incompat: u32 = if extents { INCOMPAT_EXTENTS } else { 0 };
            img[sb + 96..sb + 100].copy_from_slice(&incompat.to_le_bytes());

            // Group descriptor 0: inode table at block 5.
            let gd = 2 * BLOCK;
            img[gd + 8..gd + 12].copy_from_slice(&5u32.to_le_bytes());

            Self { img, extents }
        }

        fn inode_at(&mut self, ino: u64) -> usize {
            5 * BLOCK + ((ino - 1) as usize) * 128
        }

        pub(crate) fn put_dir(&mut self, ino: u64, data_block: u32, entries: &[(&str, u64)]) {
            let at = self.inode_at(ino);
            self.img[at..at + 2].copy_from_slice(&(S_IFDIR | 0o755).to_le_bytes());
            self.img[at + 4..at + 8].copy_from_slice(&(BLOCK as u32).to_le_bytes());
            self.img[at + 40..at + 44].copy_from_slice(&data_block.to_le_bytes());

            // Linear dirents, last one padded to the block end.
            let mut pos = data_block as usize * BLOCK;
            let end = pos + BLOCK;
            for (i, (name, target)) in entries.iter().enumerate() {
                let name_bytes = name.as_bytes();
                let rec_len = if i == entries.len() - 1 {
                    end - pos
                } else {
                    (8 + name_bytes.len() + 3) & !3
                };
                self.img[pos..pos + 4].copy_from_slice(&(*target as u32).to_le_bytes());
                self.img[pos + 4..pos + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
                self.img[pos + 6] = name_bytes.len() as u8;
                self.img[pos + 7] = 2;
                self.img[pos + 8..pos + 8 + name_bytes.len()].copy_from_slice(name_bytes);
                pos += rec_len;
            }
        }

        pub(crate) fn put_file(&mut self, ino: u64, data_block: u32, content: &[u8]) {
            let at = self.inode_at(ino);
            self.img[at..at + 2].copy_from_slice(&(S_IFREG | 0o644).to_le_bytes());
            self.img[at + 4..at + 8].copy_from_slice(&(content.len() as u32).to_le_bytes());

            let blocks = content.len().div_ceil(BLOCK).max(1) as u16;
            if self.extents {
                self.img[at + 32..at + 36].copy_from_slice(&EXTENTS_FL.to_le_bytes());
                let e = at + 40;
                self.img[e..e + 2].copy_from_slice(&EXTENT_MAGIC.to_le_bytes());
                self.img[e + 2..e + 4].copy_from_slice(&1u16.to_le_bytes()); // entries
                self.img[e + 4..e + 6].copy_from_slice(&4u16.to_le_bytes()); // max
                self.img[e + 6..e + 8].copy_from_slice(&0u16.to_le_bytes()); // depth
                let ent = e + 12;
                self.img[ent..ent + 4].copy_from_slice(&0u32.to_le_bytes()); // logical
                self.img[ent + 4..ent + 6].copy_from_slice(&blocks.to_le_bytes());
                self.img[ent + 6..ent + 8].copy_from_slice(&0u16.to_le_bytes());
                self.img[ent + 8..ent + 12].copy_from_slice(&data_block.to_le_bytes());
            } else {
                for b in 0..blocks as usize {
                    let p = at + 40 + b * 4;
                    self.img[p..p + 4].copy_from_slice(&(data_block + b as u32).to_le_bytes());
                }
            }

            let dst = data_block as usize * BLOCK;
            self.img[dst..dst + content.len()].copy_from_slice(content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testimg::{self, Ext4Builder};
    use super::*;

    const PROPS: &[u8] = b"ro.product.brand=acme\nro.product.model=AC-1\n";

    #[test]
    fn walks_root_build_prop_with_extents() {
        let mut b = Ext4Builder::new(true);
        b.put_dir(2, 10, &[(".", 2), ("..", 2), ("build.prop", 12)]);
        b.put_file(12, 20, PROPS);

        let mut r: &[u8] = &b.img;
        let found = find_file_by_paths(&mut r, &["build.prop"]).unwrap();
        assert_eq!(found.as_deref(), Some(PROPS));
    }

    #[test]
    fn walks_nested_path_with_legacy_blocks() {
        let mut b = Ext4Builder::new(false);
        b.put_dir(2, 10, &[(".", 2), ("..", 2), ("system", 5)]);
        b.put_dir(5, 11, &[(".", 5), ("..", 2), ("build.prop", 12)]);
        b.put_file(12, 20, PROPS);

        let mut r: &[u8] = &b.img;
        let found =
            find_file_by_paths(&mut r, &["build.prop", "system/build.prop"]).unwrap();
        assert_eq!(found.as_deref(), Some(PROPS));
    }

    #[test]
    fn missing_file_is_none_not_an_error() {
        let mut b = Ext4Builder::new(true);
        b.put_dir(2, 10, &[(".", 2), ("..", 2)]);

        let mut r: &[u8] = &b.img;
        assert!(find_file_by_paths(&mut r, &["build.prop"]).unwrap().is_none());
    }

    #[test]
    fn wrong_magic_is_a_parse_error() {
        let img = vec![0u8; 4096];
        let mut r: &[u8] = &img;
        assert!(matches!(
            find_file_by_paths(&mut r, &["build.prop"]),
            Err(FsError::Parse(ParseError::BadMagic { .. }))
        ));
    }

    #[test]
    fn extent_leaf_length_sum_skips_uninitialized() {
        // Leaf with three extents, the middle one uninitialized.
        let mut node = vec![0u8; 12 + 3 * 12];
        node[0..2].copy_from_slice(&EXTENT_MAGIC.to_le_bytes());
        node[2..4].copy_from_slice(&3u16.to_le_bytes());
        node[6..8].copy_from_slice(&0u16.to_le_bytes());

        let specs: [(u32, u16, u32); 3] = [(0, 4, 100), (4, 0x8000 | 2, 200), (6, 3, 300)];
        for (i, (logical, len, phys)) in specs.iter().enumerate() {
            let e = 12 + i * 12;
            node[e..e + 4].copy_from_slice(&logical.to_le_bytes());
            node[e + 4..e + 6].copy_from_slice(&len.to_le_bytes());
            node[e + 8..e + 12].copy_from_slice(&phys.to_le_bytes());
        }

        let (depth, entries) = parse_extent_node(&node).unwrap();
        assert_eq!(depth, 0);
        let mapped: u64 = entries.iter().map(|(_, _, count)| count).sum();
        assert_eq!(mapped, 4 + 3);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn file_larger_than_cap_is_truncated_to_cap() {
        let mut b = Ext4Builder::new(true);
        b.put_dir(2, 10, &[(".", 2), ("..", 2), ("build.prop", 12)]);
        // Lie about the size; the reader caps at MAX_FILE_SIZE.
        let big = vec![0x61u8; 3 * testimg::BLOCK];
        b.put_file(12, 20, &big);
        let at = 5 * testimg::BLOCK + 11 * 128;
        b.img[at + 4..at + 8].copy_from_slice(&(10u32 * 1024 * 1024).to_le_bytes());

        let mut r: &[u8] = &b.img;
        let found = find_file_by_paths(&mut r, &["build.prop"]).unwrap().unwrap();
        assert_eq!(found.len(), MAX_FILE_SIZE);
    }
}
