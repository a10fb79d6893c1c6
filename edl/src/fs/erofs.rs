// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Read-only EROFS walk (v1/v2 images): superblock, compact/extended
//! inodes, the three data layouts that show up on system partitions,
//! and LZ4 block decompression with the framing variants seen in the
//! wild.

use lz4_flex::block::decompress;

use crate::fs::{FsError, MAX_FILE_SIZE, ReadAt, le_u16, le_u32, le_u64};
use crate::ParseError;

const SB_OFFSET: u64 = 1024;
/// First four bytes on disk: E2 E1 F5 E0.
const SB_MAGIC: u32 = 0xe0f5e1e2;

const LAYOUT_FLAT_PLAIN: u8 = 0;
const LAYOUT_COMPRESSED_LEGACY: u8 = 1;
const LAYOUT_FLAT_INLINE: u8 = 2;
const LAYOUT_COMPRESSED_COMPACT: u8 = 3;

const DIRENT_SIZE: usize = 12;

const S_IFMT: u16 = 0xf000;
const S_IFDIR: u16 = 0x4000;
const S_IFREG: u16 = 0x8000;

struct Superblock {
    block_size: u64,
    root_nid: u64,
    meta_blkaddr: u64,
}

struct Inode {
    mode: u16,
    size: u64,
    data_layout: u8,
    raw_blkaddr: u64,
    /// Absolute byte offset where inline tail data starts.
    inline_offset: u64,
}

fn parse_superblock<R: ReadAt + ?Sized>(reader: &mut R) -> Result<Superblock, FsError> {
    let sb = reader.read_at(SB_OFFSET, 128)?;
    if sb.len() < 64 {
        return Err(ParseError::Truncated { what: "erofs superblock" }.into());
    }
    let magic = le_u32(&sb, 0);
    if magic != SB_MAGIC {
        return Err(ParseError::BadMagic {
            what: "erofs superblock",
            got: magic as u64,
        }
        .into());
    }

    let blkszbits = sb[12];
    if !(9..=16).contains(&blkszbits) {
        return Err(ParseError::Unsupported(format!("erofs block bits {blkszbits}")).into());
    }

    Ok(Superblock {
        block_size: 1u64 << blkszbits,
        root_nid: le_u16(&sb, 14) as u64,
        meta_blkaddr: le_u32(&sb, 40) as u64,
    })
}

fn read_inode<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    nid: u64,
) -> Result<Option<Inode>, FsError> {
    let at = sb.meta_blkaddr * sb.block_size + nid * 32;
    let raw = reader.read_at(at, 64)?;
    if raw.len() < 32 {
        return Ok(None);
    }

    let format = le_u16(&raw, 0);
    let extended = format & 1 != 0;
    let data_layout = ((format >> 1) & 0x7) as u8;
    let xattr_icount = le_u16(&raw, 2) as u64;
    let xattr_size = if xattr_icount == 0 {
        0
    } else {
        12 + (xattr_icount - 1) * 4
    };

    let (mode, size, raw_blkaddr, inode_size) = if extended {
        if raw.len() < 64 {
            return Ok(None);
        }
        (
            le_u16(&raw, 4),
            le_u64(&raw, 8),
            le_u32(&raw, 16) as u64,
            64u64,
        )
    } else {
        (
            le_u16(&raw, 4),
            le_u32(&raw, 8) as u64,
            le_u32(&raw, 16) as u64,
            32u64,
        )
    };

    Ok(Some(Inode {
        mode,
        size,
        data_layout,
        raw_blkaddr,
        inline_offset: at + inode_size + xattr_size,
    }))
}

/// At least 80% of the leading bytes look like text.
fn looks_textual(data: &[u8]) -> bool {
    let probe = &data[..data.len().min(256)];
    if probe.is_empty() {
        return false;
    }
    let printable = probe
        .iter()
        .filter(|&&b| b.is_ascii_graphic() || matches!(b, b' ' | b'\n' | b'\r' | b'\t'))
        .count();
    printable * 100 >= probe.len() * 80
}

/// A dirent region starts with headers whose first `nameoff` delimits
/// the header area; that gives a cheap validity check.
fn looks_like_dirents(data: &[u8]) -> bool {
    if data.len() < DIRENT_SIZE {
        return false;
    }
    let nameoff = le_u16(data, 8) as usize;
    nameoff >= DIRENT_SIZE && nameoff % DIRENT_SIZE == 0 && nameoff <= data.len()
}

/// Decompress one LZ4 region whose uncompressed size is known, trying
/// the framings observed across EROFS generations: an LZ4 frame, a
/// 4-byte compressed-length header, the bare block, and finally a short
/// scan over small leading offsets for images with undocumented
/// headers. The compressed length is not recorded in the bare-block
/// cases, so the read window is also retried with its zero padding
/// stripped. `validate` arbitrates when a candidate technically
/// decompresses.
fn lz4_decompress_flexible(
    data: &[u8],
    expected_size: usize,
    validate: &dyn Fn(&[u8]) -> bool,
) -> Option<Vec<u8>> {
    let accept = |out: Vec<u8>| -> Option<Vec<u8>> {
        (out.len() == expected_size && validate(&out)).then_some(out)
    };

    // (a) a full LZ4 frame; the decoder stops at its own end mark.
    {
        use std::io::Read as _;
        let mut dec = lz4_flex::frame::FrameDecoder::new(data);
        let mut out = Vec::new();
        if dec
            .by_ref()
            .take(expected_size as u64 + 1)
            .read_to_end(&mut out)
            .is_ok()
        {
            if let Some(out) = accept(out) {
                return Some(out);
            }
        }
    }

    let trimmed_len = data
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |p| p + 1);
    let mut inputs = vec![data];
    if trimmed_len > 0 && trimmed_len < data.len() {
        inputs.push(&data[..trimmed_len]);
    }

    for input in inputs {
        if input.len() < 5 {
            continue;
        }

        // (b) 4-byte header carrying the compressed length.
        let clen = le_u32(input, 0) as usize;
        if clen > 0 && clen <= input.len() - 4 {
            if let Ok(out) = decompress(&input[4..4 + clen], expected_size) {
                if let Some(out) = accept(out) {
                    return Some(out);
                }
            }
        }

        // (c) bare block occupying the whole region.
        if let Ok(out) = decompress(input, expected_size) {
            if let Some(out) = accept(out) {
                return Some(out);
            }
        }

        // (d) bare block behind a small unknown header.
        for skip in 1..32usize.min(input.len()) {
            if let Ok(out) = decompress(&input[skip..], expected_size) {
                if let Some(out) = accept(out) {
                    return Some(out);
                }
            }
        }
    }
    None
}

fn read_inode_data<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    inode: &Inode,
    cap: usize,
) -> Result<Option<Vec<u8>>, FsError> {
    let want = (inode.size as usize).min(cap);
    if want == 0 {
        return Ok(Some(Vec::new()));
    }

    match inode.data_layout {
        LAYOUT_FLAT_PLAIN => {
            let data = reader.read_at(inode.raw_blkaddr * sb.block_size, want)?;
            if data.len() < want {
                return Ok(None);
            }
            Ok(Some(data))
        }
        LAYOUT_FLAT_INLINE => {
            // Full blocks first, the tail right after the inode.
            let full = (inode.size / sb.block_size) * sb.block_size;
            let mut out = Vec::with_capacity(want);
            if full > 0 {
                let head = reader.read_at(inode.raw_blkaddr * sb.block_size, full as usize)?;
                if head.len() < full.min(want as u64) as usize {
                    return Ok(None);
                }
                out.extend_from_slice(&head[..full.min(want as u64) as usize]);
            }
            if out.len() < want {
                let tail_len = want - out.len();
                let tail = reader.read_at(inode.inline_offset, tail_len)?;
                if tail.len() < tail_len {
                    return Ok(None);
                }
                out.extend_from_slice(&tail[..tail_len]);
            }
            Ok(Some(out))
        }
        LAYOUT_COMPRESSED_LEGACY | LAYOUT_COMPRESSED_COMPACT => {
            // Read a generous window of compressed bytes and let the
            // framing ladder figure the rest out.
            let window = (inode.size as usize + 2 * sb.block_size as usize).min(4 * 1024 * 1024);
            let data = reader.read_at(inode.raw_blkaddr * sb.block_size, window)?;
            if data.is_empty() {
                return Ok(None);
            }

            let is_dir = inode.mode & S_IFMT == S_IFDIR;
            let validate: &dyn Fn(&[u8]) -> bool = if is_dir {
                &looks_like_dirents
            } else {
                &looks_textual
            };
            let full = lz4_decompress_flexible(&data, inode.size as usize, validate);
            Ok(full.map(|mut v| {
                v.truncate(want);
                v
            }))
        }
        other => Err(ParseError::Unsupported(format!("erofs data layout {other}")).into()),
    }
}

/// Parse the fixed 12-byte dirent headers of one block-sized region.
/// Name boundaries come from the neighbouring `nameoff`s.
pub(crate) fn parse_dirent_block(block: &[u8]) -> Vec<(u64, u8, String)> {
    let mut out = Vec::new();
    if !looks_like_dirents(block) {
        return out;
    }
    let count = le_u16(block, 8) as usize / DIRENT_SIZE;

    for i in 0..count {
        let at = i * DIRENT_SIZE;
        let nid = le_u64(block, at);
        let nameoff = le_u16(block, at + 8) as usize;
        let file_type = block[at + 10];

        let name_end = if i + 1 < count {
            le_u16(block, (i + 1) * DIRENT_SIZE + 8) as usize
        } else {
            block.len()
        };
        if nameoff > name_end || name_end > block.len() {
            return Vec::new();
        }
        // The final name runs to the block end, padded with NULs.
        let raw = &block[nameoff..name_end];
        let trimmed = match raw.iter().position(|b| *b == 0) {
            Some(p) => &raw[..p],
            None => raw,
        };
        out.push((nid, file_type, String::from_utf8_lossy(trimmed).into_owned()));
    }
    out
}

fn lookup_dir<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    dir: &Inode,
    name: &str,
) -> Result<Option<u64>, FsError> {
    let Some(data) = read_inode_data(reader, sb, dir, MAX_FILE_SIZE * 4)? else {
        return Ok(None);
    };

    for block in data.chunks(sb.block_size as usize) {
        for (nid, _ftype, entry_name) in parse_dirent_block(block) {
            if entry_name == name {
                return Ok(Some(nid));
            }
        }
    }
    Ok(None)
}

fn resolve_path<R: ReadAt + ?Sized>(
    reader: &mut R,
    sb: &Superblock,
    path: &str,
) -> Result<Option<Vec<u8>>, FsError> {
    let mut nid = sb.root_nid;

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    for (i, comp) in components.iter().enumerate() {
        let Some(dir) = read_inode(reader, sb, nid)? else {
            return Ok(None);
        };
        if dir.mode & S_IFMT != S_IFDIR {
            return Ok(None);
        }
        let Some(next) = lookup_dir(reader, sb, &dir, comp)? else {
            return Ok(None);
        };

        if i == components.len() - 1 {
            let Some(file) = read_inode(reader, sb, next)? else {
                return Ok(None);
            };
            if file.mode & S_IFMT != S_IFREG {
                return Ok(None);
            }
            return read_inode_data(reader, sb, &file, MAX_FILE_SIZE);
        }
        nid = next;
    }
    Ok(None)
}

/// Try each path in order; first hit wins.
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

    pub(crate) const BLOCK: usize = 4096;

    /// Synthetic EROFS: superblock at 1024, inode area at block 1,
    /// spare data blocks from block 2 up.
    pub(crate) struct ErofsBuilder {
        pub img: Vec<u8>,
    }

    impl ErofsBuilder {
        pub(crate) fn new() -> Self {
            let mut img = vec![0u8; BLOCK * 16];
            img[1024..1028].copy_from_slice(&SB_MAGIC.to_le_bytes());
            img[1024 + 12] = 12; // 4 KiB blocks
            img[1024 + 14..1024 + 16].copy_from_slice(&1u16.to_le_bytes()); // root nid
            img[1024 + 40..1024 + 44].copy_from_slice(&1u32.to_le_bytes()); // meta_blkaddr
            Self { img }
        }

        fn inode_at(&self, nid: u64) -> usize {
            BLOCK + (nid as usize) * 32
        }

        fn put_inode_compact(
            &mut self,
            nid: u64,
            mode: u16,
            layout: u8,
            size: u32,
            raw_blkaddr: u32,
        ) -> usize {
            let at = self.inode_at(nid);
            let format: u16 = (layout as u16) << 1;
            self.img[at..at + 2].copy_from_slice(&format.to_le_bytes());
            self.img[at + 4..at + 6].copy_from_slice(&mode.to_le_bytes());
            self.img[at + 8..at + 12].copy_from_slice(&size.to_le_bytes());
            self.img[at + 16..at + 20].copy_from_slice(&raw_blkaddr.to_le_bytes());
            at + 32
        }

        pub(crate) fn dirent_region(entries: &[(&str, u64, u8)]) -> Vec<u8> {
            let mut region = vec![0u8; entries.len() * DIRENT_SIZE];
            let mut names = Vec::new();
            let base = entries.len() * DIRENT_SIZE;
            for (i, (name, nid, ftype)) in entries.iter().enumerate() {
                let at = i * DIRENT_SIZE;
                region[at..at + 8].copy_from_slice(&nid.to_le_bytes());
                let nameoff = (base + names.len()) as u16;
                region[at + 8..at + 10].copy_from_slice(&nameoff.to_le_bytes());
                region[at + 10] = *ftype;
                names.extend_from_slice(name.as_bytes());
            }
            region.extend_from_slice(&names);
            region
        }

        /// Inline directory: dirents live right after the inode.
        pub(crate) fn put_dir_inline(&mut self, nid: u64, entries: &[(&str, u64, u8)]) {
            let region = Self::dirent_region(entries);
            let data_at = self.put_inode_compact(
                nid,
                S_IFDIR | 0o755,
                LAYOUT_FLAT_INLINE,
                region.len() as u32,
                0,
            );
            self.img[data_at..data_at + region.len()].copy_from_slice(&region);
        }

        pub(crate) fn put_file_inline(&mut self, nid: u64, content: &[u8]) {
            let data_at = self.put_inode_compact(
                nid,
                S_IFREG | 0o644,
                LAYOUT_FLAT_INLINE,
                content.len() as u32,
                0,
            );
            self.img[data_at..data_at + content.len()].copy_from_slice(content);
        }

        pub(crate) fn put_file_plain(&mut self, nid: u64, block: u32, content: &[u8]) {
            self.put_inode_compact(
                nid,
                S_IFREG | 0o644,
                LAYOUT_FLAT_PLAIN,
                content.len() as u32,
                block,
            );
            let at = block as usize * BLOCK;
            self.img[at..at + content.len()].copy_from_slice(content);
        }

        pub(crate) fn put_file_compressed(
            &mut self,
            nid: u64,
            block: u32,
            content: &[u8],
            junk_prefix: usize,
        ) {
            self.put_inode_compact(
                nid,
                S_IFREG | 0o644,
                LAYOUT_COMPRESSED_LEGACY,
                content.len() as u32,
                block,
            );
            let compressed = lz4_flex::block::compress(content);
            let at = block as usize * BLOCK;
            // Deliberately junk-pad to exercise the framing scan.
            self.img[at..at + junk_prefix].fill(0xfe);
            self.img[at + junk_prefix..at + junk_prefix + compressed.len()]
                .copy_from_slice(&compressed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testimg::{BLOCK, ErofsBuilder};
    use super::*;

    const PROPS: &[u8] =
        b"ro.product.brand=Xiaomi\nro.product.model=23049PCD8G\nro.build.version.release=14\n";

    #[test]
    fn dirent_count_tracks_first_nameoff() {
        let region = ErofsBuilder::dirent_region(&[
            (".", 1, 2),
            ("..", 1, 2),
            ("build.prop", 7, 1),
        ]);
        let parsed = parse_dirent_block(&region);
        assert_eq!(parsed.len(), le_u16(&region, 8) as usize / DIRENT_SIZE);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2].2, "build.prop");
        assert_eq!(parsed[2].0, 7);
        // Every name stays inside the region.
        for (_, _, name) in &parsed {
            assert!(name.len() <= region.len());
        }
    }

    #[test]
    fn inline_file_under_nested_path() {
        let mut b = ErofsBuilder::new();
        b.put_dir_inline(1, &[(".", 1, 2), ("..", 1, 2), ("system", 4, 2)]);
        b.put_dir_inline(4, &[(".", 4, 2), ("..", 1, 2), ("build.prop", 7, 1)]);
        b.put_file_inline(7, PROPS);

        let mut r: &[u8] = &b.img;
        let found = find_file_by_paths(&mut r, &["build.prop", "system/build.prop"]).unwrap();
        assert_eq!(found.as_deref(), Some(PROPS));
    }

    #[test]
    fn plain_layout_reads_from_data_blocks() {
        let mut b = ErofsBuilder::new();
        b.put_dir_inline(1, &[(".", 1, 2), ("..", 1, 2), ("build.prop", 4, 1)]);
        b.put_file_plain(4, 2, PROPS);

        let mut r: &[u8] = &b.img;
        let found = find_file_by_paths(&mut r, &["build.prop"]).unwrap();
        assert_eq!(found.as_deref(), Some(PROPS));
    }

    #[test]
    fn compressed_layout_plain_block() {
        let mut b = ErofsBuilder::new();
        b.put_dir_inline(1, &[(".", 1, 2), ("..", 1, 2), ("build.prop", 4, 1)]);
        b.put_file_compressed(4, 2, PROPS, 0);

        let mut r: &[u8] = &b.img;
        let found = find_file_by_paths(&mut r, &["build.prop"]).unwrap();
        assert_eq!(found.as_deref(), Some(PROPS));
    }

    #[test]
    fn compressed_layout_with_leading_junk() {
        let mut b = ErofsBuilder::new();
        b.put_dir_inline(1, &[(".", 1, 2), ("..", 1, 2), ("build.prop", 4, 1)]);
        b.put_file_compressed(4, 2, PROPS, 8);

        let mut r: &[u8] = &b.img;
        let found = find_file_by_paths(&mut r, &["build.prop"]).unwrap();
        assert_eq!(found.as_deref(), Some(PROPS));
    }

    #[test]
    fn bad_magic_is_a_parse_error() {
        let img = vec![0u8; BLOCK * 2];
        let mut r: &[u8] = &img;
        assert!(matches!(
            find_file_by_paths(&mut r, &["build.prop"]),
            Err(FsError::Parse(ParseError::BadMagic { .. }))
        ));
    }

    #[test]
    fn garbage_compressed_data_is_absent_not_fatal() {
        let mut b = ErofsBuilder::new();
        b.put_dir_inline(1, &[(".", 1, 2), ("..", 1, 2), ("build.prop", 4, 1)]);
        // Compressed inode whose data block holds noise.
        b.put_file_compressed(4, 2, PROPS, 0);
        for i in 0..64 {
            b.img[2 * BLOCK + i] = (i as u8).wrapping_mul(37);
        }

        let mut r: &[u8] = &b.img;
        assert!(find_file_by_paths(&mut r, &["build.prop"]).unwrap().is_none());
    }
}
