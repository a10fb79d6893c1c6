// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Android sparse image expansion, chunk-indexed so a flasher can skip
//! DONT_CARE regions instead of writing zeros.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom, Write};

pub const SPARSE_MAGIC: u32 = 0xed26ff3a;

const CHUNK_TYPE_RAW: u16 = 0xcac1;
const CHUNK_TYPE_FILL: u16 = 0xcac2;
const CHUNK_TYPE_DONT_CARE: u16 = 0xcac3;
const CHUNK_TYPE_CRC32: u16 = 0xcac4;

#[derive(Debug, Serialize, Deserialize)]
struct SparseHeader {
    magic: u32,
    major_version: u16,
    minor_version: u16,
    file_hdr_sz: u16,
    chunk_hdr_sz: u16,
    blk_sz: u32,
    total_blks: u32,
    total_chunks: u32,
    image_checksum: u32,
}

const SPARSE_HEADER_SIZE: usize = 28;

#[derive(Debug, Serialize, Deserialize)]
struct ChunkHeader {
    chunk_type: u16,
    reserved1: u16,
    chunk_sz: u32,
    total_sz: u32,
}

const CHUNK_HEADER_SIZE: usize = 12;

#[derive(Clone, Copy, Debug)]
enum ChunkData {
    Raw { file_offset: u64 },
    Fill { pattern: [u8; 4] },
    DontCare,
    Crc32 { expected: u32 },
}

#[derive(Clone, Copy, Debug)]
struct Chunk {
    data: ChunkData,
    /// Expanded position and length, in bytes.
    out_offset: u64,
    out_len: u64,
}

/// One contiguous stretch of actual data (RAW/FILL chunks with no
/// DONT_CARE hole in between).
#[derive(Clone, Debug)]
pub struct SparseRun {
    pub out_offset: u64,
    pub len: u64,
    chunks: std::ops::Range<usize>,
}

pub struct SparseImage<R: Read + Seek> {
    src: R,
    blk_sz: u32,
    expanded: u64,
    chunks: Vec<Chunk>,
}

fn bad(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

impl<R: Read + Seek> SparseImage<R> {
    /// Check for the sparse magic without consuming the stream.
    pub fn probe(src: &mut R) -> io::Result<bool> {
        let pos = src.stream_position()?;
        let mut magic = [0u8; 4];
        let is_sparse = match src.read_exact(&mut magic) {
            Ok(()) => u32::from_le_bytes(magic) == SPARSE_MAGIC,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e),
        };
        src.seek(SeekFrom::Start(pos))?;
        Ok(is_sparse)
    }

    pub fn open(mut src: R) -> io::Result<Self> {
        let mut hdr_bytes = [0u8; SPARSE_HEADER_SIZE];
        src.read_exact(&mut hdr_bytes)?;
        let hdr: SparseHeader =
            bincode::deserialize(&hdr_bytes).map_err(|e| bad(e.to_string()))?;

        if hdr.magic != SPARSE_MAGIC {
            return Err(bad(format!("not a sparse image (magic {:#x})", hdr.magic)));
        }
        if hdr.major_version != 1 {
            return Err(bad(format!(
                "unsupported sparse version {}.{}",
                hdr.major_version, hdr.minor_version
            )));
        }
        if (hdr.file_hdr_sz as usize) < SPARSE_HEADER_SIZE
            || (hdr.chunk_hdr_sz as usize) < CHUNK_HEADER_SIZE
            || hdr.blk_sz == 0
            || hdr.blk_sz % 4 != 0
        {
            return Err(bad("implausible sparse header geometry"));
        }
        src.seek(SeekFrom::Start(hdr.file_hdr_sz as u64))?;

        let mut chunks = Vec::with_capacity(hdr.total_chunks as usize);
        let mut out_offset: u64 = 0;

        for _ in 0..hdr.total_chunks {
            let mut ch_bytes = [0u8; CHUNK_HEADER_SIZE];
            src.read_exact(&mut ch_bytes)?;
            let ch: ChunkHeader =
                bincode::deserialize(&ch_bytes).map_err(|e| bad(e.to_string()))?;
            let extra = hdr.chunk_hdr_sz as u64 - CHUNK_HEADER_SIZE as u64;
            if extra > 0 {
                src.seek(SeekFrom::Current(extra as i64))?;
            }

            let out_len = ch.chunk_sz as u64 * hdr.blk_sz as u64;
            let body = ch.total_sz as u64 - hdr.chunk_hdr_sz as u64;

            let data = match ch.chunk_type {
                CHUNK_TYPE_RAW => {
                    if body != out_len {
                        return Err(bad("RAW chunk size mismatch"));
                    }
                    let file_offset = src.stream_position()?;
                    src.seek(SeekFrom::Current(body as i64))?;
                    ChunkData::Raw { file_offset }
                }
                CHUNK_TYPE_FILL => {
                    if body != 4 {
                        return Err(bad("FILL chunk must carry a 4-byte pattern"));
                    }
                    let mut pattern = [0u8; 4];
                    src.read_exact(&mut pattern)?;
                    ChunkData::Fill { pattern }
                }
                CHUNK_TYPE_DONT_CARE => {
                    if body != 0 {
                        src.seek(SeekFrom::Current(body as i64))?;
                    }
                    ChunkData::DontCare
                }
                CHUNK_TYPE_CRC32 => {
                    if body != 4 {
                        return Err(bad("CRC32 chunk must carry a 4-byte digest"));
                    }
                    let mut crc = [0u8; 4];
                    src.read_exact(&mut crc)?;
                    ChunkData::Crc32 {
                        expected: u32::from_le_bytes(crc),
                    }
                }
                other => return Err(bad(format!("unknown chunk type {other:#x}"))),
            };

            let out_len = match data {
                ChunkData::Crc32 { .. } => 0,
                _ => out_len,
            };
            chunks.push(Chunk {
                data,
                out_offset,
                out_len,
            });
            out_offset += out_len;
        }

        if out_offset != hdr.total_blks as u64 * hdr.blk_sz as u64 {
            return Err(bad("sparse chunks do not add up to total_blks"));
        }

        Ok(Self {
            src,
            blk_sz: hdr.blk_sz,
            expanded: out_offset,
            chunks,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.blk_sz
    }

    /// Size of the fully expanded image in bytes.
    pub fn expanded_size(&self) -> u64 {
        self.expanded
    }

    pub fn has_crc_chunks(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| matches!(c.data, ChunkData::Crc32 { .. }))
    }

    /// Contiguous data runs, in output order. DONT_CARE splits runs;
    /// CRC chunks carry no data and split nothing.
    pub fn runs(&self) -> Vec<SparseRun> {
        let mut runs: Vec<SparseRun> = Vec::new();

        for (i, chunk) in self.chunks.iter().enumerate() {
            match chunk.data {
                ChunkData::Raw { .. } | ChunkData::Fill { .. } => {
                    match runs.last_mut() {
                        Some(run)
                            if run.out_offset + run.len == chunk.out_offset
                                && run.chunks.end == i =>
                        {
                            run.len += chunk.out_len;
                            run.chunks.end = i + 1;
                        }
                        _ => runs.push(SparseRun {
                            out_offset: chunk.out_offset,
                            len: chunk.out_len,
                            chunks: i..i + 1,
                        }),
                    }
                }
                ChunkData::DontCare => {}
                ChunkData::Crc32 { .. } => {}
            }
        }

        runs.retain(|r| r.len > 0);
        runs
    }

    /// Stream one run's bytes into `sink`.
    pub fn read_run(&mut self, run: &SparseRun, sink: &mut impl Write) -> io::Result<()> {
        for i in run.chunks.clone() {
            let chunk = self.chunks[i];
            self.copy_chunk(&chunk, sink, None)?;
        }
        Ok(())
    }

    fn copy_chunk(
        &mut self,
        chunk: &Chunk,
        sink: &mut impl Write,
        mut crc: Option<&mut crc32fast::Hasher>,
    ) -> io::Result<()> {
        match chunk.data {
            ChunkData::Raw { file_offset } => {
                self.src.seek(SeekFrom::Start(file_offset))?;
                let mut remaining = chunk.out_len;
                let mut buf = vec![0u8; (self.blk_sz as usize).min(1024 * 1024)];
                while remaining > 0 {
                    let want = remaining.min(buf.len() as u64) as usize;
                    self.src.read_exact(&mut buf[..want])?;
                    sink.write_all(&buf[..want])?;
                    if let Some(h) = crc.as_deref_mut() {
                        h.update(&buf[..want]);
                    }
                    remaining -= want as u64;
                }
            }
            ChunkData::Fill { pattern } => {
                let mut block = vec![0u8; self.blk_sz as usize];
                for w in block.chunks_exact_mut(4) {
                    w.copy_from_slice(&pattern);
                }
                let mut remaining = chunk.out_len;
                while remaining > 0 {
                    let want = remaining.min(block.len() as u64) as usize;
                    sink.write_all(&block[..want])?;
                    if let Some(h) = crc.as_deref_mut() {
                        h.update(&block[..want]);
                    }
                    remaining -= want as u64;
                }
            }
            ChunkData::DontCare | ChunkData::Crc32 { .. } => {}
        }
        Ok(())
    }

    /// Expand everything (zeros for DONT_CARE), verifying CRC32 chunks
    /// against the running checksum of the expansion.
    pub fn flatten(&mut self, sink: &mut impl Write) -> io::Result<u64> {
        let mut hasher = crc32fast::Hasher::new();
        let zero_block = vec![0u8; self.blk_sz as usize];

        for i in 0..self.chunks.len() {
            let chunk = self.chunks[i];
            match chunk.data {
                ChunkData::DontCare => {
                    let mut remaining = chunk.out_len;
                    while remaining > 0 {
                        let want = remaining.min(zero_block.len() as u64) as usize;
                        sink.write_all(&zero_block[..want])?;
                        hasher.update(&zero_block[..want]);
                        remaining -= want as u64;
                    }
                }
                ChunkData::Crc32 { expected } => {
                    let running = hasher.clone().finalize();
                    if running != expected {
                        return Err(bad(format!(
                            "sparse CRC mismatch: expected {expected:#010x}, got {running:#010x}"
                        )));
                    }
                }
                _ => self.copy_chunk(&chunk, sink, Some(&mut hasher))?,
            }
        }

        Ok(self.expanded)
    }

    /// Re-scan every chunk and check the embedded CRC32s without
    /// producing output.
    pub fn verify_crc(&mut self) -> io::Result<()> {
        if !self.has_crc_chunks() {
            return Ok(());
        }
        self.flatten(&mut io::sink()).map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod testimg {
    use super::*;

    pub(crate) enum TestChunk<'a> {
        Raw(&'a [u8]),
        Fill([u8; 4], u32),
        DontCare(u32),
        Crc32(u32),
    }

    pub(crate) fn build_sparse(blk_sz: u32, chunks: &[TestChunk]) -> Vec<u8> {
        let mut total_blks = 0u32;
        let mut out = Vec::new();
        // Header goes in last; reserve space.
        out.resize(SPARSE_HEADER_SIZE, 0);

        for c in chunks {
            let (ty, blocks, body): (u16, u32, Vec<u8>) = match c {
                TestChunk::Raw(data) => {
                    assert_eq!(data.len() as u32 % blk_sz, 0);
                    (CHUNK_TYPE_RAW, data.len() as u32 / blk_sz, data.to_vec())
                }
                TestChunk::Fill(pattern, blocks) => {
                    (CHUNK_TYPE_FILL, *blocks, pattern.to_vec())
                }
                TestChunk::DontCare(blocks) => (CHUNK_TYPE_DONT_CARE, *blocks, Vec::new()),
                TestChunk::Crc32(crc) => (CHUNK_TYPE_CRC32, 0, crc.to_le_bytes().to_vec()),
            };
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&blocks.to_le_bytes());
            out.extend_from_slice(&((CHUNK_HEADER_SIZE + body.len()) as u32).to_le_bytes());
            out.extend_from_slice(&body);
            total_blks += blocks;
        }

        let hdr = SparseHeader {
            magic: SPARSE_MAGIC,
            major_version: 1,
            minor_version: 0,
            file_hdr_sz: SPARSE_HEADER_SIZE as u16,
            chunk_hdr_sz: CHUNK_HEADER_SIZE as u16,
            blk_sz,
            total_blks,
            total_chunks: chunks.len() as u32,
            image_checksum: 0,
        };
        out[..SPARSE_HEADER_SIZE].copy_from_slice(&bincode::serialize(&hdr).unwrap());
        out
    }
}
