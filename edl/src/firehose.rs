// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! The Firehose command channel: ASCII XML commands and raw binary
//! payloads multiplexed over the same byte stream. Outgoing XML goes
//! through one builder; incoming data is scanned leniently because
//! devices routinely emit fragments that no strict parser would accept.

use indexmap::IndexMap;
use owo_colors::OwoColorize;
use pbr::ProgressBar;
use std::io::{Read, Seek, Write};
use xmltree::{Element, XMLNode};

use crate::parsers::{
    firehose_parser_ack_nak, firehose_parser_configure_response, firehose_parser_storage_info,
};
use crate::sparse::SparseImage;
use crate::types::{EdlChan, FirehoseResetMode, SessionState, StorageConfig};
use crate::{FirehoseError, FirehoseStatus, NakError};

/// Draw a progress bar only for transfers at least this large.
const PROGRESS_THRESHOLD: usize = 4 * 1024 * 1024;

pub(crate) fn check_cancel<T: EdlChan>(chan: &T) -> Result<(), FirehoseError> {
    if chan.cancel_token().is_cancelled() {
        return Err(FirehoseError::Cancelled);
    }
    Ok(())
}

/// Build one command packet: `<?xml ...?><data><cmd attr=".."/></data>`.
///
/// Everything the host sends goes through here so attribute escaping
/// cannot be forgotten.
pub fn firehose_xml_setup(cmd: &str, args: &[(&str, &str)]) -> Result<Vec<u8>, FirehoseError> {
    let mut elem = Element::new(cmd);
    for (k, v) in args {
        elem.attributes.insert((*k).to_owned(), (*v).to_owned());
    }

    let mut data = Element::new("data");
    data.children.push(XMLNode::Element(elem));

    let mut buf = Vec::new();
    data.write(&mut buf)
        .map_err(|e| FirehoseError::Xml(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn firehose_send<T: EdlChan>(chan: &mut T, packet: &[u8]) -> Result<(), FirehoseError> {
    if chan.fh_config().verbose_firehose {
        anstream::println!("{} {}", "->".dimmed(), String::from_utf8_lossy(packet).dimmed());
    }
    chan.write_all(packet)?;
    chan.flush()?;
    Ok(())
}

fn find_sub(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Pull `key="value"` pairs out of a (possibly truncated) tag body.
fn parse_attrs(fragment: &str) -> IndexMap<String, String> {
    let mut attrs = IndexMap::new();
    let bytes = fragment.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // Skip to the start of an identifier.
        while i < bytes.len() && !(bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len()
            && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
        {
            i += 1;
        }
        let key = &fragment[key_start..i];

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' || key.is_empty() {
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || (bytes[i] != b'"' && bytes[i] != b'\'') {
            continue;
        }
        let quote = bytes[i];
        i += 1;
        let val_start = i;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        attrs.insert(key.to_owned(), fragment[val_start..i].to_owned());
        i += 1;
    }

    attrs
}

fn surface_log<T: EdlChan>(chan: &mut T, attrs: &IndexMap<String, String>) {
    let Some(line) = attrs.get("value") else {
        return;
    };
    if !chan.fh_config().skip_firehose_log || chan.fh_config().verbose_firehose {
        anstream::println!("{} {}", "device:".dimmed(), line);
    }
    chan.firehose_logs().push(line.clone());
}

/// Strip the `</data>` tail (and surrounding line noise) that devices
/// append between a rawmode terminator and the binary that follows.
fn strip_data_close(mut rest: &[u8]) -> &[u8] {
    while let [b, tail @ ..] = rest {
        if b.is_ascii_whitespace() {
            rest = tail;
        } else {
            break;
        }
    }
    if rest.starts_with(b"</data>") {
        rest = &rest[b"</data>".len()..];
        while let [b, tail @ ..] = rest {
            if b.is_ascii_whitespace() {
                rest = tail;
            } else {
                break;
            }
        }
    }
    rest
}

/// Read until the device produces a terminal `<response .../>`, feeding
/// `<log .../>` lines to the log sink along the way. The parser decides
/// what the terminal means; bytes past it (raw-mode payloads) land in
/// the session stash.
pub fn firehose_read<T, P>(chan: &mut T, mut parser: P) -> Result<FirehoseStatus, FirehoseError>
where
    T: EdlChan,
    P: FnMut(&mut T, &IndexMap<String, String>) -> Result<FirehoseStatus, FirehoseError>,
{
    let mut buf: Vec<u8> = std::mem::take(chan.stash());

    loop {
        // Surface every complete <log .../> that precedes a potential
        // response, removing it from the working buffer.
        loop {
            let lpos = match find_sub(&buf, b"<log", 0) {
                Some(p) => p,
                None => break,
            };
            if let Some(rpos) = find_sub(&buf, b"<response", 0) {
                if rpos < lpos {
                    break;
                }
            }
            let Some(lend) = find_sub(&buf, b"/>", lpos) else {
                break;
            };
            let fragment = String::from_utf8_lossy(&buf[lpos + 4..lend]).into_owned();
            let attrs = parse_attrs(&fragment);
            surface_log(chan, &attrs);
            buf.drain(lpos..lend + 2);
        }

        if let Some(rpos) = find_sub(&buf, b"<response", 0) {
            if let Some(rend) = find_sub(&buf, b"/>", rpos) {
                let fragment =
                    String::from_utf8_lossy(&buf[rpos + b"<response".len()..rend]).into_owned();
                let attrs = parse_attrs(&fragment);

                let rest = strip_data_close(&buf[rend + 2..]);
                *chan.stash() = rest.to_vec();

                if chan.fh_config().verbose_firehose {
                    anstream::println!("{} <response{}/>", "<-".dimmed(), fragment.dimmed());
                }
                return parser(chan, &attrs);
            }
        }

        let mut tmp = [0u8; 4096];
        match chan.read(&mut tmp) {
            Ok(0) => {
                *chan.stash() = buf;
                return Err(FirehoseError::Timeout);
            }
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(e) => {
                *chan.stash() = buf;
                let err: FirehoseError = e.into();
                if matches!(err, FirehoseError::Disconnected) {
                    chan.set_session_state(SessionState::Error);
                }
                return Err(err);
            }
        }
    }
}

/// Exact read that drains the stash before touching the wire.
pub(crate) fn fh_read_exact<T: EdlChan>(chan: &mut T, out: &mut [u8]) -> Result<(), FirehoseError> {
    let stash = chan.stash();
    let take = out.len().min(stash.len());
    if take > 0 {
        out[..take].copy_from_slice(&stash[..take]);
        stash.drain(..take);
    }
    if take < out.len() {
        chan.read_exact(&mut out[take..])?;
    }
    Ok(())
}

fn nak_of<T: EdlChan>(chan: &mut T) -> FirehoseError {
    let msg = chan.firehose_logs().last().cloned().unwrap_or_default();
    FirehoseError::Nak(NakError::Command(msg))
}

/// Advertise the host capabilities. The response must be consumed with
/// [`firehose_parser_configure_response`].
pub fn firehose_configure<T: EdlChan>(
    chan: &mut T,
    skip_storage_init: bool,
) -> Result<(), FirehoseError> {
    let storage = chan.fh_config().storage_type.to_string();
    let payload = chan.fh_config().send_buffer_size.to_string();
    let skip = if skip_storage_init { "1" } else { "0" };

    let pkt = firehose_xml_setup(
        "configure",
        &[
            ("MemoryName", storage.as_str()),
            ("Verbose", "0"),
            ("AlwaysValidate", "0"),
            ("MaxDigestTableSizeInBytes", "2048"),
            ("MaxPayloadSizeToTargetInBytes", payload.as_str()),
            ("ZlpAwareHost", "1"),
            ("SkipStorageInit", skip),
        ],
    )?;
    firehose_send(chan, &pkt)
}

/// Ask the programmer about the storage geometry. Loaders that predate
/// `<getstorageinfo>` NAK it; the configured defaults then stand.
pub fn firehose_get_storage_info<T: EdlChan>(chan: &mut T) -> Result<(), FirehoseError> {
    chan.firehose_logs().clear();
    let pkt = firehose_xml_setup("getstorageinfo", &[("physical_partition_number", "0")])?;
    firehose_send(chan, &pkt)?;

    match firehose_read(chan, firehose_parser_storage_info) {
        Ok(FirehoseStatus::Ack) => {}
        Ok(FirehoseStatus::Nak) => return Ok(()),
        Err(e) => return Err(e),
    }

    // The interesting part usually arrives as a JSON blob inside <log>
    // lines rather than as response attributes.
    let logs = chan.firehose_logs().clone();
    for line in logs.iter().filter(|l| l.contains("storage_info")) {
        if let Some(v) = json_uint(line, "block_size") {
            chan.mut_fh_config().storage_sector_size = v as usize;
        }
        if let Some(v) = json_uint(line, "total_blocks") {
            chan.mut_fh_config().num_disk_sectors = v;
        }
        if let Some(v) = json_uint(line, "num_physical") {
            chan.mut_fh_config().max_luns = (v as u8).clamp(1, 8);
        }
    }
    for line in logs.iter() {
        for slot in ["_a", "_b"] {
            if line.contains("Active slot:") && line.trim_end().ends_with(slot) {
                chan.mut_fh_config().current_slot = slot.chars().nth(1);
            }
        }
    }

    Ok(())
}

/// Crude scan for `"key": 1234` inside a log line.
fn json_uint(line: &str, key: &str) -> Option<u64> {
    let quoted = format!("\"{key}\"");
    let at = line.find(&quoted)? + quoted.len();
    let rest = line[at..].trim_start_matches([':', ' ', '\t']);
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Full Firehose bring-up: configure, negotiate the payload size, then
/// learn the storage geometry.
pub fn firehose_configure_storage<T: EdlChan>(
    chan: &mut T,
    skip_storage_init: bool,
) -> Result<StorageConfig, FirehoseError> {
    check_cancel(chan)?;
    firehose_configure(chan, skip_storage_init)?;
    firehose_read(chan, firehose_parser_configure_response)?;
    firehose_get_storage_info(chan)?;
    chan.set_session_state(SessionState::Ready);
    Ok(StorageConfig::from(chan.fh_config()))
}

/// Format a possibly-negative start sector the way the wire wants it:
/// negative N addresses N sectors before the end of the disk, and the
/// device resolves the literal token itself.
pub fn start_sector_token(start_sector: i64) -> String {
    if start_sector < 0 {
        format!("NUM_DISK_SECTORS-{}", -start_sector)
    } else {
        start_sector.to_string()
    }
}

/// Read `num_sectors` sectors into `out`, chunked to the negotiated
/// payload size. Every chunk is a full `<read>` exchange: ACK with
/// `rawmode="true"`, the raw bytes, then the closing ACK.
pub fn firehose_read_storage<T: EdlChan>(
    chan: &mut T,
    out: &mut impl Write,
    num_sectors: usize,
    phys_part_idx: u8,
    start_sector: u64,
) -> Result<(), FirehoseError> {
    let sector_size = chan.fh_config().storage_sector_size;
    let max_chunk_sectors = (chan.fh_config().send_buffer_size / sector_size).max(1);

    let total_bytes = num_sectors * sector_size;
    let mut bar = (total_bytes >= PROGRESS_THRESHOLD)
        .then(|| ProgressBar::on(std::io::stderr(), total_bytes as u64));
    if let Some(b) = bar.as_mut() {
        b.set_units(pbr::Units::Bytes);
    }

    let mut sector = start_sector;
    let mut remaining = num_sectors;
    while remaining > 0 {
        check_cancel(chan)?;
        let n = remaining.min(max_chunk_sectors);

        chan.firehose_logs().clear();
        let pkt = firehose_xml_setup(
            "read",
            &[
                ("SECTOR_SIZE_IN_BYTES", &sector_size.to_string()),
                ("num_partition_sectors", &n.to_string()),
                ("physical_partition_number", &phys_part_idx.to_string()),
                ("start_sector", &sector.to_string()),
            ],
        )?;
        firehose_send(chan, &pkt)?;

        if firehose_read(chan, firehose_parser_ack_nak)? == FirehoseStatus::Nak {
            return Err(nak_of(chan));
        }

        let mut chunk = vec![0u8; n * sector_size];
        fh_read_exact(chan, &mut chunk)?;
        #[cfg(feature = "vip")]
        if chan.fh_config().vip_stealth {
            crate::vip::stealth_check_read_trailer(chan, &chunk)?;
        }
        out.write_all(&chunk).map_err(FirehoseError::Io)?;

        if firehose_read(chan, firehose_parser_ack_nak)? == FirehoseStatus::Nak {
            return Err(nak_of(chan));
        }

        sector += n as u64;
        remaining -= n;
        if let Some(b) = bar.as_mut() {
            b.add((n * sector_size) as u64);
        }
    }

    if let Some(b) = bar.as_mut() {
        b.finish();
    }
    Ok(())
}

/// Stream `num_sectors` worth of data from `src` into one `<program>`
/// exchange. Short final reads are zero-padded to the sector boundary.
pub fn firehose_program_storage<T: EdlChan>(
    chan: &mut T,
    src: &mut impl Read,
    label: &str,
    num_sectors: usize,
    phys_part_idx: u8,
    start_sector: &str,
) -> Result<(), FirehoseError> {
    check_cancel(chan)?;
    let sector_size = chan.fh_config().storage_sector_size;
    let buf_size = chan.fh_config().send_buffer_size;
    let total_bytes = num_sectors * sector_size;

    if chan.fh_config().bypass_storage {
        std::io::copy(src, &mut std::io::sink()).map_err(FirehoseError::Io)?;
        return Ok(());
    }

    chan.firehose_logs().clear();
    let pkt = firehose_xml_setup(
        "program",
        &[
            ("SECTOR_SIZE_IN_BYTES", &sector_size.to_string()),
            ("num_partition_sectors", &num_sectors.to_string()),
            ("physical_partition_number", &phys_part_idx.to_string()),
            ("start_sector", start_sector),
            ("label", label),
        ],
    )?;
    firehose_send(chan, &pkt)?;

    if firehose_read(chan, firehose_parser_ack_nak)? == FirehoseStatus::Nak {
        return Err(nak_of(chan));
    }

    let mut bar = (total_bytes >= PROGRESS_THRESHOLD)
        .then(|| ProgressBar::on(std::io::stderr(), total_bytes as u64));
    if let Some(b) = bar.as_mut() {
        b.set_units(pbr::Units::Bytes);
        b.message(&format!("{label} "));
    }

    let mut sent = 0usize;
    let mut buf = vec![0u8; buf_size];
    while sent < total_bytes {
        check_cancel(chan)?;
        let want = (total_bytes - sent).min(buf_size);
        let chunk = &mut buf[..want];

        // Fill as much as the source still has; the tail pads with zeros.
        let mut filled = 0;
        while filled < want {
            let n = src.read(&mut chunk[filled..]).map_err(FirehoseError::Io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk[filled..].fill(0);

        #[cfg(feature = "vip")]
        if chan.fh_config().vip_stealth {
            crate::vip::stealth_send_chunk(chan, chunk)?;
            sent += want;
            if let Some(b) = bar.as_mut() {
                b.add(want as u64);
            }
            continue;
        }

        chan.write_all(chunk)?;
        chan.flush()?;
        sent += want;
        if let Some(b) = bar.as_mut() {
            b.add(want as u64);
        }
    }
    if let Some(b) = bar.as_mut() {
        b.finish();
    }

    if firehose_read(chan, firehose_parser_ack_nak)? == FirehoseStatus::Nak {
        return Err(nak_of(chan));
    }
    Ok(())
}

/// Write a byte buffer at a sector address (negative = from disk end).
pub fn firehose_write_sectors<T: EdlChan>(
    chan: &mut T,
    phys_part_idx: u8,
    start_sector: i64,
    data: &[u8],
) -> Result<(), FirehoseError> {
    let sector_size = chan.fh_config().storage_sector_size;
    let num_sectors = data.len().div_ceil(sector_size);
    firehose_program_storage(
        chan,
        &mut &data[..],
        "",
        num_sectors,
        phys_part_idx,
        &start_sector_token(start_sector),
    )
}

/// Flash an image file, expanding Android sparse sources on the fly.
/// Sparse DONT_CARE regions become sector skips, so each contiguous
/// data run costs exactly one `<program>` exchange.
pub fn firehose_flash_from_source<T: EdlChan>(
    chan: &mut T,
    src: &mut (impl Read + Seek),
    label: &str,
    phys_part_idx: u8,
    start_sector: i64,
    capacity_sectors: Option<u64>,
) -> Result<(), FirehoseError> {
    let sector_size = chan.fh_config().storage_sector_size as u64;

    if !SparseImage::probe(src).map_err(FirehoseError::Io)? {
        let len = stream_len(src).map_err(FirehoseError::Io)?;
        let num_sectors = len.div_ceil(sector_size);
        if let Some(cap) = capacity_sectors {
            if num_sectors > cap {
                return Err(FirehoseError::SizeExceedsCapacity {
                    actual: len,
                    limit: cap * sector_size,
                });
            }
        }
        return firehose_program_storage(
            chan,
            src,
            label,
            num_sectors as usize,
            phys_part_idx,
            &start_sector_token(start_sector),
        );
    }

    let mut sparse = SparseImage::open(src).map_err(FirehoseError::Io)?;
    sparse.verify_crc().map_err(FirehoseError::Io)?;
    if let Some(cap) = capacity_sectors {
        let num_sectors = sparse.expanded_size().div_ceil(sector_size);
        if num_sectors > cap {
            return Err(FirehoseError::SizeExceedsCapacity {
                actual: sparse.expanded_size(),
                limit: cap * sector_size,
            });
        }
    }

    for run in sparse.runs() {
        check_cancel(chan)?;
        let off_sectors = (run.out_offset / sector_size) as i64;
        let num_sectors = run.len.div_ceil(sector_size) as usize;
        let sector = start_sector_token(start_sector + off_sectors);

        let mut data = Vec::with_capacity(run.len as usize);
        sparse.read_run(&run, &mut data).map_err(FirehoseError::Io)?;
        firehose_program_storage(
            chan,
            &mut &data[..],
            label,
            num_sectors,
            phys_part_idx,
            &sector,
        )?;
    }
    Ok(())
}

fn stream_len(src: &mut impl Seek) -> std::io::Result<u64> {
    let pos = src.stream_position()?;
    let len = src.seek(std::io::SeekFrom::End(0))?;
    src.seek(std::io::SeekFrom::Start(pos))?;
    Ok(len)
}

pub fn firehose_erase<T: EdlChan>(
    chan: &mut T,
    phys_part_idx: u8,
    start_sector: u64,
    num_sectors: u64,
) -> Result<(), FirehoseError> {
    check_cancel(chan)?;
    let sector_size = chan.fh_config().storage_sector_size;
    chan.firehose_logs().clear();
    let pkt = firehose_xml_setup(
        "erase",
        &[
            ("StorageType", &chan.fh_config().storage_type.to_string()),
            ("SECTOR_SIZE_IN_BYTES", &sector_size.to_string()),
            ("num_partition_sectors", &num_sectors.to_string()),
            ("physical_partition_number", &phys_part_idx.to_string()),
            ("start_sector", &start_sector.to_string()),
        ],
    )?;
    firehose_send(chan, &pkt)?;
    match firehose_read(chan, firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(nak_of(chan)),
    }
}

/// Apply one `<patch>` instruction (a byte-level edit of a sector range).
pub fn firehose_patch<T: EdlChan>(
    chan: &mut T,
    byte_offset: u64,
    phys_part_idx: u8,
    size_in_bytes: u64,
    start_sector: &str,
    value: &str,
    filename: &str,
) -> Result<(), FirehoseError> {
    check_cancel(chan)?;
    let sector_size = chan.fh_config().storage_sector_size;
    chan.firehose_logs().clear();
    let pkt = firehose_xml_setup(
        "patch",
        &[
            ("SECTOR_SIZE_IN_BYTES", &sector_size.to_string()),
            ("byte_offset", &byte_offset.to_string()),
            ("filename", filename),
            ("physical_partition_number", &phys_part_idx.to_string()),
            ("size_in_bytes", &size_in_bytes.to_string()),
            ("start_sector", start_sector),
            ("value", value),
        ],
    )?;
    firehose_send(chan, &pkt)?;
    match firehose_read(chan, firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(nak_of(chan)),
    }
}

/// Run every on-device `<patch>` element of a patch XML, in file order.
/// Host-side patch targets are skipped. Returns the number applied.
pub fn firehose_apply_patch_xml<T: EdlChan>(
    chan: &mut T,
    xml_text: &str,
) -> Result<usize, FirehoseError> {
    let xml = Element::parse(xml_text.as_bytes())
        .map_err(|e| FirehoseError::Xml(e.to_string()))?;

    let mut applied = 0;
    for node in xml.children.iter() {
        let XMLNode::Element(e) = node else {
            continue;
        };
        if !e.name.eq_ignore_ascii_case("patch") {
            continue;
        }
        let get = |k: &str| e.attributes.get(k).cloned().unwrap_or_default();
        if get("filename") != "DISK" {
            continue;
        }

        let byte_offset = get("byte_offset").parse::<u64>().unwrap_or(0);
        let phys = get("physical_partition_number").parse::<u8>().unwrap_or(0);
        let size = get("size_in_bytes").parse::<u64>().unwrap_or(0);
        firehose_patch(
            chan,
            byte_offset,
            phys,
            size,
            &get("start_sector"),
            &get("value"),
            "DISK",
        )?;
        applied += 1;
    }
    Ok(applied)
}

fn firehose_simple_cmd<T: EdlChan>(
    chan: &mut T,
    cmd: &str,
    args: &[(&str, &str)],
) -> Result<(), FirehoseError> {
    check_cancel(chan)?;
    chan.firehose_logs().clear();
    let pkt = firehose_xml_setup(cmd, args)?;
    firehose_send(chan, &pkt)?;
    match firehose_read(chan, firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(nak_of(chan)),
    }
}

/// Ask the device to do nothing, hopefully successfully.
pub fn firehose_nop<T: EdlChan>(chan: &mut T) -> Result<(), FirehoseError> {
    firehose_simple_cmd(chan, "nop", &[])
}

/// Peek at device memory; the values come back as log lines.
pub fn firehose_peek<T: EdlChan>(chan: &mut T, base: u64, len: u64) -> Result<(), FirehoseError> {
    firehose_simple_cmd(
        chan,
        "peek",
        &[
            ("address64", &format!("{base:#x}")),
            ("size_in_bytes", &len.to_string()),
        ],
    )?;
    let logs = chan.firehose_logs().clone();
    for line in logs {
        anstream::println!("{}", line);
    }
    Ok(())
}

pub fn firehose_reset<T: EdlChan>(
    chan: &mut T,
    mode: &FirehoseResetMode,
    delay_secs: u32,
) -> Result<(), FirehoseError> {
    let value = match mode {
        FirehoseResetMode::ResetToEdl => "edl",
        FirehoseResetMode::PowerOff => "off",
        FirehoseResetMode::System => "reset",
    };
    firehose_simple_cmd(
        chan,
        "power",
        &[
            ("value", value),
            ("DelayInSeconds", &delay_secs.to_string()),
        ],
    )?;
    chan.set_session_state(SessionState::Disconnected);
    Ok(())
}

pub fn firehose_power_off<T: EdlChan>(chan: &mut T) -> Result<(), FirehoseError> {
    firehose_reset(chan, &FirehoseResetMode::PowerOff, 0)
}

/// Mark a physical partition (e.g. a UFS LUN) as bootable.
pub fn firehose_set_bootable<T: EdlChan>(chan: &mut T, idx: u8) -> Result<(), FirehoseError> {
    firehose_simple_cmd(
        chan,
        "setbootablestoragedrive",
        &[("value", &idx.to_string())],
    )
}

pub fn firehose_set_active_slot<T: EdlChan>(chan: &mut T, slot: char) -> Result<(), FirehoseError> {
    if !matches!(slot, 'a' | 'b') {
        return Err(FirehoseError::Unsupported("slot must be 'a' or 'b'"));
    }
    firehose_simple_cmd(chan, "setactiveslot", &[("slot", &slot.to_string())])?;
    chan.mut_fh_config().current_slot = Some(slot);
    Ok(())
}

/// Have the programmer recompute the backup GPT from the primary.
pub fn firehose_fix_gpt<T: EdlChan>(chan: &mut T, phys_part_idx: u8) -> Result<(), FirehoseError> {
    firehose_simple_cmd(
        chan,
        "fixgpt",
        &[
            ("physical_partition_number", &phys_part_idx.to_string()),
            ("grow_last_partition", "1"),
        ],
    )
}

/// Checksum a sector range device-side; the digest shows up in the logs.
pub fn firehose_checksum_storage<T: EdlChan>(
    chan: &mut T,
    num_sectors: usize,
    phys_part_idx: u8,
    start_sector: u64,
) -> Result<(), FirehoseError> {
    let sector_size = chan.fh_config().storage_sector_size;
    firehose_simple_cmd(
        chan,
        "getsha256digest",
        &[
            ("SECTOR_SIZE_IN_BYTES", &sector_size.to_string()),
            ("num_partition_sectors", &num_sectors.to_string()),
            ("physical_partition_number", &phys_part_idx.to_string()),
            ("start_sector", &start_sector.to_string()),
        ],
    )
}
