// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! The Sahara protocol: what the boot ROM speaks before a programmer is
//! running. Frames are little-endian `{ command: u32, length: u32,
//! payload[length - 8] }`, one command on the wire at a time.

use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::io::{Read as _, Write as _};
use std::time::Duration;

use crate::types::{ChipIdentity, EdlChan, EdlDevice, SessionState};
use crate::SaharaError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum SaharaCmd {
    Hello = 0x01,
    HelloResponse = 0x02,
    ReadData = 0x03,
    EndImageTransfer = 0x04,
    Done = 0x05,
    DoneResponse = 0x06,
    Reset = 0x07,
    ResetResponse = 0x08,
    MemoryDebug = 0x09,
    MemoryRead = 0x0a,
    CommandReady = 0x0b,
    CommandSwitchMode = 0x0c,
    CommandExecute = 0x0d,
    CommandExecuteResponse = 0x0e,
    CommandExecuteData = 0x0f,
    MemoryDebug64 = 0x10,
    MemoryRead64 = 0x11,
    ReadData64 = 0x12,
}

/// Mode requested through the HELLO_RESPONSE / SWITCH_MODE packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum SaharaMode {
    ImageTxPending = 0,
    ImageTxComplete = 1,
    MemoryDebug = 2,
    Command = 3,
}

/// Client commands available in command mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum SaharaCmdModeCmd {
    Nop = 0x00,
    ReadSerialNum = 0x01,
    ReadMsmHwId = 0x02,
    ReadOemKeyHash = 0x03,
    SwitchToDmssDload = 0x04,
    SwitchToStreamingDload = 0x05,
    ReadDebugData = 0x06,
    GetSblVersion = 0x07,
}

#[derive(Serialize, Deserialize)]
struct SaharaPktHeader {
    cmd: SaharaCmd,
    len: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaharaHelloPkt {
    pub version: u32,
    pub version_min: u32,
    pub max_cmd_len: u32,
    pub mode: u32,
    pub reserved: [u32; 6],
}

#[derive(Serialize, Deserialize)]
struct SaharaHelloRspPkt {
    version: u32,
    version_min: u32,
    status: u32,
    mode: u32,
    reserved: [u32; 6],
}

#[derive(Serialize, Deserialize)]
struct SaharaReadDataPkt {
    image_id: u32,
    offset: u32,
    size: u32,
}

#[derive(Serialize, Deserialize)]
struct SaharaReadData64Pkt {
    image_id: u64,
    offset: u64,
    size: u64,
}

#[derive(Serialize, Deserialize)]
struct SaharaEndImageTransferPkt {
    image_id: u32,
    status: u32,
}

#[derive(Serialize, Deserialize)]
struct SaharaSwitchModePkt {
    mode: u32,
}

#[derive(Serialize, Deserialize)]
struct SaharaCmdExecutePkt {
    client_cmd: u32,
}

#[derive(Serialize, Deserialize)]
struct SaharaCmdExecuteRspPkt {
    client_cmd: u32,
    resp_len: u32,
}

const SAHARA_MAX_PKT_LEN: usize = 0x1000;

fn check_cancel<T: EdlChan>(chan: &T) -> Result<(), SaharaError> {
    if chan.cancel_token().is_cancelled() {
        return Err(SaharaError::Cancelled);
    }
    Ok(())
}

fn sahara_send_pkt<T: EdlChan, P: Serialize>(
    chan: &mut T,
    cmd: SaharaCmd,
    pkt: &P,
) -> Result<(), SaharaError> {
    let body =
        bincode::serialize(pkt).map_err(|e| SaharaError::MalformedFrame(e.to_string()))?;
    let hdr = bincode::serialize(&SaharaPktHeader {
        cmd,
        len: (body.len() + 8) as u32,
    })
    .map_err(|e| SaharaError::MalformedFrame(e.to_string()))?;

    chan.write_all(&hdr)?;
    chan.write_all(&body)?;
    chan.flush()?;
    Ok(())
}

fn sahara_send_empty_pkt<T: EdlChan>(chan: &mut T, cmd: SaharaCmd) -> Result<(), SaharaError> {
    let hdr = bincode::serialize(&SaharaPktHeader { cmd, len: 8 })
        .map_err(|e| SaharaError::MalformedFrame(e.to_string()))?;

    chan.write_all(&hdr)?;
    chan.flush()?;
    Ok(())
}

fn sahara_read_frame<T: EdlChan>(
    chan: &mut T,
    verbose: bool,
) -> Result<(SaharaCmd, Vec<u8>), SaharaError> {
    let mut hdr = [0u8; 8];
    chan.read_exact(&mut hdr)?;

    let len = u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]) as usize;
    let cmd: SaharaCmd = bincode::deserialize(&hdr[..4]).map_err(|_| {
        SaharaError::MalformedFrame(format!(
            "unknown command {:#x}",
            u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]])
        ))
    })?;
    if !(8..=SAHARA_MAX_PKT_LEN).contains(&len) {
        return Err(SaharaError::MalformedFrame(format!(
            "implausible length {len} for {cmd:?}"
        )));
    }

    let mut payload = vec![0u8; len - 8];
    chan.read_exact(&mut payload)?;

    if verbose {
        anstream::println!("{} {:?}, {} payload bytes", "<-".dimmed(), cmd, payload.len());
    }

    Ok((cmd, payload))
}

fn expect_frame<T: EdlChan>(
    chan: &mut T,
    expected: SaharaCmd,
    verbose: bool,
) -> Result<Vec<u8>, SaharaError> {
    let (cmd, payload) = sahara_read_frame(chan, verbose)?;
    if cmd != expected {
        return Err(SaharaError::UnexpectedCommand {
            expected: expected as u32,
            got: cmd as u32,
        });
    }
    Ok(payload)
}

fn decode_pkt<P: for<'de> Deserialize<'de>>(
    payload: &[u8],
    what: &str,
) -> Result<P, SaharaError> {
    bincode::deserialize(payload)
        .map_err(|_| SaharaError::MalformedFrame(format!("short {what} payload")))
}

/// Wait for the unsolicited HELLO the loader sends on connect.
pub fn sahara_wait_hello<T: EdlChan>(
    chan: &mut T,
    verbose: bool,
) -> Result<SaharaHelloPkt, SaharaError> {
    let payload = expect_frame(chan, SaharaCmd::Hello, verbose)?;
    let hello: SaharaHelloPkt = decode_pkt(&payload, "HELLO")?;

    if !(1..=3).contains(&hello.version) {
        return Err(SaharaError::MalformedFrame(format!(
            "unsupported protocol version {}",
            hello.version
        )));
    }
    chan.set_session_state(SessionState::SaharaMode);
    if verbose {
        anstream::println!(
            "Sahara v{}, max command length {}",
            hello.version.bright_blue(),
            hello.max_cmd_len
        );
    }

    Ok(hello)
}

/// Answer a HELLO (ours or one another tool already consumed) with the
/// requested mode.
pub fn sahara_send_hello_rsp<T: EdlChan>(
    chan: &mut T,
    mode: SaharaMode,
) -> Result<(), SaharaError> {
    sahara_send_pkt(
        chan,
        SaharaCmd::HelloResponse,
        &SaharaHelloRspPkt {
            version: 2,
            version_min: 1,
            status: 0,
            mode: mode as u32,
            reserved: [0; 6],
        },
    )
}

/// Ask the loader to switch protocol modes. The device answers a
/// transfer-mode switch with a fresh HELLO.
pub fn sahara_switch_mode<T: EdlChan>(chan: &mut T, mode: SaharaMode) -> Result<(), SaharaError> {
    sahara_send_pkt(
        chan,
        SaharaCmd::CommandSwitchMode,
        &SaharaSwitchModePkt { mode: mode as u32 },
    )
}

/// Execute one command-mode command and fetch its raw response bytes.
fn sahara_cmd_exec<T: EdlChan>(
    chan: &mut T,
    cmd: SaharaCmdModeCmd,
    verbose: bool,
) -> Result<Vec<u8>, SaharaError> {
    check_cancel(chan)?;
    sahara_send_pkt(
        chan,
        SaharaCmd::CommandExecute,
        &SaharaCmdExecutePkt {
            client_cmd: cmd as u32,
        },
    )?;

    let payload = expect_frame(chan, SaharaCmd::CommandExecuteResponse, verbose)?;
    let rsp: SaharaCmdExecuteRspPkt = decode_pkt(&payload, "COMMAND_EXECUTE_RESPONSE")?;
    if rsp.client_cmd != cmd as u32 {
        return Err(SaharaError::UnexpectedCommand {
            expected: cmd as u32,
            got: rsp.client_cmd,
        });
    }
    if rsp.resp_len as usize > SAHARA_MAX_PKT_LEN {
        return Err(SaharaError::MalformedFrame(format!(
            "implausible response length {}",
            rsp.resp_len
        )));
    }

    sahara_send_pkt(
        chan,
        SaharaCmd::CommandExecuteData,
        &SaharaCmdExecutePkt {
            client_cmd: cmd as u32,
        },
    )?;

    // The data itself arrives raw, without a packet header.
    let mut data = vec![0u8; rsp.resp_len as usize];
    chan.read_exact(&mut data)?;
    Ok(data)
}

/// Read the chip identity block over command mode and latch it on the
/// session. Assumes the HELLO_RESPONSE with `SaharaMode::Command` was
/// already sent; consumes the COMMAND_READY the device answers with.
pub fn sahara_read_identity<T: EdlChan>(
    chan: &mut T,
    sahara_version: u32,
    verbose: bool,
) -> Result<ChipIdentity, SaharaError> {
    expect_frame(chan, SaharaCmd::CommandReady, verbose)?;

    let sn = sahara_cmd_exec(chan, SaharaCmdModeCmd::ReadSerialNum, verbose)?;
    if sn.len() < 4 {
        return Err(SaharaError::MalformedFrame("short serial number".into()));
    }
    let serial = u32::from_le_bytes([sn[0], sn[1], sn[2], sn[3]]);

    let hwid_raw = sahara_cmd_exec(chan, SaharaCmdModeCmd::ReadMsmHwId, verbose)?;
    if hwid_raw.len() < 8 {
        return Err(SaharaError::MalformedFrame("short MSM HW ID".into()));
    }
    let hwid = u64::from_le_bytes([
        hwid_raw[0], hwid_raw[1], hwid_raw[2], hwid_raw[3], hwid_raw[4], hwid_raw[5],
        hwid_raw[6], hwid_raw[7],
    ]);
    let msm_id = (hwid >> 32) as u32;
    let oem_id = ((hwid >> 16) & 0xffff) as u16;
    let model_id = (hwid & 0xffff) as u16;

    let key_hash = sahara_cmd_exec(chan, SaharaCmdModeCmd::ReadOemKeyHash, verbose)?;
    if key_hash.is_empty() {
        return Err(SaharaError::MalformedFrame("empty OEM key hash".into()));
    }
    // Some loaders return the 32-byte hash repeated three times.
    let pk_hash = &key_hash[..key_hash.len().min(32)];

    let id = ChipIdentity {
        serial,
        msm_id,
        oem_id,
        model_id,
        hw_id_hex: hex::encode_upper(hwid.to_be_bytes()),
        pk_hash_hex: hex::encode(pk_hash),
        sahara_version,
    };

    if verbose {
        anstream::println!("Chip serial number: 0x{:x}", id.serial.bright_yellow());
        anstream::println!("MSM HW ID: 0x{}", id.hw_id_hex.bright_yellow());
        anstream::println!("OEM Private Key hash: 0x{}", id.pk_hash_hex.bright_yellow());
    }

    chan.latch_chip_identity(id.clone());
    Ok(id)
}

/// Serve READ_DATA requests until the device ends the transfer.
///
/// Progress is reported as `(bytes_served, total)` after every slice.
pub fn sahara_upload_programmer<T: EdlChan>(
    chan: &mut T,
    image: &[u8],
    mut progress: Option<&mut dyn FnMut(u64, u64)>,
    verbose: bool,
) -> Result<(), SaharaError> {
    let total = image.len() as u64;
    let mut served: u64 = 0;

    loop {
        check_cancel(chan)?;
        let (cmd, payload) = sahara_read_frame(chan, verbose)?;

        let (offset, size) = match cmd {
            SaharaCmd::ReadData => {
                let pkt: SaharaReadDataPkt = decode_pkt(&payload, "READ_DATA")?;
                (pkt.offset as u64, pkt.size as u64)
            }
            SaharaCmd::ReadData64 => {
                let pkt: SaharaReadData64Pkt = decode_pkt(&payload, "READ_DATA_64")?;
                (pkt.offset, pkt.size)
            }
            SaharaCmd::EndImageTransfer => {
                let pkt: SaharaEndImageTransferPkt =
                    decode_pkt(&payload, "END_IMAGE_TRANSFER")?;
                if pkt.status != 0 {
                    return Err(SaharaError::ImageTransferFailed(pkt.status));
                }
                break;
            }
            other => {
                return Err(SaharaError::UnexpectedCommand {
                    expected: SaharaCmd::ReadData as u32,
                    got: other as u32,
                });
            }
        };

        let end = offset
            .checked_add(size)
            .filter(|end| *end <= total)
            .ok_or_else(|| {
                SaharaError::MalformedFrame(format!(
                    "device requested [{offset}, {offset}+{size}) of a {total}-byte image"
                ))
            })?;

        chan.write_all(&image[offset as usize..end as usize])?;
        chan.flush()?;

        served += size;
        if let Some(cb) = progress.as_deref_mut() {
            cb(served.min(total), total);
        }
    }

    sahara_send_empty_pkt(chan, SaharaCmd::Done)?;
    expect_frame(chan, SaharaCmd::DoneResponse, verbose)?;

    // The loader hands over to the programmer without a goodbye.
    chan.set_session_state(SessionState::FirehoseMode);
    Ok(())
}

/// Run the Sahara stage end to end: consume the HELLO, optionally read
/// the chip identity over command mode, then upload the programmer.
///
/// With no image, the device is reset instead and the session ends.
pub fn sahara_run<T: EdlChan>(
    chan: &mut T,
    image: Option<&[u8]>,
    want_identity: bool,
    progress: Option<&mut dyn FnMut(u64, u64)>,
    verbose: bool,
) -> Result<Option<ChipIdentity>, SaharaError> {
    let hello = sahara_wait_hello(chan, verbose)?;

    // Command mode only exists from v2 onwards.
    let identity = if want_identity && hello.version >= 2 {
        sahara_send_hello_rsp(chan, SaharaMode::Command)?;
        Some(sahara_read_identity(chan, hello.version, verbose)?)
    } else {
        None
    };

    let Some(image) = image else {
        sahara_send_empty_pkt(chan, SaharaCmd::Reset)?;
        expect_frame(chan, SaharaCmd::ResetResponse, verbose)?;
        chan.set_session_state(SessionState::Disconnected);
        return Ok(identity);
    };

    if identity.is_some() {
        // Leave command mode; the device re-issues a HELLO for the new mode.
        sahara_switch_mode(chan, SaharaMode::ImageTxPending)?;
        sahara_wait_hello(chan, verbose)?;
    }

    sahara_send_hello_rsp(chan, SaharaMode::ImageTxPending)?;
    sahara_upload_programmer(chan, image, progress, verbose)?;

    Ok(identity)
}

/// Best-effort recovery for a loader stuck mid-state-machine: ask for a
/// reset, and failing that force it back to an idle command state.
pub fn sahara_try_reset<T: EdlChan>(chan: &mut T) -> Result<(), SaharaError> {
    let reset = sahara_send_empty_pkt(chan, SaharaCmd::Reset)
        .and_then(|_| expect_frame(chan, SaharaCmd::ResetResponse, false).map(|_| ()));
    if reset.is_ok() {
        chan.set_session_state(SessionState::Disconnected);
        return Ok(());
    }

    sahara_send_pkt(
        chan,
        SaharaCmd::CommandSwitchMode,
        &SaharaSwitchModePkt {
            mode: SaharaMode::Command as u32,
        },
    )?;
    sahara_send_empty_pkt(chan, SaharaCmd::Done)?;
    Ok(())
}

/// Complete the Sahara -> Firehose transition: give the programmer a
/// moment to come up, then reopen the port with the buffers purged.
pub fn sahara_enter_firehose(dev: &mut EdlDevice) -> Result<(), SaharaError> {
    std::thread::sleep(Duration::from_secs(1));
    dev.rw.reopen(true)?;
    dev.set_session_state(SessionState::FirehoseMode);
    Ok(())
}
