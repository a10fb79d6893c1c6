// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::bail;

use crate::firehose_reset;

/// Byte-stream channel to a device in EDL mode.
///
/// On top of plain reads and writes, the protocol layers need buffer
/// purging (Firehose entry), draining of unsolicited bytes, and a reopen
/// for the Sahara -> Firehose transition.
pub trait EdlReadWrite: Read + Write {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard both OS-level buffers.
    fn purge(&mut self) -> io::Result<()>;

    /// Read and throw away whatever arrives within the window.
    /// Returns the number of bytes discarded.
    fn drain(&mut self, window: Duration) -> io::Result<usize>;

    /// Close and reopen the underlying port. The Sahara loader keeps the
    /// same device node across the handoff to the programmer.
    fn reopen(&mut self, purge: bool) -> io::Result<()>;

    fn is_connected(&self) -> bool;
}

/// Cooperative cancellation handle. Cloning is cheap; any clone can
/// request cancellation and every protocol operation polls it between
/// wire exchanges, so a cancelled session remains usable.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arm the token so the session can keep issuing commands.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Connection lifecycle of a single device session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    SaharaMode,
    FirehoseMode,
    Ready,
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FirehoseStorageType {
    #[default]
    Ufs,
    Emmc,
}

impl FromStr for FirehoseStorageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ufs" => Ok(Self::Ufs),
            "emmc" => Ok(Self::Emmc),
            _ => bail!("Unknown storage type '{s}'"),
        }
    }
}

impl std::fmt::Display for FirehoseStorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ufs => write!(f, "ufs"),
            Self::Emmc => write!(f, "emmc"),
        }
    }
}

impl FirehoseStorageType {
    /// UFS exposes 4k sectors, eMMC sticks to 512.
    pub fn default_sector_size(&self) -> usize {
        match self {
            Self::Ufs => 4096,
            Self::Emmc => 512,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FirehoseResetMode {
    #[default]
    ResetToEdl,
    PowerOff,
    System,
}

impl FromStr for FirehoseResetMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edl" => Ok(Self::ResetToEdl),
            "off" => Ok(Self::PowerOff),
            "system" => Ok(Self::System),
            _ => bail!("Unknown reset mode '{s}' (edl/off/system)"),
        }
    }
}

impl std::fmt::Display for FirehoseResetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResetToEdl => write!(f, "edl"),
            Self::PowerOff => write!(f, "off"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Vendor authentication flavor, selected by configuration rather than
/// guessed from the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    Vip,
    Xiaomi,
    OnePlus,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "vip" => Ok(Self::Vip),
            "xiaomi" => Ok(Self::Xiaomi),
            "oneplus" => Ok(Self::OnePlus),
            _ => bail!("Unknown auth mode '{s}' (none/vip/xiaomi/oneplus)"),
        }
    }
}

/// Host-side knobs plus the values negotiated through \<configure\> and
/// \<getstorageinfo\>.
#[derive(Clone, Debug)]
pub struct FirehoseConfiguration {
    pub storage_type: FirehoseStorageType,
    pub storage_sector_size: usize,

    /// Max payload the device accepts in one raw transfer. The host
    /// proposes, the device replies with its cap, and every subsequent
    /// chunk respects the result.
    pub send_buffer_size: usize,
    pub xml_buf_size: usize,

    pub num_disk_sectors: u64,
    pub current_slot: Option<char>,
    pub max_luns: u8,

    pub read_timeout: Duration,
    pub keep_port_open: bool,
    pub skip_firehose_log: bool,
    pub verbose_firehose: bool,
    pub bypass_storage: bool,

    /// Reshape raw transfers into the authenticated-loader framing.
    /// Only honored when the crate is built with the `vip` feature.
    pub vip_stealth: bool,
}

impl Default for FirehoseConfiguration {
    fn default() -> Self {
        Self {
            storage_type: FirehoseStorageType::Ufs,
            storage_sector_size: 4096,
            send_buffer_size: 1048576,
            xml_buf_size: 4096,
            num_disk_sectors: 0,
            current_slot: None,
            max_luns: 6,
            read_timeout: Duration::from_secs(10),
            keep_port_open: false,
            skip_firehose_log: true,
            verbose_firehose: false,
            bypass_storage: false,
            vip_stealth: false,
        }
    }
}

/// Snapshot of what \<configure\>/\<getstorageinfo\> taught us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub storage_type: FirehoseStorageType,
    pub sector_size: u32,
    pub max_payload_size: u32,
    pub current_slot: Option<char>,
    pub num_disk_sectors: u64,
}

impl From<&FirehoseConfiguration> for StorageConfig {
    fn from(cfg: &FirehoseConfiguration) -> Self {
        Self {
            storage_type: cfg.storage_type,
            sector_size: cfg.storage_sector_size as u32,
            max_payload_size: cfg.send_buffer_size as u32,
            current_slot: cfg.current_slot,
            num_disk_sectors: cfg.num_disk_sectors,
        }
    }
}

/// Chip identity as reported by the Sahara loader. Latched once during
/// the hello exchange and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChipIdentity {
    pub serial: u32,
    pub msm_id: u32,
    pub oem_id: u16,
    pub model_id: u16,
    pub hw_id_hex: String,
    pub pk_hash_hex: String,
    pub sahara_version: u32,
}

/// A channel that also carries the session bookkeeping the protocol
/// layers need: the Firehose configuration, the cancellation token, the
/// read-back stash (bytes the response scanner consumed past a rawmode
/// terminator) and the log sink.
pub trait EdlChan: Read + Write {
    fn fh_config(&self) -> &FirehoseConfiguration;
    fn mut_fh_config(&mut self) -> &mut FirehoseConfiguration;

    fn cancel_token(&self) -> &CancelToken;

    /// Bytes read off the wire but not yet claimed by anyone. Raw-mode
    /// payloads start here before the channel is read again.
    fn stash(&mut self) -> &mut Vec<u8>;

    /// `<log value="..."/>` lines collected since the last command.
    fn firehose_logs(&mut self) -> &mut Vec<String>;

    fn session_state(&self) -> SessionState;
    fn set_session_state(&mut self, state: SessionState);

    fn chip_identity(&self) -> Option<&ChipIdentity>;
    fn latch_chip_identity(&mut self, id: ChipIdentity);
}

/// The device session: owns the transport reference and whichever of
/// Sahara/Firehose is currently live.
pub struct EdlDevice<'a> {
    pub rw: &'a mut dyn EdlReadWrite,
    pub fh_cfg: FirehoseConfiguration,
    pub reset_on_drop: bool,

    state: SessionState,
    chip: Option<ChipIdentity>,
    cancel: CancelToken,
    stash: Vec<u8>,
    logs: Vec<String>,
}

impl<'a> EdlDevice<'a> {
    pub fn new(rw: &'a mut dyn EdlReadWrite, fh_cfg: FirehoseConfiguration) -> Self {
        Self {
            rw,
            fh_cfg,
            reset_on_drop: false,
            state: SessionState::Connecting,
            chip: None,
            cancel: CancelToken::new(),
            stash: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Read for EdlDevice<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rw.read(buf)
    }
}

impl Write for EdlDevice<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rw.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.rw.flush()
    }
}

impl EdlChan for EdlDevice<'_> {
    fn fh_config(&self) -> &FirehoseConfiguration {
        &self.fh_cfg
    }

    fn mut_fh_config(&mut self) -> &mut FirehoseConfiguration {
        &mut self.fh_cfg
    }

    fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn stash(&mut self) -> &mut Vec<u8> {
        &mut self.stash
    }

    fn firehose_logs(&mut self) -> &mut Vec<String> {
        &mut self.logs
    }

    fn session_state(&self) -> SessionState {
        self.state
    }

    fn set_session_state(&mut self, state: SessionState) {
        self.state = state;
    }

    fn chip_identity(&self) -> Option<&ChipIdentity> {
        self.chip.as_ref()
    }

    fn latch_chip_identity(&mut self, id: ChipIdentity) {
        self.chip = Some(id);
    }
}

impl Drop for EdlDevice<'_> {
    fn drop(&mut self) {
        if self.reset_on_drop {
            let _ = firehose_reset(self, &FirehoseResetMode::ResetToEdl, 0);
        }
    }
}
