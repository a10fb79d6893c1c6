// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! Host-side client for Qualcomm Emergency Download (EDL) mode.
//!
//! The device side is a two-stage affair: the ROM-resident Sahara loader
//! accepts a second-stage programmer, which then speaks the Firehose
//! XML/binary protocol for storage access. This crate implements both
//! stages plus the introspection layers built on top of them (GPT
//! catalog, logical-partition metadata, read-only EXT4/EROFS walks and
//! the build.prop harvest).

use std::io;

use indexmap::IndexMap;

pub mod auth;
pub mod buildprop;
pub mod devinfo;
pub mod firehose;
pub mod fs;
pub mod gpt;
pub mod lpmeta;
pub mod parsers;
pub mod sahara;
#[cfg(feature = "serial")]
pub mod serial;
pub mod sparse;
pub mod types;
#[cfg(feature = "vip")]
pub mod vip;

#[cfg(test)]
pub(crate) mod testchan;

pub use firehose::*;
pub use types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirehoseStatus {
    Ack,
    Nak,
}

/// Errors of the Sahara stage. Anything malformed here is fatal to the
/// handshake; there is no resume.
#[derive(Debug)]
pub enum SaharaError {
    Io(io::Error),
    Timeout,
    Disconnected,
    MalformedFrame(String),
    UnexpectedCommand { expected: u32, got: u32 },
    ImageTransferFailed(u32),
    Cancelled,
}

impl From<io::Error> for SaharaError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::Disconnected,
            _ => Self::Io(e),
        }
    }
}

impl std::fmt::Display for SaharaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "sahara: I/O error: {e}"),
            Self::Timeout => write!(f, "sahara: timed out waiting for the device"),
            Self::Disconnected => write!(f, "sahara: device disconnected"),
            Self::MalformedFrame(what) => write!(f, "sahara: malformed frame: {what}"),
            Self::UnexpectedCommand { expected, got } => {
                write!(f, "sahara: expected command {expected:#x}, got {got:#x}")
            }
            Self::ImageTransferFailed(status) => {
                write!(f, "sahara: image transfer failed with status {status:#x}")
            }
            Self::Cancelled => write!(f, "sahara: cancelled"),
        }
    }
}

impl std::error::Error for SaharaError {}

/// What the device NAKed, where it matters to the caller.
#[derive(Debug)]
pub enum NakError {
    Configure,
    Auth,
    Command(String),
}

impl std::fmt::Display for NakError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configure => write!(f, "device rejected <configure>"),
            Self::Auth => write!(f, "device rejected the authentication exchange"),
            Self::Command(msg) if msg.is_empty() => write!(f, "device NAKed the command"),
            Self::Command(msg) => write!(f, "device NAKed the command: {msg}"),
        }
    }
}

#[derive(Debug)]
pub enum FirehoseError {
    Io(io::Error),
    Timeout,
    Disconnected,
    /// The response element was present but carried nonsense.
    MalformedData(IndexMap<String, String>),
    Nak(NakError),
    ProtocolVersionIncompatibility {
        device_min_version: u32,
    },
    PartitionNotFound(String),
    SizeExceedsCapacity {
        actual: u64,
        limit: u64,
    },
    SectorOutOfRange {
        start: u64,
        count: u64,
        num_disk_sectors: u64,
    },
    Xml(String),
    Unsupported(&'static str),
    Cancelled,
}

impl From<io::Error> for FirehoseError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::Disconnected,
            _ => Self::Io(e),
        }
    }
}

impl std::fmt::Display for FirehoseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "firehose: I/O error: {e}"),
            Self::Timeout => write!(f, "firehose: timed out waiting for a response"),
            Self::Disconnected => write!(f, "firehose: device disconnected"),
            Self::MalformedData(attrs) => write!(f, "firehose: malformed response: {attrs:?}"),
            Self::Nak(n) => write!(f, "firehose: {n}"),
            Self::ProtocolVersionIncompatibility { device_min_version } => write!(
                f,
                "firehose: device requires protocol version >= {device_min_version}"
            ),
            Self::PartitionNotFound(name) => write!(f, "firehose: no partition named '{name}'"),
            Self::SizeExceedsCapacity { actual, limit } => {
                write!(f, "firehose: image of {actual} bytes exceeds capacity {limit}")
            }
            Self::SectorOutOfRange {
                start,
                count,
                num_disk_sectors,
            } => write!(
                f,
                "firehose: sectors [{start}, {start}+{count}) beyond disk end {num_disk_sectors}"
            ),
            Self::Xml(what) => write!(f, "firehose: XML error: {what}"),
            Self::Unsupported(what) => write!(f, "firehose: {what}"),
            Self::Cancelled => write!(f, "firehose: cancelled"),
        }
    }
}

impl std::error::Error for FirehoseError {}

/// Structural failures in on-disk metadata (GPT, LP tables, EXT4, EROFS).
/// Callers above the parsers treat these as "absent", never as fatal.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    BadMagic { what: &'static str, got: u64 },
    Truncated { what: &'static str },
    Unsupported(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadMagic { what, got } => write!(f, "bad {what} magic ({got:#x})"),
            Self::Truncated { what } => write!(f, "truncated {what}"),
            Self::Unsupported(what) => write!(f, "unsupported layout: {what}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Open the serial transport towards a device sitting in EDL mode.
///
/// `purge` must stay off for Sahara entry (the loader emits an
/// unsolicited HELLO that would be lost) and on for Firehose entry.
#[cfg(feature = "serial")]
pub fn setup_target_device(
    dev_path: Option<String>,
    purge: bool,
    timeout: std::time::Duration,
) -> anyhow::Result<Box<dyn EdlReadWrite>> {
    Ok(Box::new(serial::setup_serial_device(dev_path, purge, timeout)?))
}
