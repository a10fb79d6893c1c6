// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

use indexmap::IndexMap;

use owo_colors::OwoColorize;

use crate::{
    EdlChan, FirehoseError, FirehoseStatus, NakError, firehose_configure, firehose_read,
};

/// The highest protocol version currently supported by the library
pub(crate) const FH_PROTO_VERSION_SUPPORTED: u32 = 1;

// Parsers are kept separate for more flexibility (e.g. log replay analysis)

/// Check "value" for ack/nak (generic)
pub fn firehose_parser_ack_nak<T: EdlChan>(
    _: &mut T,
    attrs: &IndexMap<String, String>,
) -> Result<FirehoseStatus, FirehoseError> {
    match attrs.get("value").map(|v| v.as_str()) {
        Some("ACK") => Ok(FirehoseStatus::Ack),
        Some("NAK") => Ok(FirehoseStatus::Nak),
        _ => Err(FirehoseError::MalformedData(attrs.clone())),
    }
}

/// Parse the \<configure\> response.
///
/// The host proposes a payload size; the device answers with whatever it
/// can actually take, either as a NAK carrying the cap or as an ACK with
/// the adjusted attribute. Whatever survives becomes the bound every
/// later transfer respects.
pub fn firehose_parser_configure_response<T: EdlChan>(
    channel: &mut T,
    attrs: &IndexMap<String, String>,
) -> Result<FirehoseStatus, FirehoseError> {
    let status = firehose_parser_ack_nak(channel, attrs)?;

    if status == FirehoseStatus::Nak {
        // The device can't handle that big of a buffer and auto-reconfigures
        // to the max it can; retry once with the advertised cap.
        let Some(cap) = attrs
            .get("MaxPayloadSizeToTargetInBytes")
            .and_then(|v| v.parse::<usize>().ok())
        else {
            return Err(FirehoseError::Nak(NakError::Configure));
        };
        channel.mut_fh_config().send_buffer_size = cap;
        firehose_configure(channel, false)?;
        return firehose_read(channel, firehose_parser_ack_nak);
    }

    if let Some(cap) = attrs
        .get("MaxPayloadSizeToTargetInBytes")
        .and_then(|v| v.parse::<usize>().ok())
    {
        channel.mut_fh_config().send_buffer_size = cap;
    }
    if let Some(xml) = attrs
        .get("MaxXMLSizeInBytes")
        .and_then(|v| v.parse::<usize>().ok())
    {
        channel.mut_fh_config().xml_buf_size = xml;
    }

    if let Some(version) = attrs.get("Version") {
        if channel.fh_config().verbose_firehose {
            anstream::println!("Found protocol version {}", version.bright_blue());
        }
    }
    if let Some(min) = attrs
        .get("MinVersionSupported")
        .and_then(|v| v.parse::<u32>().ok())
    {
        if min > FH_PROTO_VERSION_SUPPORTED {
            return Err(FirehoseError::ProtocolVersionIncompatibility {
                device_min_version: min,
            });
        }
    }

    Ok(FirehoseStatus::Ack)
}

/// Parse the \<getstorageinfo\> response. Newer loaders attach the
/// geometry as attributes; older ones only log a JSON blob, which the
/// caller digs out of the log sink afterwards.
pub fn firehose_parser_storage_info<T: EdlChan>(
    channel: &mut T,
    attrs: &IndexMap<String, String>,
) -> Result<FirehoseStatus, FirehoseError> {
    let status = firehose_parser_ack_nak(channel, attrs)?;
    if status == FirehoseStatus::Nak {
        return Ok(status);
    }

    if let Some(v) = attrs
        .get("SECTOR_SIZE_IN_BYTES")
        .and_then(|v| v.parse::<usize>().ok())
    {
        channel.mut_fh_config().storage_sector_size = v;
    }
    if let Some(v) = attrs
        .get("num_partition_sectors")
        .and_then(|v| v.parse::<u64>().ok())
    {
        channel.mut_fh_config().num_disk_sectors = v;
    }

    Ok(status)
}
