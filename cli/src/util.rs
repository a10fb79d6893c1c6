// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use anyhow::Result;
use owo_colors::OwoColorize;
use std::io::Write;

use edl::buildprop::DeviceRangeReader;
use edl::devinfo::DeviceInfo;
use edl::gpt::{Partition, read_partition_catalog};
use edl::lpmeta::parse_lp_metadata;
use edl::types::EdlChan;
use edl::{FirehoseError, firehose_read_storage};

pub fn read_catalog<T: EdlChan>(channel: &mut T) -> Result<Vec<Partition>, FirehoseError> {
    let max_luns = channel.fh_config().max_luns;
    read_partition_catalog(channel, max_luns)
}

pub fn dump_partition<T: EdlChan>(
    channel: &mut T,
    part: &Partition,
    out: &mut impl Write,
) -> Result<(), FirehoseError> {
    println!(
        "Dumping {} ({} kiB)...",
        part.name.bright_yellow(),
        part.size_bytes() / 1024
    );
    firehose_read_storage(
        channel,
        out,
        part.num_sectors as usize,
        part.lun,
        part.start_sector,
    )
}

pub fn print_partition_table<T: EdlChan>(channel: &mut T) -> Result<()> {
    let catalog = read_catalog(channel)?;

    println!(
        "GPT across {} LUNs of {}:",
        channel.fh_config().max_luns.bright_yellow(),
        channel.fh_config().storage_type.to_string().bright_yellow()
    );
    for part in catalog {
        println!(
            "lun{}] {}: start_sector = {}, {} bytes ({} kiB)",
            part.lun,
            part.name.as_str(),
            part.start_sector,
            part.size_bytes(),
            part.size_bytes() / 1024,
        );
    }

    Ok(())
}

pub fn print_super<T: EdlChan>(channel: &mut T, max_luns: u8) -> Result<()> {
    let Some(super_part) = read_partition_catalog(channel, max_luns)?
        .into_iter()
        .find(|p| p.name == "super")
    else {
        println!("No super partition on this device");
        return Ok(());
    };

    let sector_size = channel.fh_config().storage_sector_size as u32;
    let size_bytes = super_part.size_bytes();
    let mut reader = DeviceRangeReader::new(
        channel,
        super_part.lun,
        super_part.start_sector,
        size_bytes,
    );
    let parts = match parse_lp_metadata(&mut reader, super_part.start_sector, sector_size) {
        Ok(p) => p,
        Err(e) => {
            println!("Couldn't parse LP metadata: {e}");
            return Ok(());
        }
    };

    println!(
        "Logical partitions in {} (start sector {}):",
        "super".bright_yellow(),
        super_part.start_sector
    );
    for p in parts {
        println!(
            "  {}: abs sector {}, {} bytes ({} kiB)",
            p.name,
            p.absolute_sector,
            p.size_bytes,
            p.size_bytes / 1024,
        );
    }

    Ok(())
}

pub fn print_device_info(info: &DeviceInfo) {
    if let Some(chip) = &info.chip {
        println!(
            "Chip: MSM 0x{:08x}, serial 0x{:x}, Sahara v{}",
            chip.msm_id.bright_yellow(),
            chip.serial,
            chip.sahara_version
        );
    }
    if let Some(storage) = &info.storage {
        println!(
            "Storage: {} ({}-byte sectors, {} sectors{})",
            storage.storage_type.to_string().bright_yellow(),
            storage.sector_size,
            storage.num_disk_sectors,
            match storage.current_slot {
                Some(s) => format!(", slot {s}"),
                None => String::new(),
            }
        );
    }

    let fields: [(&str, &Option<String>); 10] = [
        ("Display name", &info.display_name),
        ("Brand", &info.brand),
        ("Model", &info.model),
        ("Codename", &info.codename),
        ("Android version", &info.android_version),
        ("Security patch", &info.security_patch),
        ("Build ID", &info.build_id),
        ("Incremental", &info.incremental),
        ("OTA version", &info.ota_version_full),
        ("Fingerprint", &info.fingerprint),
    ];
    for (label, value) in fields {
        if let Some(v) = value {
            println!("{}: {}", label, v.bright_green());
        }
    }
}
