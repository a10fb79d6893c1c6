// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! GPT enumeration across LUNs, read through the Firehose client.

use gptman::{GPT, GPTHeader};
use std::io::{Cursor, Seek as _};

use crate::firehose::firehose_read_storage;
use crate::types::EdlChan;
use crate::FirehoseError;

/// One entry of the flat partition catalog. Names are not unique across
/// LUNs or slots; `(lun, start_sector)` is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub lun: u8,
    pub start_sector: u64,
    pub num_sectors: u64,
    pub sector_size: u32,
    pub guid: Option<[u8; 16]>,
    pub attrs: u64,
}

impl Partition {
    pub fn size_bytes(&self) -> u64 {
        self.num_sectors * self.sector_size as u64
    }
}

/// Read and parse the primary GPT of one physical partition. `None`
/// means the LUN carries no (valid) GPT, which is normal for some.
pub fn read_gpt_from_storage<T: EdlChan>(
    channel: &mut T,
    phys_part_idx: u8,
) -> Result<Option<GPT>, FirehoseError> {
    let sector_size = channel.fh_config().storage_sector_size;
    let mut buf = Cursor::new(Vec::<u8>::new());

    // First, probe sector 1 to retrieve the GPT size
    // Note, sector 0 contains a fake MBR as per the GPT spec ("Protective MBR")
    firehose_read_storage(channel, &mut buf, 1, phys_part_idx, 1)?;

    buf.rewind().map_err(FirehoseError::Io)?;
    let header = match GPTHeader::read_from(&mut buf) {
        Ok(h) => h,
        // No "EFI PART" here; skip the LUN.
        Err(_) => return Ok(None),
    };

    // The entire primary GPT is located between sectors 0 and first_usable_lba
    let gpt_len = header.first_usable_lba as usize;

    buf.rewind().map_err(FirehoseError::Io)?;
    firehose_read_storage(channel, &mut buf, gpt_len, phys_part_idx, 0)?;

    // Ignore the aforementioned MBR sector
    buf.set_position(sector_size as u64);
    Ok(GPT::read_from(&mut buf, sector_size as u64).ok())
}

/// Walk every LUN and flatten whatever GPTs exist into one catalog,
/// ordered by (LUN, first LBA). Empty-type entries are dropped;
/// duplicate names across LUNs/slots are kept for callers to
/// disambiguate.
pub fn read_partition_catalog<T: EdlChan>(
    channel: &mut T,
    max_luns: u8,
) -> Result<Vec<Partition>, FirehoseError> {
    let sector_size = channel.fh_config().storage_sector_size as u32;
    let mut catalog = Vec::new();

    for lun in 0..max_luns {
        let Some(gpt) = read_gpt_from_storage(channel, lun)? else {
            continue;
        };

        for (_, entry) in gpt.iter() {
            if entry.is_unused() {
                continue;
            }
            catalog.push(Partition {
                name: entry.partition_name.as_str().to_owned(),
                lun,
                start_sector: entry.starting_lba,
                num_sectors: entry.ending_lba - entry.starting_lba + 1,
                sector_size,
                guid: Some(entry.unique_partition_guid),
                attrs: entry.attribute_bits,
            });
        }
    }

    catalog.sort_by_key(|p| (p.lun, p.start_sector));
    Ok(catalog)
}

/// Find a partition by exact name anywhere in the catalog.
pub fn find_part<T: EdlChan>(
    channel: &mut T,
    name: &str,
    max_luns: u8,
) -> Result<Partition, FirehoseError> {
    read_partition_catalog(channel, max_luns)?
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| FirehoseError::PartitionNotFound(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testchan::MockChan;

    const SECTOR_SIZE: usize = 4096;
    const DISK_SECTORS: u64 = 128;

    /// Build a valid GPT disk image with gptman, then re-serve its
    /// sectors through a scripted Firehose exchange.
    fn build_disk() -> Vec<u8> {
        let mut disk = Cursor::new(vec![0u8; SECTOR_SIZE * DISK_SECTORS as usize]);
        let mut gpt =
            GPT::new_from(&mut disk, SECTOR_SIZE as u64, [0x42; 16]).expect("fresh gpt");

        let parts: [(&str, u64, u64); 3] =
            [("xbl", 6, 10), ("super", 16, 40), ("userdata", 57, 64)];
        for (i, (name, start, end)) in parts.iter().enumerate() {
            gpt[(i + 1) as u32] = gptman::GPTPartitionEntry {
                partition_type_guid: [0x11; 16],
                unique_partition_guid: [i as u8 + 1; 16],
                starting_lba: *start,
                ending_lba: *end,
                attribute_bits: 0,
                partition_name: (*name).into(),
            };
        }
        gpt.write_into(&mut disk).expect("write gpt");
        disk.into_inner()
    }

    fn serve_read(inbound: &mut Vec<u8>, disk: &[u8], start: usize, count: usize) {
        inbound.extend_from_slice(
            b"<data><response value=\"ACK\" rawmode=\"true\"/></data>",
        );
        inbound.extend_from_slice(&disk[start * SECTOR_SIZE..(start + count) * SECTOR_SIZE]);
        inbound.extend_from_slice(
            b"<data><response value=\"ACK\" rawmode=\"false\"/></data>",
        );
    }

    #[test]
    fn catalog_matches_what_was_written() {
        let disk = build_disk();

        // Recover first_usable_lba the same way the reader will.
        let mut hdr_cur = Cursor::new(disk[SECTOR_SIZE..2 * SECTOR_SIZE].to_vec());
        let first_usable = GPTHeader::read_from(&mut hdr_cur).unwrap().first_usable_lba as usize;

        let mut chan = MockChan::new();
        chan.cfg.storage_sector_size = SECTOR_SIZE;
        chan.cfg.num_disk_sectors = DISK_SECTORS;

        let mut inbound = Vec::new();
        serve_read(&mut inbound, &disk, 1, 1);
        serve_read(&mut inbound, &disk, 0, first_usable);
        chan.feed(&inbound);

        let catalog = read_partition_catalog(&mut chan, 1).unwrap();
        let summary: Vec<(&str, u64, u64)> = catalog
            .iter()
            .map(|p| (p.name.as_str(), p.start_sector, p.num_sectors))
            .collect();
        assert_eq!(
            summary,
            vec![("xbl", 6, 5), ("super", 16, 25), ("userdata", 57, 8)]
        );
        assert!(catalog.iter().all(|p| p.sector_size == SECTOR_SIZE as u32));
    }

    #[test]
    fn lun_without_gpt_is_skipped() {
        let mut chan = MockChan::new();
        chan.cfg.storage_sector_size = SECTOR_SIZE;

        let mut inbound = Vec::new();
        serve_read(&mut inbound, &vec![0u8; SECTOR_SIZE * 2], 1, 1);
        chan.feed(&inbound);

        let catalog = read_partition_catalog(&mut chan, 1).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn missing_partition_is_a_semantic_error() {
        let mut chan = MockChan::new();
        chan.cfg.storage_sector_size = SECTOR_SIZE;

        let mut inbound = Vec::new();
        serve_read(&mut inbound, &vec![0u8; SECTOR_SIZE * 2], 1, 1);
        chan.feed(&inbound);

        assert!(matches!(
            find_part(&mut chan, "nosuch", 1),
            Err(FirehoseError::PartitionNotFound(_))
        ));
    }
}
