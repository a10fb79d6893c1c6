// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use anyhow::{Result, bail};
use indexmap::IndexMap;
use owo_colors::OwoColorize;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use xmltree::{Element, XMLNode};

use edl::gpt::find_part;
use edl::types::EdlChan;
use edl::{
    firehose_checksum_storage, firehose_flash_from_source, firehose_patch,
    firehose_program_storage, firehose_read_storage,
};

/// One partition-image write, resolved against the GPT at run time.
/// `start_sector` is relative to the target partition; negative values
/// count back from the end of the disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashTask {
    pub target: String,
    pub start_sector: i64,
    pub path: PathBuf,
}

/// Parse a `NAME[+SECTOR_OFFSET]=FILE` assignment.
pub fn parse_assignment(s: &str) -> Result<FlashTask> {
    let Some((target, path)) = s.split_once('=') else {
        bail!("'{s}' is not a NAME=FILE assignment");
    };
    let (target, start_sector) = match target.split_once('+') {
        Some((name, off)) => (name, off.parse::<i64>()?),
        None => (target, 0),
    };
    if target.is_empty() || path.is_empty() {
        bail!("'{s}' is not a NAME=FILE assignment");
    }
    Ok(FlashTask {
        target: target.to_owned(),
        start_sector,
        path: PathBuf::from(path),
    })
}

/// Tasks run in list order, except that super's LP-metadata copies
/// (the writes at super+1/super+2) always go first so a mid-flash
/// failure leaves consistent metadata behind.
pub fn order_flash_tasks(tasks: Vec<FlashTask>) -> Vec<FlashTask> {
    let (meta, rest): (Vec<_>, Vec<_>) = tasks
        .into_iter()
        .partition(|t| t.target == "super" && (t.start_sector == 1 || t.start_sector == 2));
    meta.into_iter().chain(rest).collect()
}

pub fn run_flash_tasks<T: EdlChan>(
    channel: &mut T,
    tasks: Vec<FlashTask>,
    max_luns: u8,
) -> Result<()> {
    for task in order_flash_tasks(tasks) {
        let part = find_part(channel, &task.target, max_luns)?;
        let mut file = File::open(&task.path)?;

        println!(
            "Flashing {} -> {}",
            task.path.display().bright_yellow(),
            task.target.bright_yellow()
        );
        firehose_flash_from_source(
            channel,
            &mut file,
            &task.target,
            part.lun,
            part.start_sector as i64 + task.start_sector,
            Some(part.num_sectors.saturating_sub(task.start_sector.max(0) as u64)),
        )?;
    }
    Ok(())
}

fn parse_read_cmd<T: EdlChan>(
    channel: &mut T,
    out_dir: &Path,
    attrs: &IndexMap<String, String>,
    checksum_only: bool,
) -> anyhow::Result<()> {
    let num_sectors = attrs
        .get("num_partition_sectors")
        .and_then(|a| a.parse::<usize>().ok())
        .unwrap_or(0);
    let phys_part_idx = attrs
        .get("physical_partition_number")
        .and_then(|a| a.parse::<u8>().ok())
        .unwrap_or(0);
    let start_sector = attrs
        .get("start_sector")
        .and_then(|a| a.parse::<u64>().ok())
        .unwrap_or(0);

    if checksum_only {
        return Ok(firehose_checksum_storage(
            channel,
            num_sectors,
            phys_part_idx,
            start_sector,
        )?);
    }

    let Some(filename) = attrs.get("filename") else {
        bail!("Got '<read>' tag without a filename");
    };
    let mut outfile = fs::File::create(out_dir.join(filename))?;

    Ok(firehose_read_storage(
        channel,
        &mut outfile,
        num_sectors,
        phys_part_idx,
        start_sector,
    )?)
}

fn parse_patch_cmd<T: EdlChan>(
    channel: &mut T,
    attrs: &IndexMap<String, String>,
    verbose: bool,
) -> anyhow::Result<()> {
    let Some(filename) = attrs.get("filename") else {
        bail!("Got '<patch>' tag without a filename");
    };
    if filename != "DISK" {
        if verbose {
            println!("Skipping <patch> tag trying to alter {filename} on Host filesystem");
        }
        return Ok(());
    }

    let byte_off = attrs
        .get("byte_offset")
        .and_then(|a| a.parse::<u64>().ok())
        .unwrap_or(0);
    let phys_part_idx = attrs
        .get("physical_partition_number")
        .and_then(|a| a.parse::<u8>().ok())
        .unwrap_or(0);
    let size = attrs
        .get("size_in_bytes")
        .and_then(|a| a.parse::<u64>().ok())
        .unwrap_or(0);
    let start_sector = attrs.get("start_sector").cloned().unwrap_or_default();
    let val = attrs.get("value").cloned().unwrap_or_default();

    Ok(firehose_patch(
        channel,
        byte_off,
        phys_part_idx,
        size,
        &start_sector,
        &val,
        "DISK",
    )?)
}

const BOOTABLE_PART_NAMES: [&str; 3] = ["xbl", "xbl_a", "sbl1"];

fn parse_program_cmd<T: EdlChan>(
    channel: &mut T,
    program_file_dir: &Path,
    attrs: &IndexMap<String, String>,
    allow_missing_files: bool,
    bootable_part_idx: &mut Option<u8>,
    verbose: bool,
) -> anyhow::Result<()> {
    let sector_size = attrs
        .get("SECTOR_SIZE_IN_BYTES")
        .and_then(|a| a.parse::<usize>().ok())
        .unwrap_or(0);
    if sector_size != channel.fh_config().storage_sector_size {
        bail!(
            "Mismatch in storage sector size! Programfile requests {}",
            sector_size
        );
    }
    let num_sectors = attrs
        .get("num_partition_sectors")
        .and_then(|a| a.parse::<usize>().ok())
        .unwrap_or(0);
    let phys_part_idx = attrs
        .get("physical_partition_number")
        .and_then(|a| a.parse::<u8>().ok())
        .unwrap_or(0);
    let start_sector = attrs.get("start_sector").cloned().unwrap_or_default();
    let file_sector_offset = attrs
        .get("file_sector_offset")
        .and_then(|a| a.parse::<u64>().ok())
        .unwrap_or(0);

    let label = attrs.get("label").cloned().unwrap_or_default();
    if num_sectors == 0 {
        println!("Skipping 0-length entry for {label}");
        return Ok(());
    }
    if BOOTABLE_PART_NAMES.contains(&&label[..]) {
        *bootable_part_idx = Some(phys_part_idx);
    }

    let Some(filename) = attrs.get("filename") else {
        bail!("Got '<program>' tag without a filename");
    };
    let file_path = program_file_dir.join(filename);
    if allow_missing_files {
        if filename.is_empty() {
            if verbose {
                println!("Skipping bogus entry for {label}");
            }
            return Ok(());
        } else if !file_path.exists() {
            if verbose {
                println!("Skipping non-existent file {}", file_path.display());
            }
            return Ok(());
        }
    }

    // rawprogram files may address a window inside the source image.
    let mut content = fs::read(file_path)?;
    let skip = (sector_size as u64 * file_sector_offset) as usize;
    if skip > 0 {
        content.drain(..skip.min(content.len()));
    }

    Ok(firehose_program_storage(
        channel,
        &mut Cursor::new(content),
        &label,
        num_sectors,
        phys_part_idx,
        &start_sector,
    )?)
}

fn parse_program_xml<T: EdlChan>(
    channel: &mut T,
    xml: &Element,
    program_file_dir: &Path,
    out_dir: &Path,
    allow_missing_files: bool,
    verbose: bool,
) -> anyhow::Result<Option<u8>> {
    let mut bootable_part_idx: Option<u8> = None;

    // First make sure we have all the necessary files (and fail unless specified otherwise)
    for node in xml.children.iter() {
        if let XMLNode::Element(e) = node {
            if e.name.to_lowercase() != "program" {
                continue;
            }
            let Some(filename) = e.attributes.get("filename") else {
                bail!("Got '<program>' tag without a filename");
            };
            let file_path = program_file_dir.join(filename);
            if !filename.is_empty() && !file_path.exists() && !allow_missing_files {
                bail!("{} doesn't exist!", file_path.display())
            }
        }
    }

    // At last, do the things we're supposed to do
    for node in xml.children.iter() {
        if let XMLNode::Element(e) = node {
            match e.name.to_lowercase().as_str() {
                "getsha256digest" => parse_read_cmd(channel, out_dir, &e.attributes, true)?,
                "patch" => parse_patch_cmd(channel, &e.attributes, verbose)?,
                "program" => parse_program_cmd(
                    channel,
                    program_file_dir,
                    &e.attributes,
                    allow_missing_files,
                    &mut bootable_part_idx,
                    verbose,
                )?,
                "read" => parse_read_cmd(channel, out_dir, &e.attributes, false)?,

                unknown => bail!(
                    "Got unknown instruction ({}), failing to prevent damage",
                    unknown
                ),
            };
        }
    }

    Ok(bootable_part_idx)
}

/// Iterates through program/patch files and executes the instructions therein.
pub(crate) fn run_flash<T: EdlChan>(
    channel: &mut T,
    program_file_paths: Vec<String>,
    patch_file_paths: Vec<String>,
    verbose: bool,
) -> Result<()> {
    // Check if the required files are present
    let file_paths = [&program_file_paths[..], &patch_file_paths[..]].concat();
    if let Some(f) = file_paths.iter().find(|f| !Path::new(f).is_file()) {
        bail!("{} doesn't exist", f);
    }
    let out_dir = match cfg!(target_os = "windows") {
        true => "C:\\Temp\\",
        false => "/tmp/out/",
    };

    let mut bootable_part_idx: Option<u8> = None;
    for program_file_path in file_paths {
        let path = Path::new(&program_file_path);

        let program_file_dir = path.parent().unwrap_or(Path::new("."));
        let program_file = fs::read(path)?;
        let xml = Element::parse(&program_file[..])?;

        // Parse the program/patch XMLs and flash away
        if let Some(n) = parse_program_xml(
            channel,
            &xml,
            program_file_dir,
            Path::new(out_dir),
            true,
            verbose,
        )? {
            bootable_part_idx = Some(n)
        };
    }

    // Mark the correct LUN (or any other kind of physical partition) as bootable
    if let Some(idx) = bootable_part_idx {
        println!("Setting partition {} as bootable!", idx.bright_yellow());
        edl::firehose_set_bootable(channel, idx)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_parse_names_offsets_and_files() {
        let t = parse_assignment("boot_a=boot.img").unwrap();
        assert_eq!(t.target, "boot_a");
        assert_eq!(t.start_sector, 0);
        assert_eq!(t.path, PathBuf::from("boot.img"));

        let t = parse_assignment("super+2=lp_metadata_copy.img").unwrap();
        assert_eq!(t.target, "super");
        assert_eq!(t.start_sector, 2);

        assert!(parse_assignment("nonsense").is_err());
        assert!(parse_assignment("=file").is_err());
    }

    #[test]
    fn super_metadata_copies_jump_the_queue() {
        let tasks = vec![
            parse_assignment("boot_a=boot.img").unwrap(),
            parse_assignment("super=super.img").unwrap(),
            parse_assignment("super+1=meta1.img").unwrap(),
            parse_assignment("vendor_a=vendor.img").unwrap(),
            parse_assignment("super+2=meta2.img").unwrap(),
        ];

        let ordered = order_flash_tasks(tasks);
        let names: Vec<(String, i64)> = ordered
            .iter()
            .map(|t| (t.target.clone(), t.start_sector))
            .collect();
        assert_eq!(
            names,
            vec![
                ("super".to_owned(), 1),
                ("super".to_owned(), 2),
                ("boot_a".to_owned(), 0),
                ("super".to_owned(), 0),
                ("vendor_a".to_owned(), 0),
            ]
        );
    }
}
