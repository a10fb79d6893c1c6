// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use itertools::Itertools;
use owo_colors::OwoColorize;

use edl::auth::{AuthArtifacts, AuthOutcome, run_auth};
use edl::buildprop::harvest_build_props;
use edl::devinfo::aggregate;
use edl::gpt::find_part;
use edl::sahara::{
    SaharaMode, sahara_enter_firehose, sahara_read_identity, sahara_run, sahara_send_hello_rsp,
    sahara_switch_mode, sahara_try_reset, sahara_upload_programmer, sahara_wait_hello,
};
use edl::types::{
    AuthMode, ChipIdentity, EdlDevice, EdlReadWrite as _, FirehoseConfiguration,
    FirehoseResetMode, FirehoseStorageType,
};
use edl::{
    FirehoseError, SaharaError, firehose_apply_patch_xml, firehose_configure_storage,
    firehose_erase, firehose_fix_gpt, firehose_flash_from_source, firehose_nop, firehose_peek,
    firehose_power_off, firehose_reset, firehose_set_active_slot, firehose_set_bootable,
    setup_target_device,
};

use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod flasher;
mod util;

const EXIT_DEVICE_NOT_FOUND: i32 = 10;
const EXIT_HANDSHAKE_FAILED: i32 = 11;
const EXIT_AUTH_REJECTED: i32 = 12;
const EXIT_DEVICE_NAK: i32 = 13;
const EXIT_IO: i32 = 14;
const EXIT_CANCELLED: i32 = 15;

/// Marker for "no device answered on that port".
#[derive(Debug)]
struct DeviceNotFound(String);

impl std::fmt::Display for DeviceNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "couldn't open the device: {}", self.0)
    }
}

impl std::error::Error for DeviceNotFound {}

/// Marker for a refused or suspended authentication exchange.
#[derive(Debug)]
struct AuthFailed(String);

impl std::fmt::Display for AuthFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "authentication failed: {}", self.0)
    }
}

impl std::error::Error for AuthFailed {}

#[derive(Debug, Subcommand, PartialEq)]
enum Command {
    /// Dump the entire storage
    Dump {
        #[arg(short, default_value = "out/")]
        outdir: String,
    },

    /// Dump a single partition
    DumpPart {
        #[arg()]
        name: String,

        #[arg(short, default_value = "out/")]
        outdir: String,
    },

    /// Erase a partition
    Erase {
        #[arg()]
        name: String,
    },

    /// Have the programmer rebuild the backup GPT
    FixGpt {
        #[arg(default_value = "0")]
        lun: u8,
    },

    /// Flash partition images (NAME[+SECTOR_OFFSET]=FILE). Sparse
    /// images are expanded on the fly.
    Flash {
        #[arg(num_args = 1..=128, value_name = "NAME=FILE")]
        assignments: Vec<String>,
    },

    /// Invoke the rawprogram/patch XML flasher
    Flasher {
        #[arg(short, long, num_args = 1..=128, value_name = "FILE")]
        program_file_paths: Vec<String>,

        #[arg(short = 'x', long, num_args = 0..=128, value_name = "FILE")]
        patch_file_paths: Vec<String>,

        #[arg(long, default_value = "false")]
        verbose_flasher: bool,
    },

    /// Print everything we can learn about the device
    Info,

    /// Ask the device to do nothing, hopefully successfully
    Nop,

    /// Overwrite the storage physical partition contents with a raw image
    OverwriteStorage {
        #[arg()]
        file_path: String,
    },

    /// Apply a patch XML file
    Patch {
        #[arg()]
        file_path: String,
    },

    /// Peek at memory
    Peek {
        #[arg(value_parser = maybe_hex::<u64>)]
        base: u64,

        #[arg(default_value = "1", value_parser = maybe_hex::<u64>)]
        len: u64,
    },

    /// Power the device down
    PowerOff,

    /// Print the GPT table
    PrintGpt,

    /// Print the logical partitions inside super
    PrintSuper,

    /// Restart the device
    Reset {
        #[arg(default_value = "system", value_name = "edl/off/system")]
        reset_mode: String,
    },

    /// Switch the active A/B slot
    SetActiveSlot {
        #[arg(value_name = "a/b")]
        slot: char,
    },

    /// Mark physical storage partition as bootable
    SetBootLun {
        #[arg()]
        idx: u8,
    },

    /// Write a partition
    Write {
        #[arg()]
        part_name: String,

        #[arg()]
        file_path: String,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, help = "E.g. COM4 on Windows, /dev/ttyUSB0 on Linux")]
    port: String,

    #[arg(short, long, value_name = "FILE", help = "Second-stage programmer image")]
    loader_path: Option<String>,

    #[arg(short, long, default_value = "ufs", value_name = "emmc/ufs")]
    storage_type: String,

    #[arg(long)]
    sector_size: Option<usize>,

    #[arg(long, default_value = "none", value_name = "none/vip/xiaomi/oneplus")]
    auth_mode: String,

    #[arg(long, value_name = "FILE", help = "VIP digest table")]
    digest_path: Option<String>,

    #[arg(long, value_name = "FILE", help = "VIP/MiAuth signature")]
    signature_path: Option<String>,

    #[arg(long, default_value = "false")]
    keep_port_open: bool,

    #[arg(long, default_value = "6", value_parser = clap::value_parser!(u8).range(1..=8))]
    max_luns: u8,

    #[arg(long, default_value = "10000")]
    read_timeout_ms: u64,

    /// WARNING: Will be deprecated in release v1.0.0
    #[arg(long, default_value = "edl", value_name = "edl/off/system")]
    reset_mode: String,

    #[arg(
        short = 'A',
        long,
        default_value = "false",
        help = "Work around missing HELLO packet"
    )]
    skip_hello_wait: bool,

    #[arg(
        long,
        default_value = "false",
        help = "Required for unprovisioned storage media."
    )]
    skip_storage_init: bool,

    /// Accept storage r/w operations, but make them never actually execute
    #[arg(long, default_value = "false")]
    bypass_storage: bool,

    #[arg(long, default_value = "false", help = "Reshape raw transfers for VIP loaders")]
    vip_stealth: bool,

    #[arg(long, default_value = "false")]
    print_firehose_log: bool,

    #[arg(long, default_value = "false")]
    verbose_sahara: bool,

    #[arg(long, default_value = "false")]
    verbose_firehose: bool,

    #[command(subcommand)]
    command: Command,
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<DeviceNotFound>().is_some() {
        return EXIT_DEVICE_NOT_FOUND;
    }
    if err.downcast_ref::<AuthFailed>().is_some() {
        return EXIT_AUTH_REJECTED;
    }
    if let Some(e) = err.downcast_ref::<SaharaError>() {
        return match e {
            SaharaError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_HANDSHAKE_FAILED,
        };
    }
    if let Some(e) = err.downcast_ref::<FirehoseError>() {
        return match e {
            FirehoseError::Nak(_) => EXIT_DEVICE_NAK,
            FirehoseError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_IO,
        };
    }
    EXIT_IO
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{} {e:#}", "error:".bright_red());
        std::process::exit(exit_code_for(&e));
    }
}

/// Run the Sahara stage: identity first, then the programmer upload.
fn sahara_stage(
    dev: &mut EdlDevice,
    loader: Option<&[u8]>,
    skip_hello_wait: bool,
    verbose: bool,
) -> Result<Option<ChipIdentity>, SaharaError> {
    let mut last_pct = u64::MAX;
    let mut progress = |done: u64, total: u64| {
        let pct = done * 100 / total.max(1);
        if pct != last_pct {
            last_pct = pct;
            eprint!("\rUploading programmer: {pct:3}%");
            if done == total {
                eprintln!();
            }
        }
    };

    if !skip_hello_wait {
        return sahara_run(dev, loader, true, Some(&mut progress), verbose);
    }

    // In case another program on the system has already consumed the
    // HELLO packet, appease the state machine upfront.
    sahara_send_hello_rsp(dev, SaharaMode::Command)?;
    let id = sahara_read_identity(dev, 2, verbose)?;
    match loader {
        Some(image) => {
            sahara_switch_mode(dev, SaharaMode::ImageTxPending)?;
            sahara_wait_hello(dev, verbose)?;
            sahara_send_hello_rsp(dev, SaharaMode::ImageTxPending)?;
            sahara_upload_programmer(dev, image, Some(&mut progress), verbose)?;
        }
        None => sahara_try_reset(dev)?,
    }
    Ok(Some(id))
}

fn print_chip_identity(id: &ChipIdentity) {
    println!("Sahara protocol version: {}", id.sahara_version.bright_blue());
    println!("Chip serial number: 0x{:x}", id.serial.bright_yellow());
    println!(
        "MSM ID: 0x{:08x} (OEM 0x{:04x}, model 0x{:04x})",
        id.msm_id.bright_yellow(),
        id.oem_id,
        id.model_id
    );
    println!("HW ID: 0x{}", id.hw_id_hex.bright_yellow());
    println!("OEM Private Key hash: 0x{}", id.pk_hash_hex.bright_yellow());
}

fn load_auth_artifacts(args: &Args, auth_mode: AuthMode) -> Result<AuthArtifacts> {
    let mut artifacts = AuthArtifacts::default();
    match auth_mode {
        AuthMode::Vip => {
            let (Some(digest), Some(signature)) = (&args.digest_path, &args.signature_path)
            else {
                bail!("VIP auth needs --digest-path and --signature-path");
            };
            artifacts.digest = Some(fs::read(digest)?);
            artifacts.signature = Some(fs::read(signature)?);
        }
        AuthMode::Xiaomi => {
            if let Some(sig) = &args.signature_path {
                artifacts.mi_signatures.push(fs::read(sig)?);
            }
        }
        AuthMode::None | AuthMode::OnePlus => {}
    }
    Ok(artifacts)
}

fn run(args: Args) -> Result<()> {
    let reset_mode = FirehoseResetMode::from_str(&args.reset_mode)?;
    let auth_mode = AuthMode::from_str(&args.auth_mode)?;
    let storage_type = FirehoseStorageType::from_str(&args.storage_type)?;

    // Get the MBN loader binary
    let loader = match &args.loader_path {
        Some(path) => match fs::read(path) {
            Ok(m) => Some(m),
            Err(e) => bail!("Couldn't open the programmer binary: {}", e.to_string()),
        },
        None => None,
    };
    if loader.is_none() && args.command != Command::Info {
        bail!("This command needs a programmer; pass one with --loader-path");
    }
    let artifacts = load_auth_artifacts(&args, auth_mode)?;

    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").green(),
        env!("CARGO_PKG_VERSION").yellow()
    );

    let timeout = Duration::from_millis(args.read_timeout_ms);

    // Set up the device. No buffer purge here: the loader's unsolicited
    // HELLO must survive until we read it.
    let mut rw_channel = match setup_target_device(Some(args.port.clone()), false, timeout) {
        Ok(c) => c,
        Err(e) => return Err(DeviceNotFound(e.to_string()).into()),
    };

    let mut dev = EdlDevice::new(
        rw_channel.as_mut(),
        FirehoseConfiguration {
            storage_type,
            storage_sector_size: args
                .sector_size
                .unwrap_or_else(|| storage_type.default_sector_size()),
            max_luns: args.max_luns,
            read_timeout: timeout,
            keep_port_open: args.keep_port_open,
            skip_firehose_log: !args.print_firehose_log,
            verbose_firehose: args.verbose_firehose,
            bypass_storage: args.bypass_storage,
            vip_stealth: args.vip_stealth,
            // The remaining values are overwritten at runtime through a <configure> handshake
            ..Default::default()
        },
    );

    // Get some info about the device, then send the loader.
    let chip = sahara_stage(
        &mut dev,
        loader.as_deref(),
        args.skip_hello_wait,
        args.verbose_sahara,
    )?;
    if let Some(id) = &chip {
        print_chip_identity(id);
    }

    let Some(_) = &loader else {
        // Identity-only run; the device was reset by the Sahara stage.
        return Ok(());
    };

    // The programmer comes up silently; reopen with clean buffers and
    // shake out any boot-time chatter.
    sahara_enter_firehose(&mut dev)?;
    dev.reset_on_drop = true;
    dev.rw.drain(Duration::from_millis(300))?;

    // Send the host capabilities to the device and learn the geometry.
    let storage = firehose_configure_storage(&mut dev, args.skip_storage_init)?;

    if auth_mode != AuthMode::None {
        match run_auth(&mut dev, auth_mode, &artifacts)? {
            AuthOutcome::Authenticated => {
                println!("{}", "Authenticated".bright_green());
            }
            AuthOutcome::Rejected(msg) => return Err(AuthFailed(msg).into()),
            AuthOutcome::ChallengeRequired(token) => {
                println!("Device challenge (sign externally): {}", token.bright_yellow());
                return Err(AuthFailed("challenge requires external signing".into()).into());
            }
        }
    }

    match args.command {
        Command::Dump { outdir } => {
            fs::create_dir_all(&outdir)?;
            let outpath = Path::new(&outdir);

            for p in util::read_catalog(&mut dev)? {
                if p.name.is_empty() || p.num_sectors == 0 {
                    continue;
                }
                let mut out = File::create(outpath.join(&p.name))?;
                util::dump_partition(&mut dev, &p, &mut out)?;
            }
        }
        Command::DumpPart { name, outdir } => {
            fs::create_dir_all(&outdir)?;
            let part = find_part(&mut dev, &name, args.max_luns)?;
            let mut out = File::create(Path::new(&outdir).join(&name))?;
            util::dump_partition(&mut dev, &part, &mut out)?;
        }
        Command::Erase { name } => {
            let part = find_part(&mut dev, &name, args.max_luns)?;
            firehose_erase(&mut dev, part.lun, part.start_sector, part.num_sectors)?;
        }
        Command::FixGpt { lun } => firehose_fix_gpt(&mut dev, lun)?,
        Command::Flash { assignments } => {
            let tasks = assignments
                .iter()
                .map(|a| flasher::parse_assignment(a))
                .collect::<Result<Vec<_>>>()?;
            flasher::run_flash_tasks(&mut dev, tasks, args.max_luns)?;
        }
        Command::Flasher {
            program_file_paths,
            patch_file_paths,
            verbose_flasher,
        } => {
            flasher::run_flash(
                &mut dev,
                program_file_paths,
                patch_file_paths,
                verbose_flasher,
            )?;
        }
        Command::Info => {
            let catalog = util::read_catalog(&mut dev)?;
            let harvest = harvest_build_props(&mut dev, &catalog)?;
            if !harvest.sources.is_empty() {
                println!(
                    "{} {}",
                    "Properties from:".bright_black(),
                    harvest.sources.iter().format(", ")
                );
            }
            let info = aggregate(chip.as_ref(), Some(&storage), &harvest.props);
            util::print_device_info(&info);
        }
        Command::Nop => match firehose_nop(&mut dev) {
            Ok(()) => println!("Your nop was {}", "successful".bright_green()),
            Err(e) => {
                println!("Your nop was {}", "unsuccessful".bright_red());
                return Err(e.into());
            }
        },
        Command::OverwriteStorage { file_path } => {
            let mut file = File::open(file_path)?;
            firehose_flash_from_source(&mut dev, &mut file, "", 0, 0, None)?;
        }
        Command::Patch { file_path } => {
            let xml_text = fs::read_to_string(file_path)?;
            let n = firehose_apply_patch_xml(&mut dev, &xml_text)?;
            println!("Applied {} patch instruction(s)", n.bright_yellow());
        }
        Command::Peek { base, len } => firehose_peek(&mut dev, base, len)?,
        Command::PowerOff => {
            dev.reset_on_drop = false;
            firehose_power_off(&mut dev)?;
            println!("{}", "Powering off".green());
            return Ok(());
        }
        Command::PrintGpt => util::print_partition_table(&mut dev)?,
        Command::PrintSuper => util::print_super(&mut dev, args.max_luns)?,
        Command::Reset { reset_mode } => {
            dev.reset_on_drop = false;
            firehose_reset(&mut dev, &FirehoseResetMode::from_str(&reset_mode)?, 0)?;
            println!("{}", "Reset sent".green());
            return Ok(());
        }
        Command::SetActiveSlot { slot } => firehose_set_active_slot(&mut dev, slot)?,
        Command::SetBootLun { idx } => firehose_set_bootable(&mut dev, idx)?,
        Command::Write {
            part_name,
            file_path,
        } => {
            let part = find_part(&mut dev, &part_name, args.max_luns)?;
            let mut file = File::open(file_path)?;
            firehose_flash_from_source(
                &mut dev,
                &mut file,
                &part_name,
                part.lun,
                part.start_sector as i64,
                Some(part.num_sectors),
            )?;
        }
    };

    // Finally, reset the device
    dev.reset_on_drop = false;
    firehose_reset(&mut dev, &reset_mode, 0)?;

    println!(
        "{} {}",
        "All went well! Resetting to".green(),
        reset_mode.to_string().bright_yellow()
    );

    Ok(())
}
