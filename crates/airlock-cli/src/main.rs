//! Airlock command-line interface for exporting staged files to removable
//! encrypted media.
//!
//! The final line on stderr is always a stable status token; everything
//! else is logging. Callers wrapping this binary key off the token, never
//! the diagnostics.

use airlock_core::{
    config::{AirlockConfig, DEFAULT_CONFIG_PATH},
    logging, luks, mount, scan,
    volume::{Volume, VolumeHandle},
    AirlockError,
};
use airlock_disk::SystemDiskProvider;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use rpassword::prompt_password;
use std::path::PathBuf;
use zeroize::Zeroizing;

const SUCCESS_EXPORT: &str = "SUCCESS_EXPORT";
const NO_DEVICE_DETECTED: &str = "NO_DEVICE_DETECTED";
const MULTI_DEVICE_DETECTED: &str = "MULTI_DEVICE_DETECTED";

const PASSPHRASE_ATTEMPTS: usize = 3;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "airlock",
    version,
    about = "Export staged files onto an encrypted removable device, leaving it locked afterwards."
)]
struct Cli {
    /// Path to the Airlock configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached removable disks.
    Devices,

    /// Run one export session: unlock, mount, copy, and always clean up.
    Export {
        /// Staging directory containing an `export_data/` payload.
        staging: PathBuf,

        /// Directory name created on the device for this export.
        #[arg(long, default_value = "airlock-export")]
        name: String,

        /// Target disk (e.g. /dev/sda). When omitted, exactly one removable
        /// disk must be attached.
        #[arg(long)]
        device: Option<String>,
    },
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        error!("{err:?}");
        let token = err
            .downcast_ref::<AirlockError>()
            .map(AirlockError::code)
            .unwrap_or("ERROR_GENERIC");
        write_status(token);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let config = AirlockConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Devices => {
            let disk = SystemDiskProvider::from_config(&config)?;
            let devices = scan::removable_disks(&disk)?;
            if devices.is_empty() {
                println!("no removable devices attached");
            }
            for device in devices {
                println!("{device}");
            }
            Ok(())
        }
        Commands::Export {
            staging,
            name,
            device,
        } => {
            let disk = SystemDiskProvider::from_config(&config)?;
            let target = select_device(&disk, device)?;
            let node = scan::operable_node(&disk, &target)?;

            if !luks::is_luks_volume(&disk, &node)? {
                return Err(AirlockError::InvalidDevice(format!(
                    "{node} is not a LUKS-encrypted volume"
                ))
                .into());
            }

            let mounted = match luks::get_luks_volume(&disk, &config, &node)? {
                VolumeHandle::Mounted(mounted) => {
                    info!("volume already unlocked; reusing mount");
                    mounted
                }
                VolumeHandle::Locked(volume) => {
                    let unlocked = unlock_with_prompt(&disk, volume)?;
                    mount::mount_volume(&disk, &config, unlocked)?
                }
            };

            airlock_core::export::write_data_to_device(&disk, &staging, &name, mounted)?;
            write_status(SUCCESS_EXPORT);
            Ok(())
        }
    }
}

/// Resolve the disk to export to: the explicit flag, or the single attached
/// removable disk.
fn select_device(disk: &SystemDiskProvider, explicit: Option<String>) -> Result<String> {
    if let Some(device) = explicit {
        return Ok(device);
    }

    let mut devices = scan::removable_disks(disk)?;
    match devices.len() {
        0 => {
            write_status(NO_DEVICE_DETECTED);
            bail!("no removable device attached");
        }
        1 => Ok(devices.remove(0)),
        n => {
            write_status(MULTI_DEVICE_DETECTED);
            bail!("{n} removable devices attached; pass --device to choose one");
        }
    }
}

/// Prompt for the volume passphrase, retrying on rejection with the same
/// volume value.
fn unlock_with_prompt(disk: &SystemDiskProvider, volume: Volume) -> Result<Volume> {
    for attempt in 1..=PASSPHRASE_ATTEMPTS {
        let passphrase = Zeroizing::new(prompt_password(format!(
            "Passphrase for {}: ",
            volume.device_name
        ))?);

        match luks::unlock_luks_volume(disk, volume.clone(), passphrase.as_bytes()) {
            Ok(unlocked) => return Ok(unlocked),
            Err(err) if err.is_recoverable() && attempt < PASSPHRASE_ATTEMPTS => {
                error!("{err}; {} attempt(s) left", PASSPHRASE_ATTEMPTS - attempt);
            }
            Err(err) => return Err(err.into()),
        }
    }

    unreachable!("attempt loop either returns or errors out")
}

fn write_status(token: &str) {
    eprintln!("{token}");
}
