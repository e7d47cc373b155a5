//! LUKS volume identity and the Locked -> Unlocked transition.

use crate::config::AirlockConfig;
use crate::error::{AirlockError, AirlockResult};
use crate::mount::mount_volume;
use crate::volume::{EncryptionScheme, Volume, VolumeHandle, MAPPED_NAME_PREFIX};
use airlock_provider::{DiskOps, UnlockOutcome};
use log::{debug, error, info};

/// Whether `device` holds a volume encrypted with the supported scheme.
///
/// A negative probe is a normal classification outcome, not an error.
pub fn is_luks_volume<D>(disk: &D, device: &str) -> AirlockResult<bool>
where
    D: DiskOps<Error = AirlockError>,
{
    debug!("checking if {device} is luks encrypted");
    let is_luks = disk.probe_luks(device)?;
    if !is_luks {
        info!("{device} is not LUKS-encrypted");
    }
    Ok(is_luks)
}

/// Derive the mapping name from a LUKS header dump.
///
/// The header is scanned for the first line whose leading tab-separated
/// field names the UUID; the mapped name is that UUID behind a fixed prefix,
/// so repeated derivations for the same physical volume always agree.
pub fn mapped_name_from_header(header: &str) -> AirlockResult<String> {
    for line in header.lines() {
        let mut items = line.split('\t');
        let Some(field) = items.next() else {
            continue;
        };
        if field.contains("UUID") {
            if let Some(uuid) = items.next() {
                return Ok(format!("{MAPPED_NAME_PREFIX}{uuid}"));
            }
        }
    }

    Err(AirlockError::InvalidDevice(
        "no UUID field in LUKS header; device may not be correctly formatted".to_string(),
    ))
}

fn mapped_name_for_device<D>(disk: &D, device: &str) -> AirlockResult<String>
where
    D: DiskOps<Error = AirlockError>,
{
    debug!("get LUKS name from headers");
    let header = disk.luks_header_dump(device)?;
    mapped_name_from_header(&header).inspect_err(|_| {
        error!("failed to get UUID from LUKS header of {device}");
    })
}

/// Build a volume description for `device` and classify its current state.
///
/// When a live mapping already exists the volume is treated as unlocked and
/// handed to the mount step (which reuses any existing mountpoint), yielding
/// a mounted handle. Otherwise the locked volume is returned and the caller
/// is expected to obtain a passphrase and call [`unlock_luks_volume`].
pub fn get_luks_volume<D>(
    disk: &D,
    config: &AirlockConfig,
    device: &str,
) -> AirlockResult<VolumeHandle>
where
    D: DiskOps<Error = AirlockError>,
{
    let mapped_name = mapped_name_for_device(disk, device)?;
    debug!("mapped name is {mapped_name}");

    let volume = Volume::locked(device, mapped_name);

    if disk.mapping_active(&volume.mapped_name)? {
        let mounted = mount_volume(disk, config, volume.into_unlocked())?;
        Ok(VolumeHandle::Mounted(mounted))
    } else {
        Ok(VolumeHandle::Locked(volume))
    }
}

/// Unlock a LUKS-encrypted volume with the supplied passphrase.
///
/// A rejected passphrase fails with the recoverable unlock error and leaves
/// the volume untouched; the caller re-prompts and retries with the same
/// `Volume` value. After a reported success the mapping is re-probed before
/// the unlocked volume is returned.
pub fn unlock_luks_volume<D>(
    disk: &D,
    volume: Volume,
    passphrase: &[u8],
) -> AirlockResult<Volume>
where
    D: DiskOps<Error = AirlockError>,
{
    if volume.encryption != EncryptionScheme::Luks {
        error!("unlock_luks_volume called on a non-LUKS volume");
        return Err(AirlockError::Device(format!(
            "volume {} does not use the supported encryption scheme",
            volume.device_name
        )));
    }

    debug!("unlocking luks volume {}", volume.device_name);
    match disk.open_mapping(&volume.device_name, &volume.mapped_name, passphrase)? {
        UnlockOutcome::Unlocked => {
            if !disk.mapping_active(&volume.mapped_name)? {
                return Err(AirlockError::Device(format!(
                    "unlock of {} reported success but mapping {} is not active",
                    volume.device_name, volume.mapped_name
                )));
            }
            Ok(volume.into_unlocked())
        }
        UnlockOutcome::BadPassphrase => {
            error!("bad volume passphrase for {}", volume.device_name);
            Err(AirlockError::UnlockFailed(format!(
                "passphrase rejected for {}",
                volume.device_name
            )))
        }
    }
}
