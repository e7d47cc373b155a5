//! The Unlocked -> Mounted transition and its inverse.

use crate::config::AirlockConfig;
use crate::error::{AirlockError, AirlockResult};
use crate::volume::{MountedVolume, Volume};
use airlock_provider::DiskOps;
use log::{debug, error, info};
use std::path::Path;

/// Produce a mounted volume from an unlocked one.
///
/// A mount that already exists for the mapping is reused untouched; a mount
/// set up by the operator is never disturbed. Otherwise the volume is
/// mounted at the configured default mountpoint and ownership of the tree
/// is handed to the unprivileged session user.
pub fn mount_volume<D>(
    disk: &D,
    config: &AirlockConfig,
    volume: Volume,
) -> AirlockResult<MountedVolume>
where
    D: DiskOps<Error = AirlockError>,
{
    if !volume.unlocked {
        error!("volume {} is not unlocked", volume.device_name);
        return Err(AirlockError::Mount(format!(
            "cannot mount locked volume {}",
            volume.device_name
        )));
    }

    debug!("checking mountpoint");
    let existing = disk
        .current_mountpoint(&volume.mapped_device_path())
        .map_err(|err| AirlockError::Mount(err.to_string()))?;

    if let Some(mountpoint) = existing {
        info!("device is already mounted; using existing mountpoint");
        return MountedVolume::from_volume(volume, mountpoint);
    }

    info!("mount volume at {}", config.export.mountpoint.display());
    mount_at(disk, volume, &config.export.mountpoint, &config.export.mount_owner)
}

fn mount_at<D>(
    disk: &D,
    volume: Volume,
    mountpoint: &Path,
    owner: &str,
) -> AirlockResult<MountedVolume>
where
    D: DiskOps<Error = AirlockError>,
{
    if !mountpoint.exists() {
        disk.create_mountpoint(mountpoint)
            .map_err(|err| AirlockError::Mount(err.to_string()))?;
    }

    let mapped_device = volume.mapped_device_path();
    disk.mount(&mapped_device, mountpoint)
        .map_err(|err| AirlockError::Mount(err.to_string()))?;
    disk.chown_tree(mountpoint, owner)
        .map_err(|err| AirlockError::Mount(err.to_string()))?;

    MountedVolume::from_volume(volume, mountpoint.to_path_buf())
}

/// Unmount a mounted volume, returning it with the mount information
/// stripped.
///
/// A mountpoint path that no longer exists means the volume was already
/// unmounted by someone else; that is a no-op, not an error.
pub fn unmount_volume<D>(disk: &D, mounted: MountedVolume) -> AirlockResult<Volume>
where
    D: DiskOps<Error = AirlockError>,
{
    if mounted.mountpoint.exists() {
        debug!("unmounting drive from {}", mounted.mountpoint.display());
        disk.unmount(&mounted.mountpoint)
            .map_err(|err| AirlockError::Device(format!("unmount failed: {err}")))?;
    } else {
        info!("mountpoint does not exist; volume was already unmounted");
    }

    Ok(mounted.into_volume())
}
