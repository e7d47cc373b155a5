//! Export write and the guaranteed post-export cleanup.

use crate::error::{AirlockError, AirlockResult};
use crate::mount::unmount_volume;
use crate::volume::MountedVolume;
use airlock_provider::DiskOps;
use log::{debug, error, info};
use std::path::Path;

/// Subdirectory of the staging directory holding the payload to copy.
pub const EXPORT_DATA_DIRNAME: &str = "export_data";

/// Copy staged export data onto a mounted volume, then clean up.
///
/// Cleanup runs whether or not the copy succeeds; a write failure is
/// re-raised only after the device has been unmounted and re-locked and the
/// staging directory removed. When both the write and cleanup fail, the
/// write error wins and the cleanup failure goes to the log.
pub fn write_data_to_device<D>(
    disk: &D,
    staging_dir: &Path,
    target_dirname: &str,
    mounted: MountedVolume,
) -> AirlockResult<()>
where
    D: DiskOps<Error = AirlockError>,
{
    let write_result = copy_export_data(disk, staging_dir, target_dirname, &mounted);
    let cleanup_result = cleanup_drive_and_tmpdir(disk, mounted, staging_dir);

    match (write_result, cleanup_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(cleanup_err)) => Err(cleanup_err),
        (Err(write_err), Ok(())) => Err(write_err),
        (Err(write_err), Err(cleanup_err)) => {
            error!("cleanup also failed after export failure: {cleanup_err}");
            Err(write_err)
        }
    }
}

fn copy_export_data<D>(
    disk: &D,
    staging_dir: &Path,
    target_dirname: &str,
    mounted: &MountedVolume,
) -> AirlockResult<()>
where
    D: DiskOps<Error = AirlockError>,
{
    let target_path = mounted.mountpoint.join(target_dirname);
    disk.create_dir(&target_path)
        .map_err(|err| AirlockError::Export(err.to_string()))?;

    let export_data = staging_dir.join(EXPORT_DATA_DIRNAME);
    debug!("copying files to {target_dirname}");
    disk.copy_tree(&export_data, &target_path)
        .map_err(|err| AirlockError::Export(err.to_string()))?;

    info!("files copied successfully to {target_dirname}");
    Ok(())
}

/// Unmount and re-lock the drive and remove the staging directory.
///
/// Runs every step best-effort: an earlier failure does not abort the later
/// steps. The mapping is re-locked whenever it still exists, and the staging
/// tree (which holds decrypted submission data) is removed unconditionally.
/// Every failure is logged; the first one is returned.
pub fn cleanup_drive_and_tmpdir<D>(
    disk: &D,
    mounted: MountedVolume,
    staging_dir: &Path,
) -> AirlockResult<()>
where
    D: DiskOps<Error = AirlockError>,
{
    let mut first_failure: Option<AirlockError> = None;

    debug!("syncing filesystems");
    if let Err(err) = disk.sync_filesystems() {
        error!("error syncing filesystems: {err}");
        first_failure.get_or_insert(AirlockError::ExportCleanup(err.to_string()));
    }

    let volume = mounted.volume.clone();
    match unmount_volume(disk, mounted) {
        Ok(_) => {}
        Err(err) => {
            error!("error unmounting device: {err}");
            first_failure.get_or_insert(err);
        }
    }

    match disk.mapping_active(&volume.mapped_name) {
        Ok(true) => {
            debug!("locking luks volume {}", volume.mapped_name);
            if let Err(err) = disk.close_mapping(&volume.mapped_name) {
                error!("error closing device: {err}");
                first_failure.get_or_insert(err);
            }
        }
        Ok(false) => {}
        Err(err) => {
            error!("error probing mapping {}: {err}", volume.mapped_name);
            first_failure.get_or_insert(err);
        }
    }

    debug!("deleting temporary directory {}", staging_dir.display());
    if let Err(err) = disk.remove_tree(staging_dir) {
        error!("error removing temporary directory: {err}");
        first_failure.get_or_insert(AirlockError::Device(err.to_string()));
    }

    match first_failure {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
