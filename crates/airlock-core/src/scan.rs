//! Device discovery and partition-scheme validation.

use crate::error::{AirlockError, AirlockResult};
use airlock_provider::DiskOps;
use log::{debug, info, warn};

/// Return the device paths of all attached removable disks.
///
/// Partitions and other block-device types are excluded up front; each disk
/// is then probed for its removability attribute. A probe failing for one
/// device demotes that device to non-removable without failing the scan.
/// Enumeration order is whatever the host yields.
pub fn removable_disks<D>(disk: &D) -> AirlockResult<Vec<String>>
where
    D: DiskOps<Error = AirlockError>,
{
    info!("checking connected volumes");
    let devices = disk.list_block_devices()?;

    let mut removable = Vec::new();
    for record in devices {
        if record.device_type != "disk" {
            continue;
        }
        match disk.is_removable(&record.name) {
            Ok(true) => removable.push(format!("/dev/{}", record.name)),
            Ok(false) => debug!("{} is not removable", record.name),
            Err(err) => {
                warn!("removability probe failed for {}: {err}", record.name);
            }
        }
    }

    info!("{} removable device(s) connected", removable.len());
    Ok(removable)
}

/// Return the device node an export session should operate on.
///
/// A bare disk is used as-is; a disk carrying exactly one partition resolves
/// to that partition's node. Anything more is rejected before any mutating
/// command is issued.
pub fn operable_node<D>(disk: &D, device: &str) -> AirlockResult<String>
where
    D: DiskOps<Error = AirlockError>,
{
    debug!("checking device partitions on {device}");
    let layout = disk.partition_types(device)?;

    let partition_count = layout.iter().filter(|entry| entry.as_str() == "part").count();
    debug!("counted {partition_count} partition(s)");

    match partition_count {
        0 => Ok(device.to_string()),
        1 => Ok(format!("{device}1")),
        n => Err(AirlockError::InvalidDevice(format!(
            "multiple partitions not supported ({n} partitions on {device})"
        ))),
    }
}
