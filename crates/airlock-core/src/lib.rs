#![forbid(unsafe_code)]

//! Core building blocks shared by Airlock binaries.
//!
//! The export pipeline (device discovery, partition validation, LUKS unlock,
//! mount orchestration, guaranteed cleanup) lives here, written against the
//! host-operation contracts so binaries and tests can swap in concrete
//! system integrations.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod luks;
pub mod mount;
pub mod scan;
pub mod volume;

pub use config::{AirlockConfig, DEFAULT_CONFIG_PATH, DEFAULT_MOUNTPOINT};
pub use error::{AirlockError, AirlockResult};
pub use export::{cleanup_drive_and_tmpdir, write_data_to_device, EXPORT_DATA_DIRNAME};
pub use luks::{get_luks_volume, is_luks_volume, unlock_luks_volume};
pub use mount::{mount_volume, unmount_volume};
pub use scan::{operable_node, removable_disks};
pub use volume::{
    EncryptionScheme, MountedVolume, Volume, VolumeHandle, MAPPED_NAME_PREFIX,
    MAPPED_VOLUME_PREFIX,
};
