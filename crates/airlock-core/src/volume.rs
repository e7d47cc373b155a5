//! Volume data model for export sessions.
//!
//! `Volume` values are replaced, never mutated: each state transition builds
//! a new value from the probe that observed it, so no stale `unlocked` flag
//! can survive a failed command.

use crate::error::{AirlockError, AirlockResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory under which decrypted mappings appear.
pub const MAPPED_VOLUME_PREFIX: &str = "/dev/mapper";

/// Prefix prepended to the header UUID to form the mapped name.
pub const MAPPED_NAME_PREFIX: &str = "luks-";

/// Supported volume-encryption schemes. Closed; reserved for future members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EncryptionScheme {
    Luks,
}

/// An encrypted volume on a removable device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    /// Raw or partition-qualified device path (e.g. `/dev/sda1`).
    pub device_name: String,
    /// Deterministic mapping name derived from the volume header UUID.
    pub mapped_name: String,
    pub encryption: EncryptionScheme,
    /// Whether the decrypted mapping existed when this value was built.
    pub unlocked: bool,
}

impl Volume {
    /// A volume whose mapping was absent at probe time.
    pub fn locked(device_name: impl Into<String>, mapped_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            mapped_name: mapped_name.into(),
            encryption: EncryptionScheme::Luks,
            unlocked: false,
        }
    }

    /// The same volume, observed with a live mapping.
    pub fn into_unlocked(self) -> Self {
        Self {
            unlocked: true,
            ..self
        }
    }

    /// The same volume, observed with the mapping removed.
    pub fn into_locked(self) -> Self {
        Self {
            unlocked: false,
            ..self
        }
    }

    /// Path of the decrypted block device exposed by the mapping.
    pub fn mapped_device_path(&self) -> PathBuf {
        Path::new(MAPPED_VOLUME_PREFIX).join(&self.mapped_name)
    }
}

/// A volume with a confirmed live filesystem mount.
///
/// Only constructible from an unlocked [`Volume`]; consumed by the cleanup
/// path, which hands back the bare `Volume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountedVolume {
    pub volume: Volume,
    /// Absolute path at which the volume's contents are accessible.
    pub mountpoint: PathBuf,
}

impl MountedVolume {
    pub fn from_volume(volume: Volume, mountpoint: PathBuf) -> AirlockResult<Self> {
        if !volume.unlocked {
            return Err(AirlockError::Mount(format!(
                "volume {} is not unlocked",
                volume.device_name
            )));
        }
        Ok(Self { volume, mountpoint })
    }

    /// Strip the mount information, keeping the unlocked volume.
    pub fn into_volume(self) -> Volume {
        self.volume
    }
}

/// Outcome of fetching a volume: still locked, or already live and mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeHandle {
    Locked(Volume),
    Mounted(MountedVolume),
}
