//! Host-operation contract for removable-media exports.
//!
//! Every interaction with the host (block-device enumeration, LUKS mapping
//! management, mounting, staging-data transfer) flows through [`DiskOps`].
//! Implementations shell out (the system provider), or replay scripted
//! responses (test fakes), so the sequencing logic stays testable.

use std::error::Error;
use std::path::{Path, PathBuf};

/// One block device as reported by the host's enumeration, before any
/// filtering. Recomputed on every scan, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDeviceRecord {
    /// Kernel device name (e.g. `sda`), without the `/dev/` prefix.
    pub name: String,
    /// Device type as reported by the host (`disk`, `part`, `crypt`, ...).
    pub device_type: String,
}

/// Result of attempting to open an encrypted mapping.
///
/// A rejected passphrase is a normal, expected outcome of the unlock flow
/// (the operator retypes it), so it is a value here rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    BadPassphrase,
}

/// Abstraction over the host operations required by an export session.
pub trait DiskOps {
    type Error: Error + Send + Sync + 'static;

    /// Enumerate all attached block devices with their reported type.
    fn list_block_devices(&self) -> Result<Vec<BlockDeviceRecord>, Self::Error>;

    /// Read the removability attribute for the named device.
    fn is_removable(&self, name: &str) -> Result<bool, Self::Error>;

    /// Return the type column of the partition layout for `device`,
    /// one entry per node (the device itself plus any partitions).
    fn partition_types(&self, device: &str) -> Result<Vec<String>, Self::Error>;

    /// Probe whether `device` is a LUKS volume. A `false` result is a
    /// classification outcome, not a failure.
    fn probe_luks(&self, device: &str) -> Result<bool, Self::Error>;

    /// Dump the LUKS header of `device` as text.
    fn luks_header_dump(&self, device: &str) -> Result<String, Self::Error>;

    /// Whether a live decrypted mapping currently exists for `mapped_name`.
    fn mapping_active(&self, mapped_name: &str) -> Result<bool, Self::Error>;

    /// Create the decrypted mapping for `device` under `mapped_name` using
    /// the supplied passphrase.
    fn open_mapping(
        &self,
        device: &str,
        mapped_name: &str,
        passphrase: &[u8],
    ) -> Result<UnlockOutcome, Self::Error>;

    /// Remove the decrypted mapping. Closing a mapping that is already gone
    /// must succeed.
    fn close_mapping(&self, mapped_name: &str) -> Result<(), Self::Error>;

    /// Return the live mountpoint for `device`, if any.
    fn current_mountpoint(&self, device: &Path) -> Result<Option<PathBuf>, Self::Error>;

    /// Create the mountpoint directory (and parents). Requires privilege.
    fn create_mountpoint(&self, path: &Path) -> Result<(), Self::Error>;

    /// Mount `device` at `mountpoint`. Requires privilege.
    fn mount(&self, device: &Path, mountpoint: &Path) -> Result<(), Self::Error>;

    /// Recursively hand ownership of `path` to `owner`. Requires privilege.
    fn chown_tree(&self, path: &Path, owner: &str) -> Result<(), Self::Error>;

    /// Unmount whatever is mounted at `mountpoint`. Requires privilege.
    fn unmount(&self, mountpoint: &Path) -> Result<(), Self::Error>;

    /// Flush filesystem buffers.
    fn sync_filesystems(&self) -> Result<(), Self::Error>;

    /// Create a directory (without parents) on the mounted volume.
    fn create_dir(&self, path: &Path) -> Result<(), Self::Error>;

    /// Recursively copy `source` into `dest`, overwriting same-named files.
    fn copy_tree(&self, source: &Path, dest: &Path) -> Result<(), Self::Error>;

    /// Recursively delete `path`. Deleting a path that is already gone must
    /// succeed.
    fn remove_tree(&self, path: &Path) -> Result<(), Self::Error>;
}
