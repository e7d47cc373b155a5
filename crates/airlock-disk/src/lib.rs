//! System provider for removable-media exports.
//!
//! Integrates with the host via:
//! - `lsblk` (device enumeration, partition layout)
//! - `cryptsetup` (probe/dump/open/close)
//! - `/proc/mounts`, `mount`/`umount`/`chown`/`sync`

mod command;
mod mounts;
mod system;

pub use system::SystemDiskProvider;
