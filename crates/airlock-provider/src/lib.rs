#![forbid(unsafe_code)]

//! Provider contracts shared across Airlock.
//!
//! The rest of the workspace is free to define the export pipeline and
//! operator surfaces without depending on concrete system integrations.

pub mod disk;

pub use disk::{BlockDeviceRecord, DiskOps, UnlockOutcome};
