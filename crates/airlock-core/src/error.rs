//! Error taxonomy for export sessions.
//!
//! Every public operation fails with exactly one of these kinds. The detail
//! strings exist for internal logs; callers on the other side of the trust
//! boundary only ever see the stable status code.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type AirlockResult<T> = Result<T, AirlockError>;

#[derive(Debug, Error)]
pub enum AirlockError {
    /// A device-enumeration, partition-query, header-read, or unmount/relock
    /// command failed unexpectedly.
    #[error("device command failed: {0}")]
    Device(String),

    /// The device's structure is unsupported: multiple partitions, or an
    /// encryption header we cannot parse.
    #[error("unsupported device detected: {0}")]
    InvalidDevice(String),

    /// The decryption passphrase was rejected. Expected and recoverable:
    /// re-prompt and retry against the same volume.
    #[error("volume passphrase rejected: {0}")]
    UnlockFailed(String),

    /// Mount precondition or mount-related command failure.
    #[error("mount failed: {0}")]
    Mount(String),

    /// The data-copy step of an export failed.
    #[error("export write failed: {0}")]
    Export(String),

    /// The buffer-flush step of cleanup failed.
    #[error("export cleanup failed: {0}")]
    ExportCleanup(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient privileges: {0}")]
    Privilege(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AirlockError {
    /// Stable status token reported to the calling layer on exit.
    ///
    /// These tokens are the whole externally visible error surface; nothing
    /// else crosses the boundary.
    pub fn code(&self) -> &'static str {
        match self {
            AirlockError::Device(_) | AirlockError::Io(_) => "DEVICE_ERROR",
            AirlockError::InvalidDevice(_) => "INVALID_DEVICE_DETECTED",
            AirlockError::UnlockFailed(_) => "ERROR_UNLOCK_LUKS",
            AirlockError::Mount(_) => "ERROR_MOUNT",
            AirlockError::Export(_) => "ERROR_EXPORT",
            AirlockError::ExportCleanup(_) => "ERROR_EXPORT_CLEANUP",
            AirlockError::InvalidConfig(_) | AirlockError::Privilege(_) => "ERROR_GENERIC",
        }
    }

    /// Whether the caller may retry the same operation with new operator
    /// input (today: only a rejected passphrase).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AirlockError::UnlockFailed(_))
    }
}
