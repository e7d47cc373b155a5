//! Configuration model and helpers used by Airlock services.

use crate::error::{AirlockError, AirlockResult};
use directories_next::ProjectDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/airlock.toml";
const BOOTSTRAP_FILE_NAME: &str = "airlock.toml";
const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "Airlock";
const APP_NAME: &str = "airlock";

/// Default mountpoint used when the drive is not already mounted manually by
/// the operator.
pub const DEFAULT_MOUNTPOINT: &str = "/media/usb";

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirlockConfig {
    #[serde(default)]
    pub disk: DiskCfg,

    #[serde(default)]
    pub export: ExportCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

/// Host-binary overrides and external-command policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCfg {
    /// Explicit path to `cryptsetup`; autodetected when unset.
    pub cryptsetup_path: Option<String>,

    /// Explicit path to `lsblk`; autodetected when unset.
    pub lsblk_path: Option<String>,

    /// Watchdog timeout applied to every external command, in seconds.
    /// A command exceeding it is killed and reported as a device error.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Export-session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportCfg {
    /// Mountpoint used when the volume is not already mounted.
    #[serde(default = "default_mountpoint")]
    pub mountpoint: PathBuf,

    /// `user:group` handed ownership of the mountpoint tree after mounting,
    /// so the unprivileged session can write the export.
    #[serde(default = "default_mount_owner")]
    pub mount_owner: String,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_mountpoint() -> PathBuf {
    PathBuf::from(DEFAULT_MOUNTPOINT)
}

fn default_mount_owner() -> String {
    "user:user".to_string()
}

impl Default for DiskCfg {
    fn default() -> Self {
        Self {
            cryptsetup_path: None,
            lsblk_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExportCfg {
    fn default() -> Self {
        Self {
            mountpoint: default_mountpoint(),
            mount_owner: default_mount_owner(),
        }
    }
}

impl Default for AirlockConfig {
    fn default() -> Self {
        Self {
            disk: DiskCfg::default(),
            export: ExportCfg::default(),
            path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

impl AirlockConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> AirlockResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            AirlockError::InvalidConfig(format!("unable to read {}: {err}", path.display()))
        })?;
        let mut config: AirlockConfig = toml::from_str(&contents).map_err(|err| {
            AirlockError::InvalidConfig(format!("unable to parse {}: {err}", path.display()))
        })?;
        config.path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to built-in defaults when the file
    /// is missing. Checks the per-user path before giving up on the global
    /// one.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AirlockResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        if target == Self::default_path() {
            if let Some(user_path) = Self::user_config_path() {
                if user_path.exists() {
                    info!(
                        "configuration missing at {}; using {}",
                        target.display(),
                        user_path.display()
                    );
                    return Self::load(user_path);
                }
            }
        }

        info!(
            "configuration missing at {}; using built-in defaults",
            target.display()
        );
        Ok(Self {
            path: target.to_path_buf(),
            ..Self::default()
        })
    }

    /// Watchdog timeout applied to external commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.disk.timeout_secs.max(1))
    }

    fn validate(&self) -> AirlockResult<()> {
        if !self.export.mountpoint.is_absolute() {
            return Err(AirlockError::InvalidConfig(format!(
                "export.mountpoint must be an absolute path (got {})",
                self.export.mountpoint.display()
            )));
        }
        let owner = self.export.mount_owner.trim();
        if owner.is_empty() || owner.contains(char::is_whitespace) {
            return Err(AirlockError::InvalidConfig(format!(
                "export.mount_owner must be a user or user:group token (got `{owner}`)"
            )));
        }
        Ok(())
    }
}
