//! System-backed `DiskOps` implementation.
//!
//! Wraps `lsblk`, `cryptsetup`, and the mount toolchain. Binary locations
//! come from configuration overrides, well-known paths, then `PATH`. The
//! commands that talk to the device mapper or the mount table escalate via
//! `sudo` when the process is not already root; read-only probes never do.

use crate::command::{output_diagnostic, CryptsetupCommand, HostCommand, Output};
use crate::mounts::find_mount_point;
use airlock_core::config::AirlockConfig;
use airlock_core::error::{AirlockError, AirlockResult};
use airlock_provider::{BlockDeviceRecord, DiskOps, UnlockOutcome};
use log::debug;
use serde::Deserialize;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const DEFAULT_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/sbin/cryptsetup",
    "/bin/cryptsetup",
];
const DEFAULT_LSBLK_PATHS: &[&str] = &["/usr/bin/lsblk", "/bin/lsblk"];
const DEFAULT_MOUNT_PATHS: &[&str] = &["/usr/bin/mount", "/bin/mount"];
const DEFAULT_UMOUNT_PATHS: &[&str] = &["/usr/bin/umount", "/bin/umount"];
const DEFAULT_MKDIR_PATHS: &[&str] = &["/usr/bin/mkdir", "/bin/mkdir"];
const DEFAULT_CHOWN_PATHS: &[&str] = &["/usr/bin/chown", "/bin/chown"];
const DEFAULT_SYNC_PATHS: &[&str] = &["/usr/bin/sync", "/bin/sync"];
const DEFAULT_SUDO_PATHS: &[&str] = &["/usr/bin/sudo", "/bin/sudo"];

const SYS_BLOCK_ROOT: &str = "/sys/class/block";

/// System provider that manages removable volumes via host binaries.
#[derive(Debug, Clone)]
pub struct SystemDiskProvider {
    cryptsetup: CryptsetupCommand,
    lsblk: HostCommand,
    mount: HostCommand,
    umount: HostCommand,
    mkdir: HostCommand,
    chown: HostCommand,
    sync: HostCommand,
}

impl SystemDiskProvider {
    /// Build a provider from configuration, resolving every host binary up
    /// front so a missing tool surfaces before any device is touched.
    pub fn from_config(config: &AirlockConfig) -> AirlockResult<Self> {
        let timeout = config.command_timeout();
        let sudo = resolve_optional(DEFAULT_SUDO_PATHS);

        let escalated = |path: PathBuf| HostCommand::new(path, timeout, true, sudo.clone());
        let plain = |path: PathBuf| HostCommand::new(path, timeout, false, None);

        Ok(Self {
            cryptsetup: CryptsetupCommand::new(escalated(resolve_binary(
                config.disk.cryptsetup_path.as_deref(),
                DEFAULT_CRYPTSETUP_PATHS,
                "cryptsetup",
            )?)),
            lsblk: plain(resolve_binary(
                config.disk.lsblk_path.as_deref(),
                DEFAULT_LSBLK_PATHS,
                "lsblk",
            )?),
            mount: escalated(resolve_binary(None, DEFAULT_MOUNT_PATHS, "mount")?),
            umount: escalated(resolve_binary(None, DEFAULT_UMOUNT_PATHS, "umount")?),
            mkdir: escalated(resolve_binary(None, DEFAULT_MKDIR_PATHS, "mkdir")?),
            chown: escalated(resolve_binary(None, DEFAULT_CHOWN_PATHS, "chown")?),
            sync: plain(resolve_binary(None, DEFAULT_SYNC_PATHS, "sync")?),
        })
    }
}

impl DiskOps for SystemDiskProvider {
    type Error = AirlockError;

    fn list_block_devices(&self) -> AirlockResult<Vec<BlockDeviceRecord>> {
        let out = run_checked(&self.lsblk, &["--json", "-o", "NAME,TYPE"])?;
        let decoded: LsblkResponse = serde_json::from_str(&out.stdout).map_err(|err| {
            AirlockError::Device(format!("failed to parse lsblk JSON output: {err}"))
        })?;

        let mut records = Vec::new();
        for node in &decoded.blockdevices {
            collect_records(node, &mut records);
        }
        Ok(records)
    }

    fn is_removable(&self, name: &str) -> AirlockResult<bool> {
        let attr = Path::new(SYS_BLOCK_ROOT).join(name).join("removable");
        let contents = fs::read_to_string(&attr).map_err(|err| {
            AirlockError::Device(format!("unable to read {}: {err}", attr.display()))
        })?;
        match contents.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(AirlockError::Device(format!(
                "unexpected removable attribute `{other}` for {name}"
            ))),
        }
    }

    fn partition_types(&self, device: &str) -> AirlockResult<Vec<String>> {
        let out = run_checked(&self.lsblk, &["-o", "TYPE", "--noheadings", device])?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn probe_luks(&self, device: &str) -> AirlockResult<bool> {
        self.cryptsetup.probe_luks(device)
    }

    fn luks_header_dump(&self, device: &str) -> AirlockResult<String> {
        self.cryptsetup.header_dump(device)
    }

    fn mapping_active(&self, mapped_name: &str) -> AirlockResult<bool> {
        Ok(self.cryptsetup.mapping_active(mapped_name))
    }

    fn open_mapping(
        &self,
        device: &str,
        mapped_name: &str,
        passphrase: &[u8],
    ) -> AirlockResult<UnlockOutcome> {
        self.cryptsetup.open(device, mapped_name, passphrase)
    }

    fn close_mapping(&self, mapped_name: &str) -> AirlockResult<()> {
        self.cryptsetup.close(mapped_name)
    }

    fn current_mountpoint(&self, device: &Path) -> AirlockResult<Option<PathBuf>> {
        find_mount_point(device)
    }

    fn create_mountpoint(&self, path: &Path) -> AirlockResult<()> {
        let path = path_arg(path);
        run_checked(&self.mkdir, &["-p", path.as_str()]).map(|_| ())
    }

    fn mount(&self, device: &Path, mountpoint: &Path) -> AirlockResult<()> {
        let device = path_arg(device);
        let mountpoint = path_arg(mountpoint);
        run_checked(&self.mount, &[device.as_str(), mountpoint.as_str()]).map(|_| ())
    }

    fn chown_tree(&self, path: &Path, owner: &str) -> AirlockResult<()> {
        let path = path_arg(path);
        run_checked(&self.chown, &["-R", owner, path.as_str()]).map(|_| ())
    }

    fn unmount(&self, mountpoint: &Path) -> AirlockResult<()> {
        let mountpoint = path_arg(mountpoint);
        run_checked(&self.umount, &[mountpoint.as_str()]).map(|_| ())
    }

    fn sync_filesystems(&self) -> AirlockResult<()> {
        run_checked(&self.sync, &[]).map(|_| ())
    }

    fn create_dir(&self, path: &Path) -> AirlockResult<()> {
        Ok(fs::create_dir(path)?)
    }

    fn copy_tree(&self, source: &Path, dest: &Path) -> AirlockResult<()> {
        let Some(leaf) = source.file_name() else {
            return Err(AirlockError::Device(format!(
                "copy source {} has no final component",
                source.display()
            )));
        };
        debug!(
            "copying {} into {}",
            source.display(),
            dest.display()
        );
        copy_recursive(source, &dest.join(leaf))
    }

    fn remove_tree(&self, path: &Path) -> AirlockResult<()> {
        remove_tree_at(path)
    }
}

fn remove_tree_at(path: &Path) -> AirlockResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn run_checked(command: &HostCommand, args: &[&str]) -> AirlockResult<Output> {
    let out = command.run(args, None)?;
    if out.status != 0 {
        return Err(AirlockError::Device(format!(
            "{} {} exited with code {}: {}",
            command.binary().display(),
            args.join(" "),
            out.status,
            output_diagnostic(&out)
        )));
    }
    Ok(out)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn resolve_binary(
    configured: Option<&str>,
    candidates: &[&str],
    name: &str,
) -> AirlockResult<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|path| !path.is_empty()) {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(AirlockError::InvalidConfig(format!(
                "{name} binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    resolve_optional(candidates)
        .or_else(|| find_in_path(name))
        .ok_or_else(|| {
            AirlockError::InvalidConfig(format!(
                "unable to locate {name} binary; tried {candidates:?} and PATH"
            ))
        })
}

fn resolve_optional(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        candidate.exists().then_some(candidate)
    })
}

fn copy_recursive(source: &Path, dest: &Path) -> AirlockResult<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LsblkResponse {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

fn collect_records(node: &LsblkNode, out: &mut Vec<BlockDeviceRecord>) {
    if let (Some(name), Some(device_type)) = (&node.name, &node.device_type) {
        out.push(BlockDeviceRecord {
            name: name.clone(),
            device_type: device_type.clone(),
        });
    }
    for child in &node.children {
        collect_records(child, out);
    }
}
