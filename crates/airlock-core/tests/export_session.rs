//! End-to-end export pipeline tests against a scripted disk provider.
//!
//! The mock records every mutating call so the tests can assert not just
//! outcomes but also that forbidden commands were never issued.

use airlock_core::config::AirlockConfig;
use airlock_core::error::{AirlockError, AirlockResult};
use airlock_core::volume::{MountedVolume, Volume, VolumeHandle};
use airlock_core::{export, luks, mount, scan};
use airlock_provider::{BlockDeviceRecord, DiskOps, UnlockOutcome};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

#[derive(Default)]
struct MockState {
    devices: Vec<BlockDeviceRecord>,
    removable: HashMap<String, bool>,
    partitions: HashMap<String, Vec<String>>,
    luks_devices: HashSet<String>,
    headers: HashMap<String, String>,
    accepted_passphrase: Vec<u8>,
    active_mappings: HashSet<String>,
    mounts: HashMap<PathBuf, PathBuf>,
    calls: Vec<String>,
    fail_unmount: bool,
    fail_copy: bool,
}

#[derive(Clone, Default)]
struct MockDisk {
    state: Arc<Mutex<MockState>>,
}

impl MockDisk {
    fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn calls(&self) -> Vec<String> {
        self.with(|state| state.calls.clone())
    }

    fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("probe"))
            .collect()
    }

    fn mapping_is_active(&self, name: &str) -> bool {
        self.with(|state| state.active_mappings.contains(name))
    }
}

impl DiskOps for MockDisk {
    type Error = AirlockError;

    fn list_block_devices(&self) -> AirlockResult<Vec<BlockDeviceRecord>> {
        Ok(self.with(|state| state.devices.clone()))
    }

    fn is_removable(&self, name: &str) -> AirlockResult<bool> {
        self.with(|state| {
            state.removable.get(name).copied().ok_or_else(|| {
                AirlockError::Device(format!("no removable attribute for {name}"))
            })
        })
    }

    fn partition_types(&self, device: &str) -> AirlockResult<Vec<String>> {
        self.with(|state| {
            state
                .partitions
                .get(device)
                .cloned()
                .ok_or_else(|| AirlockError::Device(format!("unknown device {device}")))
        })
    }

    fn probe_luks(&self, device: &str) -> AirlockResult<bool> {
        self.with(|state| {
            state.calls.push(format!("probe_luks {device}"));
            Ok(state.luks_devices.contains(device))
        })
    }

    fn luks_header_dump(&self, device: &str) -> AirlockResult<String> {
        self.with(|state| {
            state
                .headers
                .get(device)
                .cloned()
                .ok_or_else(|| AirlockError::Device(format!("luksDump failed for {device}")))
        })
    }

    fn mapping_active(&self, mapped_name: &str) -> AirlockResult<bool> {
        Ok(self.with(|state| state.active_mappings.contains(mapped_name)))
    }

    fn open_mapping(
        &self,
        device: &str,
        mapped_name: &str,
        passphrase: &[u8],
    ) -> AirlockResult<UnlockOutcome> {
        self.with(|state| {
            state.calls.push(format!("open {device} {mapped_name}"));
            if passphrase == state.accepted_passphrase.as_slice() {
                state.active_mappings.insert(mapped_name.to_string());
                Ok(UnlockOutcome::Unlocked)
            } else {
                Ok(UnlockOutcome::BadPassphrase)
            }
        })
    }

    fn close_mapping(&self, mapped_name: &str) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push(format!("close {mapped_name}"));
            state.active_mappings.remove(mapped_name);
            Ok(())
        })
    }

    fn current_mountpoint(&self, device: &Path) -> AirlockResult<Option<PathBuf>> {
        Ok(self.with(|state| state.mounts.get(device).cloned()))
    }

    fn create_mountpoint(&self, path: &Path) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push(format!("mkdir {}", path.display()));
            Ok(())
        })
    }

    fn mount(&self, device: &Path, mountpoint: &Path) -> AirlockResult<()> {
        self.with(|state| {
            state
                .calls
                .push(format!("mount {} {}", device.display(), mountpoint.display()));
            state
                .mounts
                .insert(device.to_path_buf(), mountpoint.to_path_buf());
            Ok(())
        })
    }

    fn chown_tree(&self, path: &Path, owner: &str) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push(format!("chown {owner} {}", path.display()));
            Ok(())
        })
    }

    fn unmount(&self, mountpoint: &Path) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push(format!("umount {}", mountpoint.display()));
            if state.fail_unmount {
                return Err(AirlockError::Device("target is busy".into()));
            }
            state.mounts.retain(|_, mp| mp.as_path() != mountpoint);
            Ok(())
        })
    }

    fn sync_filesystems(&self) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push("sync".into());
            Ok(())
        })
    }

    fn create_dir(&self, path: &Path) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push(format!("create_dir {}", path.display()));
            Ok(())
        })
    }

    fn copy_tree(&self, source: &Path, dest: &Path) -> AirlockResult<()> {
        self.with(|state| {
            state
                .calls
                .push(format!("copy {} {}", source.display(), dest.display()));
            if state.fail_copy {
                return Err(AirlockError::Device("short write".into()));
            }
            Ok(())
        })
    }

    fn remove_tree(&self, path: &Path) -> AirlockResult<()> {
        self.with(|state| {
            state.calls.push(format!("remove {}", path.display()));
            Ok(())
        })
    }
}

fn test_config(mountpoint: &TempDir) -> AirlockConfig {
    let mut config = AirlockConfig::default();
    config.export.mountpoint = mountpoint.path().to_path_buf();
    config
}

/// A single-partition LUKS device with UUID `abcd-0001`, passphrase
/// `correct horse`.
fn scripted_device(disk: &MockDisk) {
    disk.with(|state| {
        state.devices = vec![
            BlockDeviceRecord {
                name: "sdx".into(),
                device_type: "disk".into(),
            },
            BlockDeviceRecord {
                name: "sdx1".into(),
                device_type: "part".into(),
            },
        ];
        state.removable.insert("sdx".into(), true);
        state
            .partitions
            .insert("/dev/sdx".into(), vec!["disk".into(), "part".into()]);
        state.luks_devices.insert("/dev/sdx1".into());
        state.headers.insert(
            "/dev/sdx1".into(),
            "LUKS header information\nVersion:       \t2\nUUID:          \tabcd-0001\n".into(),
        );
        state.accepted_passphrase = b"correct horse".to_vec();
    });
}

#[test]
fn scanner_filters_disks_and_demotes_failed_probes() {
    let disk = MockDisk::new();
    disk.with(|state| {
        state.devices = vec![
            BlockDeviceRecord {
                name: "sda".into(),
                device_type: "disk".into(),
            },
            BlockDeviceRecord {
                name: "sda1".into(),
                device_type: "part".into(),
            },
            BlockDeviceRecord {
                name: "sdb".into(),
                device_type: "disk".into(),
            },
            BlockDeviceRecord {
                name: "sdc".into(),
                device_type: "disk".into(),
            },
        ];
        state.removable.insert("sda".into(), false);
        state.removable.insert("sdb".into(), true);
        // no attribute for sdc: the probe fails and sdc is skipped
    });

    let found = scan::removable_disks(&disk).unwrap();
    assert_eq!(found, vec!["/dev/sdb".to_string()]);
}

#[test]
fn zero_partitions_returns_path_unchanged() {
    let disk = MockDisk::new();
    disk.with(|state| {
        state
            .partitions
            .insert("/dev/sdx".into(), vec!["disk".into()]);
    });
    assert_eq!(scan::operable_node(&disk, "/dev/sdx").unwrap(), "/dev/sdx");
}

#[test]
fn one_partition_appends_index_suffix() {
    let disk = MockDisk::new();
    disk.with(|state| {
        state
            .partitions
            .insert("/dev/sdx".into(), vec!["disk".into(), "part".into()]);
    });
    assert_eq!(scan::operable_node(&disk, "/dev/sdx").unwrap(), "/dev/sdx1");
}

#[test]
fn multiple_partitions_are_rejected_before_any_mutation() {
    let disk = MockDisk::new();
    disk.with(|state| {
        state.partitions.insert(
            "/dev/sdx".into(),
            vec!["disk".into(), "part".into(), "part".into()],
        );
    });

    let err = scan::operable_node(&disk, "/dev/sdx").expect_err("expected rejection");
    assert!(matches!(err, AirlockError::InvalidDevice(_)));
    assert!(
        disk.mutating_calls().is_empty(),
        "no mutating command may be issued for a multi-partition device"
    );
}

#[test]
fn fetch_returns_locked_volume_when_no_mapping_exists() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);

    let node = scan::operable_node(&disk, "/dev/sdx").unwrap();
    assert_eq!(node, "/dev/sdx1");
    assert!(luks::is_luks_volume(&disk, &node).unwrap());

    match luks::get_luks_volume(&disk, &config, &node).unwrap() {
        VolumeHandle::Locked(volume) => {
            assert_eq!(volume.device_name, "/dev/sdx1");
            assert_eq!(volume.mapped_name, "luks-abcd-0001");
            assert!(!volume.unlocked);
        }
        VolumeHandle::Mounted(_) => panic!("volume must be locked"),
    }
}

#[test]
fn unlock_and_mount_at_default_mountpoint() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);

    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001");
    let unlocked = luks::unlock_luks_volume(&disk, volume, b"correct horse").unwrap();
    assert!(unlocked.unlocked);
    assert_eq!(unlocked.mapped_name, "luks-abcd-0001");

    let mounted = mount::mount_volume(&disk, &config, unlocked).unwrap();
    assert_eq!(mounted.mountpoint, mountpoint.path());
    let calls = disk.calls();
    assert!(calls
        .iter()
        .any(|call| call.starts_with("mount /dev/mapper/luks-abcd-0001")));
    assert!(calls.iter().any(|call| call.starts_with("chown user:user")));
}

#[test]
fn wrong_passphrase_is_recoverable_and_leaves_volume_locked() {
    let disk = MockDisk::new();
    scripted_device(&disk);

    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001");
    let err = luks::unlock_luks_volume(&disk, volume.clone(), b"wrong")
        .expect_err("expected rejection");
    assert!(matches!(err, AirlockError::UnlockFailed(_)));
    assert!(err.is_recoverable());
    assert!(!disk.mapping_is_active("luks-abcd-0001"));

    // The same volume value retries successfully.
    let unlocked = luks::unlock_luks_volume(&disk, volume, b"correct horse").unwrap();
    assert!(unlocked.unlocked);
}

#[test]
fn existing_mountpoint_is_reused_without_a_mount_command() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);
    let manual_mount = tempdir().unwrap();

    disk.with(|state| {
        state.active_mappings.insert("luks-abcd-0001".into());
        state.mounts.insert(
            PathBuf::from("/dev/mapper/luks-abcd-0001"),
            manual_mount.path().to_path_buf(),
        );
    });

    // Fetch sees the live mapping and returns the existing mount untouched.
    match luks::get_luks_volume(&disk, &config, "/dev/sdx1").unwrap() {
        VolumeHandle::Mounted(mounted) => {
            assert_eq!(mounted.mountpoint, manual_mount.path());
        }
        VolumeHandle::Locked(_) => panic!("volume must be mounted"),
    }
    assert!(
        !disk.calls().iter().any(|call| call.starts_with("mount ")),
        "an existing mount must never be re-mounted"
    );
}

#[test]
fn unlock_then_cleanup_round_trips_to_locked() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);
    let staging = tempdir().unwrap();

    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001");
    let unlocked = luks::unlock_luks_volume(&disk, volume, b"correct horse").unwrap();
    assert!(disk.mapping_is_active("luks-abcd-0001"));

    let mounted = mount::mount_volume(&disk, &config, unlocked).unwrap();
    export::cleanup_drive_and_tmpdir(&disk, mounted, staging.path()).unwrap();

    assert!(
        !disk.mapping_is_active("luks-abcd-0001"),
        "device must be indistinguishable from its original locked state"
    );
}

#[test]
fn export_writes_then_always_cleans_up() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);
    let staging = tempdir().unwrap();
    std::fs::create_dir(staging.path().join("export_data")).unwrap();

    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001");
    let unlocked = luks::unlock_luks_volume(&disk, volume, b"correct horse").unwrap();
    let mounted = mount::mount_volume(&disk, &config, unlocked).unwrap();

    export::write_data_to_device(&disk, staging.path(), "sd-export", mounted).unwrap();

    let calls = disk.calls();
    let target = mountpoint.path().join("sd-export");
    assert!(calls.contains(&format!("create_dir {}", target.display())));
    assert!(calls.iter().any(|call| call.starts_with("copy ")));
    assert!(calls.contains(&"sync".to_string()));
    assert!(calls.contains(&format!("umount {}", mountpoint.path().display())));
    assert!(calls.contains(&"close luks-abcd-0001".to_string()));
    assert!(calls.contains(&format!("remove {}", staging.path().display())));
    assert!(!disk.mapping_is_active("luks-abcd-0001"));
}

#[test]
fn failed_copy_still_relocks_and_removes_staging() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);
    let staging = tempdir().unwrap();

    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001");
    let unlocked = luks::unlock_luks_volume(&disk, volume, b"correct horse").unwrap();
    let mounted = mount::mount_volume(&disk, &config, unlocked).unwrap();

    disk.with(|state| state.fail_copy = true);
    let err = export::write_data_to_device(&disk, staging.path(), "sd-export", mounted)
        .expect_err("copy failure must surface");
    assert!(matches!(err, AirlockError::Export(_)));

    let calls = disk.calls();
    assert!(calls.contains(&"close luks-abcd-0001".to_string()));
    assert!(calls.contains(&format!("remove {}", staging.path().display())));
    assert!(!disk.mapping_is_active("luks-abcd-0001"));
}

#[test]
fn cleanup_is_best_effort_when_unmount_fails() {
    let disk = MockDisk::new();
    scripted_device(&disk);
    let mountpoint = tempdir().unwrap();
    let config = test_config(&mountpoint);
    let staging = tempdir().unwrap();

    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001");
    let unlocked = luks::unlock_luks_volume(&disk, volume, b"correct horse").unwrap();
    let mounted = mount::mount_volume(&disk, &config, unlocked).unwrap();

    disk.with(|state| state.fail_unmount = true);
    let err = export::cleanup_drive_and_tmpdir(&disk, mounted, staging.path())
        .expect_err("unmount failure must surface");
    assert!(matches!(err, AirlockError::Device(_)));

    let calls = disk.calls();
    assert!(
        calls.contains(&"close luks-abcd-0001".to_string()),
        "relock must still be attempted"
    );
    assert!(
        calls.contains(&format!("remove {}", staging.path().display())),
        "staging removal must still be attempted"
    );
}

#[test]
fn unmount_is_a_noop_when_mountpoint_is_gone() {
    let disk = MockDisk::new();
    let volume = Volume::locked("/dev/sdx1", "luks-abcd-0001").into_unlocked();
    let mounted =
        MountedVolume::from_volume(volume, PathBuf::from("/nonexistent/airlock-mount")).unwrap();

    let stripped = mount::unmount_volume(&disk, mounted).unwrap();
    assert!(stripped.unlocked);
    assert!(
        !disk.calls().iter().any(|call| call.starts_with("umount")),
        "no unmount command for an already-unmounted volume"
    );
}
