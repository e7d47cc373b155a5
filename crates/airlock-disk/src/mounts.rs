//! Mountpoint discovery via the kernel mount table.

use airlock_core::error::AirlockResult;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const MOUNTS_OVERRIDE_ENV: &str = "AIRLOCK_MOUNTS_PATH";

/// Return the mountpoint `devnode` is currently mounted at, if any.
pub(crate) fn find_mount_point(devnode: &Path) -> AirlockResult<Option<PathBuf>> {
    let table = read_mount_table()?;
    let devnode = devnode.to_string_lossy();
    Ok(parse_mounts(&table, devnode.as_ref()))
}

fn read_mount_table() -> AirlockResult<String> {
    let path = env::var(MOUNTS_OVERRIDE_ENV).unwrap_or_else(|_| "/proc/mounts".to_string());
    Ok(fs::read_to_string(path)?)
}

fn parse_mounts(table: &str, devnode: &str) -> Option<PathBuf> {
    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) else {
            continue;
        };
        if device == devnode {
            return Some(PathBuf::from(unescape_mount_field(mountpoint)));
        }
    }
    None
}

/// `/proc/mounts` escapes whitespace and friends as three-digit octal.
fn unescape_mount_field(field: &str) -> String {
    let chars: Vec<char> = field.chars().collect();
    let mut output = String::with_capacity(field.len());
    let mut idx = 0;

    while idx < chars.len() {
        if chars[idx] == '\\' && idx + 3 < chars.len() {
            let oct: String = chars[idx + 1..idx + 4].iter().collect();
            if oct.chars().all(|ch| ch.is_ascii_digit()) {
                if let Ok(value) = u8::from_str_radix(&oct, 8) {
                    output.push(value as char);
                    idx += 4;
                    continue;
                }
            }
        }
        output.push(chars[idx]);
        idx += 1;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mounts_finds_matching_device() {
        let table = "/dev/mapper/luks-1234 /media/usb ext4 rw,relatime 0 0\n";
        let mount = parse_mounts(table, "/dev/mapper/luks-1234").unwrap();
        assert_eq!(mount, PathBuf::from("/media/usb"));
    }

    #[test]
    fn parse_mounts_returns_none_for_unmounted_device() {
        let table = "/dev/sda1 /boot ext4 rw 0 0\n";
        assert!(parse_mounts(table, "/dev/mapper/luks-1234").is_none());
    }

    #[test]
    fn unescape_mount_field_decodes_octals() {
        assert_eq!(
            unescape_mount_field("/media/EXPORT\\040DRIVE"),
            "/media/EXPORT DRIVE"
        );
        assert_eq!(unescape_mount_field("/media/usb"), "/media/usb");
    }

    #[test]
    fn trailing_backslash_passes_through() {
        assert_eq!(unescape_mount_field("/media/odd\\"), "/media/odd\\");
    }
}
