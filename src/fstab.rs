// src/fstab.rs

//! Mount table generation
//!
//! Picks the boot and root partitions from the firmware mode and device
//! split, probes their UUIDs, and renders fstab lines with fixed-width
//! columns. The text is appended to `etc/fstab` of the image, never written
//! over it.

use crate::config::{BuildConfig, FsKind};
use crate::device::partition_path;
use crate::error::{Error, Result};
use crate::filesystem::btrfs;
use crate::host::{FsIdentity, Host};
use crate::partition::{boot_partition_index, root_partition_index};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FAT_OPTIONS: &str = "rw,relatime,fmask=0022,dmask=0022,codepage=437";
const FAT_OPTIONS_TAIL: &str = "shortname=mixed,utf8,errors=remount-ro";
const BOOT_OPTIONS: &str = "rw,relatime,errors=remount-ro";

/// Boot and root partition device paths for a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTargets {
    pub boot: String,
    pub root: String,
}

/// Which partitions hold `/boot` and `/`
///
/// - uefi: boot 2, root 3, both on `disk`
/// - legacy: boot 1, root 2, both on `disk`
/// - legacy split: boot 1 on `disk`, root 1 on `alt_disk` (root 2 on `disk`
///   when no alt disk is given)
pub fn mount_targets(disk: &str, alt_disk: Option<&str>, config: &BuildConfig) -> MountTargets {
    let boot = partition_path(disk, boot_partition_index(config.firmware));
    let split = config.split_device && !config.firmware.is_uefi();

    let root = match (split, alt_disk) {
        (true, Some(alt)) => partition_path(alt, root_partition_index(config.firmware, true)),
        (true, None) => partition_path(disk, root_partition_index(config.firmware, false)),
        (false, _) => partition_path(disk, root_partition_index(config.firmware, false)),
    };

    MountTargets { boot, root }
}

/// One fstab line with aligned columns
fn fstab_line(spec: &str, mount_point: &str, fstype: &str, options: &str, pass: u8) -> String {
    format!(
        "{:<41} {:<21} {:<5} {} 0 {}\n",
        spec, mount_point, fstype, options, pass
    )
}

/// Mount options for the boot partition
pub fn boot_options(boot: &FsIdentity, simple_boot_options: bool) -> String {
    if boot.is_fat() {
        let charset = if simple_boot_options { "" } else { "iocharset=ascii," };
        format!("{},{}{}", FAT_OPTIONS, charset, FAT_OPTIONS_TAIL)
    } else {
        BOOT_OPTIONS.to_string()
    }
}

/// Render mount table lines from already probed identities
pub fn render(
    root: &FsIdentity,
    boot: &FsIdentity,
    config: &BuildConfig,
    simple_boot_options: bool,
) -> String {
    let mut text = String::new();
    let root_spec = root.uuid_spec();

    match config.filesystem {
        FsKind::Ext4 => text.push_str(&fstab_line(&root_spec, "/", "ext4", "defaults", 0)),
        FsKind::Btrfs => {
            for subvol in btrfs::subvolumes(config.base) {
                text.push_str(&fstab_line(
                    &root_spec,
                    subvol.mount_point,
                    "btrfs",
                    &subvol.fstab_options(),
                    0,
                ));
            }
        }
    }

    text.push_str(&fstab_line(
        &boot.uuid_spec(),
        config.boot_mount_point(),
        &boot.fstype,
        &boot_options(boot, simple_boot_options),
        2,
    ));
    text
}

/// Probe a partition, failing when it has no UUID
pub fn probe_required(host: &(impl Host + ?Sized), partition: &str) -> Result<FsIdentity> {
    host.probe(partition)?
        .ok_or_else(|| Error::Probe(format!("no filesystem UUID found on {}", partition)))
}

/// Probe the boot and root partitions and render the mount table
pub fn generate(
    disk: &str,
    alt_disk: Option<&str>,
    config: &BuildConfig,
    simple_boot_options: bool,
    host: &(impl Host + ?Sized),
) -> Result<String> {
    let targets = mount_targets(disk, alt_disk, config);
    debug!("Mount table: boot {} root {}", targets.boot, targets.root);

    let root = probe_required(host, &targets.root)?;
    let boot = probe_required(host, &targets.boot)?;

    Ok(render(&root, &boot, config, simple_boot_options))
}

/// Append `text` to `<mount_root>/etc/fstab`
pub fn append_mount_table(mount_root: &Path, text: &str) -> Result<PathBuf> {
    let etc = mount_root.join("etc");
    fs::create_dir_all(&etc)?;
    let path = etc.join("fstab");

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(text.as_bytes())?;

    info!("Appended {} entries to {}", text.lines().count(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FirmwareMode;
    use crate::host::RecordingHost;
    use crate::partition::preset;
    use crate::partition::LayoutPreset;

    const ROOT_UUID: &str = "5a3c9d7e-1b2f-4c8a-9e6d-0f1a2b3c4d5e";

    fn boot_fat() -> FsIdentity {
        FsIdentity::new("7A1B-2C3D", "vfat")
    }

    #[test]
    fn test_mount_targets() {
        let uefi = BuildConfig::new("x86_64").with_firmware(FirmwareMode::Uefi);
        assert_eq!(
            mount_targets("/dev/loop0", None, &uefi),
            MountTargets {
                boot: "/dev/loop0p2".to_string(),
                root: "/dev/loop0p3".to_string()
            }
        );

        let legacy = BuildConfig::new("x86_64");
        let t = mount_targets("/dev/loop0", Some("/dev/loop1"), &legacy);
        assert_eq!((t.boot.as_str(), t.root.as_str()), ("/dev/loop0p1", "/dev/loop0p2"));

        let split = legacy.with_split_device(preset(LayoutPreset::BootOnly));
        let t = mount_targets("/dev/loop0", Some("/dev/loop1"), &split);
        assert_eq!((t.boot.as_str(), t.root.as_str()), ("/dev/loop0p1", "/dev/loop1p1"));
        let t = mount_targets("/dev/loop0", None, &split);
        assert_eq!(t.root, "/dev/loop0p2");
    }

    #[test]
    fn test_ext4_render() {
        let config = BuildConfig::new("x86_64");
        let text = render(&FsIdentity::new(ROOT_UUID, "ext4"), &boot_fat(), &config, false);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0].split_whitespace().collect::<Vec<_>>(),
            vec![&format!("UUID={}", ROOT_UUID)[..], "/", "ext4", "defaults", "0", "0"]
        );
        assert!(lines[1].contains(" /boot "));
        assert!(lines[1].ends_with("errors=remount-ro 0 2"));
    }

    #[test]
    fn test_columns_align() {
        let config = BuildConfig::new("x86_64").with_filesystem(FsKind::Btrfs);
        let text = render(&FsIdentity::new(ROOT_UUID, "btrfs"), &boot_fat(), &config, false);
        for line in text.lines() {
            assert_eq!(&line[41..42], " ", "{}", line);
            assert_eq!(&line[63..64], " ", "{}", line);
        }
    }

    #[test]
    fn test_btrfs_render() {
        let config = BuildConfig::new("x86_64").with_filesystem(FsKind::Btrfs);
        let text = render(&FsIdentity::new(ROOT_UUID, "btrfs"), &boot_fat(), &config, false);
        let btrfs_lines: Vec<_> = text.lines().filter(|l| l.contains(" btrfs ")).collect();
        assert_eq!(btrfs_lines.len(), 5);
        assert!(btrfs_lines.iter().all(|l| l.starts_with(&format!("UUID={}", ROOT_UUID))));

        let root_line = btrfs_lines.iter().find(|l| l.contains("subvol=/@ ")).unwrap();
        assert!(!root_line.contains("discard=async"));
        assert!(root_line.contains(" / "));
    }

    #[test]
    fn test_boot_options() {
        let fat = boot_fat();
        assert_eq!(
            boot_options(&fat, false),
            "rw,relatime,fmask=0022,dmask=0022,codepage=437,iocharset=ascii,shortname=mixed,utf8,errors=remount-ro"
        );
        assert_eq!(
            boot_options(&fat, true),
            "rw,relatime,fmask=0022,dmask=0022,codepage=437,shortname=mixed,utf8,errors=remount-ro"
        );
        assert_eq!(
            boot_options(&FsIdentity::new("x", "ext2"), false),
            "rw,relatime,errors=remount-ro"
        );
    }

    #[test]
    fn test_generate_probe_failure() {
        let host = RecordingHost::new().with_identity("/dev/loop0p2", ROOT_UUID, "ext4");
        let err = generate("/dev/loop0", None, &BuildConfig::new("x86_64"), false, &host)
            .unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
    }

    #[test]
    fn test_append_keeps_existing_entries() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("etc")).unwrap();
        fs::write(tmp.path().join("etc/fstab"), "# static file system information\n").unwrap();

        let path = append_mount_table(tmp.path(), "UUID=abc / ext4 defaults 0 0\n").unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# static file system information\n"));
        assert!(content.ends_with("UUID=abc / ext4 defaults 0 0\n"));
    }
}
