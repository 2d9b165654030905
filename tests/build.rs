// tests/build.rs

//! Integration tests for whole builds driven through a RecordingHost.
//!
//! Loop devices, mkfs and mount are only recorded; the backing files, the
//! mount root contents and the published artifacts are real files in a
//! temporary directory.

mod common;

use common::{BOOT_UUID, ROOT_UUID, host_with, small_layout};
use imageforge::partition::{LayoutPreset, preset};
use imageforge::{
    Bootloader, BuildConfig, BuildOptions, FsKind, ImageForge, ImageSize, ImageType,
    RecordingHost, WorkPaths,
};
use std::fs;
use std::io::Read;
use tempfile::TempDir;

const TEMPLATE: &str = "LABEL imageforge\n    kernel /Image\n    fdtdir /dtbs";

fn options() -> BuildOptions {
    BuildOptions {
        compress: false,
        skip_bootstrap: true,
        ..BuildOptions::default()
    }
}

fn paths(tmp: &TempDir) -> WorkPaths {
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    WorkPaths::prepare(
        tmp.path().join("work"),
        &config_dir,
        tmp.path().join("out"),
        "aarch64",
    )
    .unwrap()
}

#[test]
fn test_combined_ext4_image_build() {
    let tmp = TempDir::new().unwrap();
    let paths = paths(&tmp);

    let mut config = BuildConfig::new("aarch64")
        .with_partition_table(small_layout)
        .with_bootloader(Bootloader::Extlinux)
        .with_boot_template(TEMPLATE)
        .with_cmdline("console=ttyS2,1500000 rw");
    config.img_name = "board".to_string();
    config.image_size = Some(ImageSize::from_mib(16));

    let host = host_with("/dev/loop0p2", "ext4", "/dev/loop0p1");
    let mut forge = ImageForge::new(&config, &paths, &host, options());
    let report = forge.build().unwrap();

    assert!(forge.attached_devices().is_empty());
    assert_eq!(host.count("pacstrap"), 0);
    assert_eq!(host.count("parted"), 1);
    assert_eq!(host.count("mkfs.ext4"), 1);
    assert_eq!(host.count("mkfs.vfat"), 1);

    let fstab = fs::read_to_string(paths.mnt_dir.join("etc/fstab")).unwrap();
    assert_eq!(fstab.lines().count(), 2);
    assert!(fstab.contains(&format!("UUID={}", ROOT_UUID)));
    assert!(fstab.contains(&format!("UUID={}", BOOT_UUID)));

    let extlinux = fs::read_to_string(paths.mnt_dir.join("boot/extlinux/extlinux.conf")).unwrap();
    assert!(extlinux.starts_with("LABEL imageforge\n"));
    assert!(extlinux.contains(&format!(
        "append root=UUID={} console=ttyS2,1500000 rw",
        ROOT_UUID
    )));

    assert_eq!(report.artifacts.len(), 1);
    let artifact = &report.artifacts[0];
    assert_eq!(artifact.path, paths.out_dir.join("board.img"));
    assert_eq!(fs::metadata(&artifact.path).unwrap().len(), 16 << 20);
    let sidecar = fs::read_to_string(&artifact.checksum_file).unwrap();
    assert_eq!(sidecar, format!("{}  board.img\n", artifact.sha256));
    assert!(report.log.ends_with("Build complete\n"));

    forge.cleanup();
    assert!(!paths.work_dir.exists());
    assert!(artifact.path.exists());
}

#[test]
fn test_split_btrfs_image_build() {
    let tmp = TempDir::new().unwrap();
    let paths = paths(&tmp);

    let mut config = BuildConfig::new("aarch64")
        .with_filesystem(FsKind::Btrfs)
        .with_split_device(preset(LayoutPreset::BootOnly));
    config.partition_table = preset(LayoutPreset::RootOnly);
    config.img_name = "board".to_string();
    config.image_size = Some(ImageSize::from_mib(16));
    config.boot_image_size = ImageSize::from_mib(8);

    // The root device is attached first
    let host = host_with("/dev/loop0p1", "btrfs", "/dev/loop1p1");
    let mut forge = ImageForge::new(&config, &paths, &host, options());
    let report = forge.build().unwrap();

    assert_eq!(host.count("parted"), 2);
    assert_eq!(host.count("mkfs.btrfs"), 1);
    assert!(paths.mnt_dir.join("home").is_dir());

    let fstab = fs::read_to_string(paths.mnt_dir.join("etc/fstab")).unwrap();
    let root_lines = fstab
        .lines()
        .filter(|l| l.starts_with(&format!("UUID={}", ROOT_UUID)))
        .count();
    assert_eq!(root_lines, 5);
    let boot_line = fstab.lines().find(|l| l.contains(BOOT_UUID)).unwrap();
    assert_eq!(boot_line.split_whitespace().nth(1), Some("/boot"));

    let detached: Vec<String> = host
        .invocations()
        .iter()
        .filter(|inv| inv.program == "losetup" && inv.has_arg("-d"))
        .map(|inv| inv.args[1].clone())
        .collect();
    assert_eq!(detached, vec!["/dev/loop0", "/dev/loop1"]);

    let names: Vec<_> = report
        .artifacts
        .iter()
        .map(|a| a.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["board.img", "board-boot.img"]);

    forge.cleanup();
}

#[test]
fn test_failed_format_leaves_devices_for_cleanup() {
    let tmp = TempDir::new().unwrap();
    let paths = paths(&tmp);

    let mut config = BuildConfig::new("aarch64").with_partition_table(small_layout);
    config.image_size = Some(ImageSize::from_mib(16));

    let host = RecordingHost::new().failing("mkfs.ext4");
    let mut forge = ImageForge::new(&config, &paths, &host, options());
    assert!(forge.build().is_err());
    assert_eq!(forge.attached_devices(), vec!["/dev/loop0"]);

    forge.cleanup();
    assert!(forge.attached_devices().is_empty());
    assert_eq!(host.count("umount"), 1);
    assert!(!paths.work_dir.exists());
}

#[test]
fn test_failed_unmount_is_not_published() {
    let tmp = TempDir::new().unwrap();
    let paths = paths(&tmp);

    let mut config = BuildConfig::new("aarch64").with_partition_table(small_layout);
    config.img_name = "board".to_string();
    config.image_size = Some(ImageSize::from_mib(16));

    let host = host_with("/dev/loop0p2", "ext4", "/dev/loop0p1").failing("umount");
    let mut forge = ImageForge::new(&config, &paths, &host, options());
    assert!(forge.build().is_err());

    assert!(!paths.out_dir.join("board.img").exists());
    assert!(!paths.out_dir.join("board.img.sha256").exists());
    assert_eq!(forge.attached_devices(), vec!["/dev/loop0"]);

    forge.cleanup();
    assert!(forge.attached_devices().is_empty());
    assert_eq!(host.count("umount"), 2);
}

#[test]
fn test_rootfs_tarball_build() {
    let tmp = TempDir::new().unwrap();
    let paths = paths(&tmp);
    let etc = paths.install_dir.join("etc");
    fs::create_dir_all(&etc).unwrap();
    fs::write(etc.join("hostname"), "board\n").unwrap();
    fs::write(etc.join("machine-id"), "0123456789abcdef\n").unwrap();

    let mut config = BuildConfig::new("aarch64");
    config.img_type = ImageType::Rootfs;
    config.img_name = "board-rootfs".to_string();

    let host = RecordingHost::new();
    let mut forge = ImageForge::new(&config, &paths, &host, options());
    let report = forge.build().unwrap();

    // No block devices for a rootfs build
    assert_eq!(host.count("losetup"), 0);
    assert_eq!(host.count("parted"), 0);
    assert!(!etc.join("machine-id").exists());

    let artifact = &report.artifacts[0];
    assert_eq!(artifact.path, paths.out_dir.join("board-rootfs.tar.zst"));

    let mut tar = Vec::new();
    zstd::Decoder::new(fs::File::open(&artifact.path).unwrap())
        .unwrap()
        .read_to_end(&mut tar)
        .unwrap();
    let mut archive = tar::Archive::new(tar.as_slice());
    let entries: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().any(|p| p.ends_with("etc/hostname")));
    assert!(!entries.iter().any(|p| p.ends_with("machine-id")));

    forge.cleanup();
}
