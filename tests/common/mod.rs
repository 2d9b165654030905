// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use imageforge::config::CONFIG_FILE_NAME;
use imageforge::partition::{LayoutPreset, preset};
use imageforge::{
    BuildConfig, FirmwareMode, FsKind, Offset, PartitionSpec, PartitionTableType, RecordingHost,
};
use std::fs;
use tempfile::TempDir;

pub const ROOT_UUID: &str = "0b5f3c1e-9d7a-4c2e-8f11-2a6e4d9c7b30";
pub const BOOT_UUID: &str = "4A1B-9C2D";

/// fat32 from 1 MiB to 9 MiB, root for the rest of the device
pub fn small_layout(_size_kib: u64, root: FsKind) -> Vec<PartitionSpec> {
    vec![
        PartitionSpec::fat32(Offset::Mib(1), Offset::Mib(9)),
        PartitionSpec::filesystem(Offset::Mib(9), Offset::Percent(100), root.as_str()),
    ]
}

/// UEFI, ext4, GPT, built-in uefi layout
pub fn uefi_ext4_config() -> BuildConfig {
    let mut config = BuildConfig::new("aarch64")
        .with_firmware(FirmwareMode::Uefi)
        .with_table_type(PartitionTableType::Gpt)
        .with_filesystem(FsKind::Ext4);
    config.partition_table = preset(LayoutPreset::Uefi);
    config
}

/// Legacy firmware, btrfs, root and boot on separate devices
pub fn legacy_btrfs_split_config() -> BuildConfig {
    let mut config = BuildConfig::new("aarch64")
        .with_filesystem(FsKind::Btrfs)
        .with_split_device(preset(LayoutPreset::BootOnly));
    config.partition_table = preset(LayoutPreset::RootOnly);
    config
}

/// Every valid combination of firmware, root filesystem and device split
pub fn all_layouts() -> Vec<BuildConfig> {
    let mut configs = Vec::new();
    for firmware in [FirmwareMode::Legacy, FirmwareMode::Uefi] {
        for fs in [FsKind::Ext4, FsKind::Btrfs] {
            for split in [false, true] {
                // Split devices are legacy only
                if split && firmware.is_uefi() {
                    continue;
                }
                let mut config = BuildConfig::new("aarch64")
                    .with_firmware(firmware)
                    .with_filesystem(fs);
                config.partition_table = match (firmware, split) {
                    (FirmwareMode::Uefi, _) => preset(LayoutPreset::Uefi),
                    (_, true) => preset(LayoutPreset::RootOnly),
                    (_, false) => preset(LayoutPreset::Legacy),
                };
                if split {
                    config = config.with_split_device(preset(LayoutPreset::BootOnly));
                }
                configs.push(config);
            }
        }
    }
    configs
}

/// Host that knows the filesystems of `root` and `boot`
pub fn host_with(root: &str, root_fs: &str, boot: &str) -> RecordingHost {
    RecordingHost::new()
        .with_identity(root, ROOT_UUID, root_fs)
        .with_identity(boot, BOOT_UUID, "vfat")
}

/// Config directory holding `toml` plus the aarch64 package list and
/// pacman.conf
///
/// Returns the TempDir; keep it alive while the directory is in use.
pub fn config_dir(toml: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(CONFIG_FILE_NAME), toml).unwrap();
    fs::write(dir.path().join("packages.aarch64"), "base\nlinux-aarch64\n").unwrap();
    fs::write(dir.path().join("pacman.conf.aarch64"), "[options]\n").unwrap();
    dir
}
