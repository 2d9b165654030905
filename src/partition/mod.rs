// src/partition/mod.rs

//! Partition planning
//!
//! Turns the configured partition-table generator into an ordered layout and
//! the exact `parted` invocation that creates it.
//!
//! ```text
//!  generator(size, fs)
//!        │
//!        ▼
//!  [PartitionSpec] ──validate──▶ parted --script <disk> --align optimal
//!                                  [mklabel gpt|msdos]        (legacy only)
//!                                  mkpart primary fat32 ... set N boot on [set N esp on]
//!                                  mkpart primary <fs> ...
//!        │
//!        ▼
//!  prefix hooks + parted + suffix hooks    (hooks skipped on the root half
//!                                           of a split build)
//! ```
//!
//! Indices are positional: a reserved (`NONE`) entry creates no partition but
//! still takes its slot, so the entries after it keep the numbers the boot
//! and root rules expect.

mod layouts;
mod offset;

pub use layouts::{LayoutEntry, LayoutPreset, LayoutSection, declared, preset};
pub use offset::Offset;

use crate::config::{BuildConfig, FirmwareMode, PartitionTableFn};
use crate::device::partition_path;
use crate::error::{Error, Result};
use crate::host::ToolInvocation;
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{debug, warn};

/// Filesystem tag of a layout entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsTag {
    /// Boot partition; flagged bootable (and ESP under UEFI)
    Fat32,
    /// Slot kept free; no partition is created for it
    Reserved,
    /// Any other parted filesystem hint (ext4, btrfs, linux-swap, ...)
    Other(String),
}

impl FsTag {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            t if t.eq_ignore_ascii_case("fat32") => Self::Fat32,
            t if t.eq_ignore_ascii_case("none") || t.eq_ignore_ascii_case("reserved") => {
                Self::Reserved
            }
            t => Self::Other(t.to_string()),
        }
    }
}

impl fmt::Display for FsTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fat32 => write!(f, "fat32"),
            Self::Reserved => write!(f, "NONE"),
            Self::Other(tag) => write!(f, "{}", tag),
        }
    }
}

impl Serialize for FsTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One entry of a partition layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSpec {
    pub start: Offset,
    pub end: Offset,
    pub fs: FsTag,
}

impl PartitionSpec {
    pub fn new(start: Offset, end: Offset, fs: FsTag) -> Self {
        Self { start, end, fs }
    }

    pub fn fat32(start: Offset, end: Offset) -> Self {
        Self::new(start, end, FsTag::Fat32)
    }

    pub fn reserved(start: Offset, end: Offset) -> Self {
        Self::new(start, end, FsTag::Reserved)
    }

    pub fn filesystem(start: Offset, end: Offset, tag: &str) -> Self {
        Self::new(start, end, FsTag::Other(tag.to_string()))
    }
}

/// Which device of a build a plan describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceRole {
    /// Boot and root on the same device
    Combined,
    /// Root-only device of a split build
    SplitRoot,
    /// Boot-only device of a split build
    SplitBoot,
}

/// A layout entry with the index and device path it ends up at
#[derive(Debug, Clone, Serialize)]
pub struct PlannedPartition {
    pub index: u32,
    pub path: String,
    /// False for reserved slots
    pub created: bool,
    pub spec: PartitionSpec,
}

/// Result of planning one device
#[derive(Debug, Clone, Serialize)]
pub struct PartitionPlan {
    pub disk: String,
    pub size_kib: u64,
    pub role: DeviceRole,
    pub partitions: Vec<PlannedPartition>,
    /// Commands to run, in order
    pub invocations: Vec<ToolInvocation>,
    pub root_index: Option<u32>,
    pub boot_index: Option<u32>,
}

impl PartitionPlan {
    pub fn specs(&self) -> Vec<PartitionSpec> {
        self.partitions.iter().map(|p| p.spec.clone()).collect()
    }

    /// Device path of the root filesystem partition
    pub fn root_partition(&self) -> Option<String> {
        self.root_index.map(|i| partition_path(&self.disk, i))
    }

    /// Layout entry occupying the boot index, if the layout has one there
    pub fn boot_partition(&self) -> Option<&PlannedPartition> {
        let index = self.boot_index?;
        self.partitions
            .iter()
            .find(|p| p.index == index && p.created)
    }

    /// The parted invocation of this plan
    pub fn parted(&self) -> Option<&ToolInvocation> {
        self.invocations.iter().find(|inv| inv.program == "parted")
    }
}

/// Root filesystem partition index
///
/// 3 under UEFI; otherwise 2 on a combined device and 1 on the root half of
/// a split build.
pub fn root_partition_index(firmware: FirmwareMode, split_device: bool) -> u32 {
    if firmware.is_uefi() {
        3
    } else if split_device {
        1
    } else {
        2
    }
}

/// Boot partition index: 2 under UEFI, else 1
pub fn boot_partition_index(firmware: FirmwareMode) -> u32 {
    if firmware.is_uefi() { 2 } else { 1 }
}

/// Plan the main device: the only device of a combined build, or the root
/// half of a split build
pub fn plan(disk: &str, size_kib: u64, config: &BuildConfig) -> Result<PartitionPlan> {
    let role = if config.split_device {
        DeviceRole::SplitRoot
    } else {
        DeviceRole::Combined
    };
    plan_device(disk, size_kib, config, &config.partition_table, role)
}

/// Plan the boot device of a split build
pub fn plan_boot_device(disk: &str, size_kib: u64, config: &BuildConfig) -> Result<PartitionPlan> {
    let generator = config
        .boot_partition_table
        .as_ref()
        .filter(|_| config.split_device)
        .ok_or_else(|| {
            Error::Config("boot device layout requested for a non-split build".to_string())
        })?;
    plan_device(disk, size_kib, config, generator, DeviceRole::SplitBoot)
}

fn plan_device(
    disk: &str,
    size_kib: u64,
    config: &BuildConfig,
    generator: &PartitionTableFn,
    role: DeviceRole,
) -> Result<PartitionPlan> {
    if size_kib == 0 {
        return Err(Error::Plan(format!("{} has zero size", disk)));
    }

    let specs = generator(size_kib, config.filesystem);
    if specs.is_empty() {
        return Err(Error::Plan(
            "partition table generator returned no partitions".to_string(),
        ));
    }
    check_offsets(&specs, size_kib * 1024)?;

    let uefi = config.firmware.is_uefi();
    let fat_count = specs.iter().filter(|s| s.fs == FsTag::Fat32).count();
    if fat_count > 1 {
        return Err(Error::Plan(format!(
            "layout has {} fat32 partitions, only one boot partition is supported",
            fat_count
        )));
    }
    let boot_required = match role {
        DeviceRole::Combined => uefi,
        DeviceRole::SplitBoot => true,
        DeviceRole::SplitRoot => false,
    };
    if boot_required && fat_count == 0 {
        return Err(Error::Plan(match role {
            DeviceRole::SplitBoot => "boot device layout has no fat32 partition".to_string(),
            _ => "uefi firmware requires a fat32 boot partition".to_string(),
        }));
    }

    let root_index = match role {
        DeviceRole::Combined => Some(root_partition_index(config.firmware, false)),
        DeviceRole::SplitRoot => Some(root_partition_index(config.firmware, true)),
        DeviceRole::SplitBoot => None,
    };
    let boot_index = match role {
        DeviceRole::Combined => Some(boot_partition_index(config.firmware)),
        DeviceRole::SplitBoot => Some(1),
        DeviceRole::SplitRoot => None,
    };

    let mut parted = ToolInvocation::new("parted").args(["--script", disk, "--align", "optimal"]);
    if !uefi {
        parted = parted.args(["mklabel", config.table_type.as_str()]);
    }

    let mut partitions = Vec::with_capacity(specs.len());
    for (position, spec) in specs.into_iter().enumerate() {
        let index = position as u32 + 1;
        let start = spec.start.to_string();
        let end = spec.end.to_string();

        match &spec.fs {
            FsTag::Reserved => {
                debug!("Slot {} on {} reserved, no partition created", index, disk);
            }
            FsTag::Fat32 => {
                if let Some(expected) = boot_index
                    && index != expected
                {
                    return Err(Error::Plan(format!(
                        "fat32 partition is at index {} but the boot partition must be {}",
                        index, expected
                    )));
                }
                let flag_index = index.to_string();
                parted = parted
                    .args(["mkpart", "primary", "fat32", start.as_str(), end.as_str()])
                    .args(["set", flag_index.as_str(), "boot", "on"]);
                if uefi || config.boot_set_esp {
                    parted = parted.args(["set", flag_index.as_str(), "esp", "on"]);
                }
            }
            FsTag::Other(hint) => {
                parted =
                    parted.args(["mkpart", "primary", hint.as_str(), start.as_str(), end.as_str()]);
            }
        }

        partitions.push(PlannedPartition {
            index,
            path: partition_path(disk, index),
            created: spec.fs != FsTag::Reserved,
            spec,
        });
    }

    let mut invocations = Vec::new();
    let run_hooks = role != DeviceRole::SplitRoot;
    if run_hooks {
        invocations.extend((config.partition_prefix)(&config.config_dir, disk));
    }
    invocations.push(parted);
    if run_hooks {
        invocations.extend((config.partition_suffix)(&config.config_dir, disk));
    }

    if let Some(root) = root_index
        && root as usize > partitions.len()
    {
        warn!(
            "Layout for {} has {} slots but the root filesystem goes to index {}",
            disk,
            partitions.len(),
            root
        );
    }

    Ok(PartitionPlan {
        disk: disk.to_string(),
        size_kib,
        role,
        partitions,
        invocations,
        root_index,
        boot_index,
    })
}

/// Offsets must not go backwards and must fit on the device
fn check_offsets(specs: &[PartitionSpec], device_bytes: u64) -> Result<()> {
    let mut previous_end = 0u64;
    for (position, spec) in specs.iter().enumerate() {
        let start = spec.start.resolve(device_bytes);
        let end = spec.end.resolve(device_bytes);
        if start < previous_end {
            return Err(Error::Plan(format!(
                "partition {} starts at {} before the previous one ends",
                position + 1,
                spec.start
            )));
        }
        if end < start {
            return Err(Error::Plan(format!(
                "partition {} ends at {} before it starts at {}",
                position + 1,
                spec.end,
                spec.start
            )));
        }
        if end > device_bytes {
            return Err(Error::Plan(format!(
                "partition {} ends at {} beyond the end of the device",
                position + 1,
                spec.end
            )));
        }
        previous_end = end;
    }
    Ok(())
}
