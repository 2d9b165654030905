// src/filesystem/mod.rs

//! Filesystem layout
//!
//! Runs a [`PartitionPlan`], formats the root partition and mounts it at the
//! mount root, ready to be populated.
//!
//! # btrfs sequence
//!
//! ```text
//! mkfs.btrfs -f -L ROOTFS <root>
//! mount -t btrfs -o compress=zstd <root> <mnt>          top level
//! btrfs subvolume create <mnt>/@ ... <mnt>/@.snapshots
//! umount <mnt>
//! mount -t btrfs -o compress=zstd,subvol=@ <root> <mnt>
//! mount -t btrfs -o compress=zstd,subvol=@home <root> <mnt>/home
//! ```
//!
//! The unmount in the middle is required: once `@` is selected the sibling
//! subvolumes are no longer reachable under the mount root.

pub mod btrfs;

use crate::config::{BuildConfig, FsKind};
use crate::error::{Error, Result};
use crate::host::{Host, ToolInvocation};
use crate::partition::{FsTag, PartitionPlan};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A mount made during the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
    pub options: Option<String>,
}

/// Subvolume and the mount point it gets in the installed system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeMount {
    pub name: String,
    pub mount_point: String,
}

/// What [`build`] left mounted
#[derive(Debug, Clone)]
pub struct MountPlan {
    pub mount_root: PathBuf,
    pub filesystem: FsKind,
    pub root_index: u32,
    pub root_partition: String,
    /// Active mounts, in the order they were made
    pub mounts: Vec<MountEntry>,
    /// Empty for ext4
    pub subvolumes: Vec<SubvolumeMount>,
}

impl MountPlan {
    pub fn target(&self, relative: &str) -> PathBuf {
        self.mount_root.join(relative.trim_start_matches('/'))
    }
}

/// Run a formatting or mounting step, mapping a non-zero exit to
/// [`Error::Format`]
fn format_step(host: &(impl Host + ?Sized), invocation: &ToolInvocation) -> Result<()> {
    let output = host.run(invocation)?;
    if output.success() {
        Ok(())
    } else {
        Err(Error::Format {
            command: invocation.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn mount(source: &str, target: &Path, fstype: Option<&str>, options: Option<&str>) -> ToolInvocation {
    let mut inv = ToolInvocation::new("mount");
    if let Some(fstype) = fstype {
        inv = inv.args(["-t", fstype]);
    }
    if let Some(options) = options {
        inv = inv.args(["-o", options]);
    }
    inv.arg(source).arg_path(target)
}

/// Run the hook and parted invocations of a plan, in order
pub fn partition(plan: &PartitionPlan, host: &(impl Host + ?Sized)) -> Result<()> {
    info!("Partitioning {}", plan.disk);
    for invocation in &plan.invocations {
        format_step(host, invocation)?;
    }
    Ok(())
}

/// Partition, format and mount the root filesystem of `plan`
pub fn build(
    plan: &PartitionPlan,
    config: &BuildConfig,
    mount_root: &Path,
    host: &(impl Host + ?Sized),
) -> Result<MountPlan> {
    let root_index = plan
        .root_index
        .ok_or_else(|| Error::Plan(format!("{} carries no root filesystem", plan.disk)))?;
    let root = plan
        .root_partition()
        .ok_or_else(|| Error::Plan(format!("{} carries no root filesystem", plan.disk)))?;

    partition(plan, host)?;
    fs::create_dir_all(mount_root)?;

    let mut mount_plan = MountPlan {
        mount_root: mount_root.to_path_buf(),
        filesystem: config.filesystem,
        root_index,
        root_partition: root.clone(),
        mounts: Vec::new(),
        subvolumes: Vec::new(),
    };

    match config.filesystem {
        FsKind::Ext4 => build_ext4(&root, config, &mut mount_plan, host)?,
        FsKind::Btrfs => build_btrfs(&root, config, &mut mount_plan, host)?,
    }

    info!("Root filesystem on {} mounted at {}", root, mount_root.display());
    Ok(mount_plan)
}

fn build_ext4(
    root: &str,
    config: &BuildConfig,
    mount_plan: &mut MountPlan,
    host: &(impl Host + ?Sized),
) -> Result<()> {
    format_step(
        host,
        &ToolInvocation::new("mkfs.ext4")
            .args(["-F", "-L", config.filesystem.root_label()])
            .arg(root),
    )?;

    format_step(host, &mount(root, &mount_plan.mount_root, None, None))?;
    mount_plan.mounts.push(MountEntry {
        source: root.to_string(),
        target: mount_plan.mount_root.clone(),
        fstype: "ext4".to_string(),
        options: None,
    });

    fs::create_dir_all(mount_plan.target("boot"))?;
    Ok(())
}

fn build_btrfs(
    root: &str,
    config: &BuildConfig,
    mount_plan: &mut MountPlan,
    host: &(impl Host + ?Sized),
) -> Result<()> {
    let mnt = mount_plan.mount_root.clone();
    let subvolumes = btrfs::subvolumes(config.base);

    format_step(
        host,
        &ToolInvocation::new("mkfs.btrfs")
            .args(["-f", "-L", config.filesystem.root_label()])
            .arg(root),
    )?;

    // Top-level mount: subvolumes are only creatable from here
    format_step(
        host,
        &mount(root, &mnt, Some("btrfs"), Some(btrfs::BUILD_MOUNT_OPTIONS)),
    )?;
    for subvol in &subvolumes {
        format_step(
            host,
            &ToolInvocation::new("btrfs")
                .args(["subvolume", "create"])
                .arg_path(&mnt.join(subvol.name)),
        )?;
    }
    format_step(host, &ToolInvocation::new("umount").arg_path(&mnt))?;

    let top = &subvolumes[0];
    let top_options = top.build_mount_options();
    format_step(host, &mount(root, &mnt, Some("btrfs"), Some(&top_options)))?;
    mount_plan.mounts.push(MountEntry {
        source: root.to_string(),
        target: mnt.clone(),
        fstype: "btrfs".to_string(),
        options: Some(top_options),
    });

    let home = subvolumes
        .iter()
        .find(|s| s.name == "@home")
        .ok_or_else(|| Error::Plan("btrfs layout lost its @home subvolume".to_string()))?;
    let home_dir = mount_plan.target(home.mount_point);
    fs::create_dir_all(&home_dir)?;
    let home_options = home.build_mount_options();
    format_step(host, &mount(root, &home_dir, Some("btrfs"), Some(&home_options)))?;
    mount_plan.mounts.push(MountEntry {
        source: root.to_string(),
        target: home_dir,
        fstype: "btrfs".to_string(),
        options: Some(home_options),
    });

    fs::create_dir_all(mount_plan.target("boot"))?;
    if config.firmware.is_uefi() {
        fs::create_dir_all(mount_plan.target("boot/efi"))?;
    }

    mount_plan.subvolumes = subvolumes
        .iter()
        .map(|s| SubvolumeMount {
            name: s.name.to_string(),
            mount_point: s.mount_point.to_string(),
        })
        .collect();
    Ok(())
}

/// Format the boot partition of `boot_plan` and mount it at the boot mount
/// point under the mount root
///
/// `boot_plan` is the main plan of a combined build or the boot device plan
/// of a split build. Returns `false` when there is nothing to mount.
pub fn mount_boot(
    boot_plan: &PartitionPlan,
    config: &BuildConfig,
    mount_plan: &mut MountPlan,
    host: &(impl Host + ?Sized),
) -> Result<bool> {
    let Some(boot) = boot_plan.boot_partition() else {
        warn!("No boot partition on {}, skipping boot mount", boot_plan.disk);
        return Ok(false);
    };

    let (mkfs, fstype) = match &boot.spec.fs {
        FsTag::Fat32 => (
            ToolInvocation::new("mkfs.vfat")
                .args(["-F", "32", "-n", "BOOT"])
                .arg(boot.path.clone()),
            "vfat".to_string(),
        ),
        FsTag::Other(tag) if matches!(tag.as_str(), "ext2" | "ext3" | "ext4") => (
            ToolInvocation::new(format!("mkfs.{}", tag))
                .args(["-F", "-L", "BOOT"])
                .arg(boot.path.clone()),
            tag.clone(),
        ),
        other => {
            warn!(
                "Boot partition {} has type {}, leaving it unformatted",
                boot.path, other
            );
            return Ok(false);
        }
    };

    info!("Formatting boot partition {} as {}", boot.path, fstype);
    format_step(host, &mkfs)?;

    let target = mount_plan.target(config.boot_mount_point());
    fs::create_dir_all(&target)?;
    format_step(host, &mount(&boot.path, &target, None, None))?;
    mount_plan.mounts.push(MountEntry {
        source: boot.path.clone(),
        target,
        fstype,
        options: None,
    });
    Ok(true)
}

/// Recursively unmount the finished image tree
///
/// Unlike [`unmount_all`] a failure is an error: the image must not be
/// published while its filesystems may still hold unwritten data.
pub fn unmount(mount_root: &Path, host: &(impl Host + ?Sized)) -> Result<()> {
    format_step(host, &ToolInvocation::new("umount").arg("-R").arg_path(mount_root))?;
    info!("Unmounted {}", mount_root.display());
    Ok(())
}

/// Recursively unmount everything below `mount_root`
///
/// Failures only warn: during cleanup the tree may already be gone.
pub fn unmount_all(mount_root: &Path, host: &(impl Host + ?Sized)) {
    let umount = ToolInvocation::new("umount").arg("-R").arg_path(mount_root);
    match host.run(&umount) {
        Ok(output) if output.success() => info!("Unmounted {}", mount_root.display()),
        Ok(output) => warn!(
            "umount -R {} exited {}: {}",
            mount_root.display(),
            output.code,
            output.stderr.trim()
        ),
        Err(e) => warn!("Could not unmount {}: {}", mount_root.display(), e),
    }
}
