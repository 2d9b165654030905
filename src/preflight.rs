// src/preflight.rs

//! Host readiness checks run before a build touches any device

use crate::config::{Bootloader, BuildConfig, FsKind, ImageType, OsBase};
use crate::error::{Error, Result};
use crate::host::Host;
use serde::Serialize;

/// Availability of one host tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCheck {
    pub name: &'static str,
    pub required: bool,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub tools: Vec<ToolCheck>,
    pub is_root: bool,
}

impl PreflightReport {
    pub fn missing_required(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .filter(|t| t.required && !t.found)
            .map(|t| t.name)
            .collect()
    }

    pub fn ready(&self) -> bool {
        self.is_root && self.missing_required().is_empty()
    }

    /// Turn an unready report into [`Error::Preflight`]
    pub fn ensure_ready(&self) -> Result<()> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            return Err(Error::Preflight(format!(
                "missing host tools: {}",
                missing.join(", ")
            )));
        }
        if !self.is_root {
            return Err(Error::Preflight("imageforge must run as root".to_string()));
        }
        Ok(())
    }
}

/// Tools a build with `config` invokes, paired with whether they are required
pub fn required_tools(config: &BuildConfig) -> Vec<(&'static str, bool)> {
    let mut tools = vec![match config.base {
        OsBase::Arch => ("pacstrap", true),
        OsBase::Debian => ("mmdebstrap", true),
    }];

    if config.img_type == ImageType::Image {
        tools.extend([
            ("parted", true),
            ("losetup", true),
            ("mount", true),
            ("umount", true),
            ("blkid", true),
            ("mkfs.vfat", true),
        ]);
        match config.filesystem {
            FsKind::Ext4 => tools.push(("mkfs.ext4", true)),
            FsKind::Btrfs => tools.extend([("mkfs.btrfs", true), ("btrfs", true)]),
        }
        if config.bootloader == Bootloader::Grub {
            tools.push(("arch-chroot", true));
        }
    }

    tools.push(("rsync", false));
    tools
}

/// Look up every tool the build needs and check the effective uid
pub fn check(config: &BuildConfig, host: &(impl Host + ?Sized)) -> PreflightReport {
    let tools = required_tools(config)
        .into_iter()
        .map(|(name, required)| ToolCheck {
            name,
            required,
            found: host.tool_available(name),
        })
        .collect();

    PreflightReport {
        tools,
        is_root: nix::unistd::geteuid().is_root(),
    }
}
