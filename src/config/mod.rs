// src/config/mod.rs

//! Build configuration
//!
//! A [`BuildConfig`] is created once, either from `imageforge.toml` via
//! [`BuildConfig::load`] or programmatically with the `with_*` builders,
//! and is only ever handed out by shared reference afterwards.
//!
//! The partition-table generator and the prefix/suffix command hooks are
//! function values. They default to an empty layout and empty command lists.

mod file;
mod paths;
mod size;

pub use file::{CONFIG_FILE_NAME, ConfigFile};
pub use paths::WorkPaths;
pub use size::ImageSize;

use crate::error::{Error, Result};
use crate::host::ToolInvocation;
use crate::partition::PartitionSpec;
use crate::rootfs::PermFix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Maps `(image size in KiB, root filesystem)` to an ordered partition layout
pub type PartitionTableFn = Arc<dyn Fn(u64, FsKind) -> Vec<PartitionSpec> + Send + Sync>;

/// Maps `(config_dir, disk)` to commands run around partitioning
pub type CommandHookFn = Arc<dyn Fn(&Path, &str) -> Vec<ToolInvocation> + Send + Sync>;

/// Root filesystem kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FsKind {
    #[default]
    Ext4,
    /// btrfs with `@`, `@home`, `@log`, `@pkg` and `@.snapshots` subvolumes
    Btrfs,
}

impl FsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
        }
    }

    /// Filesystem label given to the root partition
    pub fn root_label(&self) -> &'static str {
        match self {
            Self::Ext4 => "PRIMARY",
            Self::Btrfs => "ROOTFS",
        }
    }
}

impl FromStr for FsKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ext4" => Ok(Self::Ext4),
            "btrfs" => Ok(Self::Btrfs),
            _ => Err(Error::Config(format!(
                "filesystem {} not supported, use ext4 or btrfs",
                s
            ))),
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware the image boots with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareMode {
    Uefi,
    #[default]
    Legacy,
}

impl FirmwareMode {
    pub fn from_uefi(has_uefi: bool) -> Self {
        if has_uefi { Self::Uefi } else { Self::Legacy }
    }

    pub fn is_uefi(&self) -> bool {
        matches!(self, Self::Uefi)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "uefi"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Distribution family of the root filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OsBase {
    /// Bootstrapped with pacstrap
    #[default]
    Arch,
    /// Bootstrapped with mmdebstrap
    Debian,
}

impl OsBase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arch => "arch",
            Self::Debian => "debian",
        }
    }

    /// Where the package manager keeps downloaded packages
    pub fn package_cache(&self) -> &'static str {
        match self {
            Self::Arch => "/var/cache/pacman/pkg",
            Self::Debian => "/var/cache/apt/archives",
        }
    }
}

impl fmt::Display for OsBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the build produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Partitioned disk image
    #[default]
    Image,
    /// Root filesystem tarball
    Rootfs,
}

/// Disk label written by parted for legacy builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionTableType {
    Gpt,
    #[default]
    Msdos,
}

impl PartitionTableType {
    pub fn from_gpt(use_gpt: bool) -> Self {
        if use_gpt { Self::Gpt } else { Self::Msdos }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

/// Boot loader configuration written into the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bootloader {
    /// `boot/extlinux/extlinux.conf` from a template
    Extlinux,
    /// Rewrite `etc/default/grub` and run grub-install inside the image
    Grub,
    None,
}

/// Validated, immutable build parameters
#[derive(Clone)]
pub struct BuildConfig {
    pub img_name: String,
    pub img_version: String,
    pub edition: Option<String>,
    /// Architecture id as understood by the package manager
    pub arch: String,
    /// Directory holding `imageforge.toml` and its sibling files
    pub config_dir: PathBuf,
    pub base: OsBase,
    pub img_type: ImageType,
    pub filesystem: FsKind,
    pub firmware: FirmwareMode,
    pub table_type: PartitionTableType,
    /// Also flag a legacy fat32 partition as ESP
    pub boot_set_esp: bool,
    /// Boot partition and root filesystem live on two devices
    pub split_device: bool,
    /// Explicit image size; estimated from the root tree when unset
    pub image_size: Option<ImageSize>,
    pub boot_image_size: ImageSize,
    pub partition_table: PartitionTableFn,
    /// Layout of the boot device in split builds
    pub boot_partition_table: Option<PartitionTableFn>,
    pub partition_prefix: CommandHookFn,
    pub partition_suffix: CommandHookFn,
    pub bootloader: Bootloader,
    pub boot_template: Option<String>,
    pub boot_template_suffix: Option<String>,
    pub cmdline: String,
    pub grub_cmdline: Option<String>,
    pub grub_dtb: Option<String>,
    pub grub_target: String,
    /// Drop `iocharset=ascii` from FAT boot mount options
    pub simple_boot_options: bool,
    pub packages: Vec<String>,
    pub pacman_conf: Option<PathBuf>,
    pub suite: Option<String>,
    pub mirror: Option<String>,
    pub components: Vec<String>,
    pub customize_hook: Option<PathBuf>,
    pub overlay: Option<PathBuf>,
    pub perms: Vec<PermFix>,
}

impl fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfig")
            .field("img_name", &self.img_name)
            .field("img_version", &self.img_version)
            .field("arch", &self.arch)
            .field("config_dir", &self.config_dir)
            .field("base", &self.base)
            .field("img_type", &self.img_type)
            .field("filesystem", &self.filesystem)
            .field("firmware", &self.firmware)
            .field("table_type", &self.table_type)
            .field("split_device", &self.split_device)
            .field("bootloader", &self.bootloader)
            .finish_non_exhaustive()
    }
}

/// Layout generator that yields no partitions
pub fn empty_layout() -> PartitionTableFn {
    Arc::new(|_: u64, _: FsKind| Vec::new())
}

/// Hook that yields no commands
pub fn no_commands() -> CommandHookFn {
    Arc::new(|_: &Path, _: &str| Vec::new())
}

impl BuildConfig {
    /// Defaults: ext4, legacy firmware, msdos label, empty layout, no hooks
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            img_name: "image".to_string(),
            img_version: "dev".to_string(),
            edition: None,
            arch: arch.into(),
            config_dir: PathBuf::from("."),
            base: OsBase::Arch,
            img_type: ImageType::Image,
            filesystem: FsKind::Ext4,
            firmware: FirmwareMode::Legacy,
            table_type: PartitionTableType::Msdos,
            boot_set_esp: false,
            split_device: false,
            image_size: None,
            boot_image_size: ImageSize::from_mib(256),
            partition_table: empty_layout(),
            boot_partition_table: None,
            partition_prefix: no_commands(),
            partition_suffix: no_commands(),
            bootloader: Bootloader::None,
            boot_template: None,
            boot_template_suffix: None,
            cmdline: String::new(),
            grub_cmdline: None,
            grub_dtb: None,
            grub_target: "arm64-efi".to_string(),
            simple_boot_options: false,
            packages: Vec::new(),
            pacman_conf: None,
            suite: None,
            mirror: None,
            components: vec!["main".to_string()],
            customize_hook: None,
            overlay: None,
            perms: Vec::new(),
        }
    }

    /// Load and validate `<config_dir>/imageforge.toml`
    pub fn load(config_dir: &Path) -> Result<Self> {
        file::load(config_dir)
    }

    pub fn with_filesystem(mut self, filesystem: FsKind) -> Self {
        self.filesystem = filesystem;
        self
    }

    pub fn with_firmware(mut self, firmware: FirmwareMode) -> Self {
        self.firmware = firmware;
        self
    }

    pub fn with_table_type(mut self, table_type: PartitionTableType) -> Self {
        self.table_type = table_type;
        self
    }

    pub fn with_split_device(mut self, boot_table: PartitionTableFn) -> Self {
        self.split_device = true;
        self.boot_partition_table = Some(boot_table);
        self
    }

    pub fn with_partition_table<F>(mut self, generator: F) -> Self
    where
        F: Fn(u64, FsKind) -> Vec<PartitionSpec> + Send + Sync + 'static,
    {
        self.partition_table = Arc::new(generator);
        self
    }

    pub fn with_prefix<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Path, &str) -> Vec<ToolInvocation> + Send + Sync + 'static,
    {
        self.partition_prefix = Arc::new(hook);
        self
    }

    pub fn with_suffix<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Path, &str) -> Vec<ToolInvocation> + Send + Sync + 'static,
    {
        self.partition_suffix = Arc::new(hook);
        self
    }

    pub fn with_bootloader(mut self, bootloader: Bootloader) -> Self {
        self.bootloader = bootloader;
        self
    }

    pub fn with_boot_template(mut self, template: impl Into<String>) -> Self {
        self.boot_template = Some(template.into());
        self
    }

    pub fn with_cmdline(mut self, cmdline: impl Into<String>) -> Self {
        self.cmdline = cmdline.into();
        self
    }

    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = config_dir.into();
        self
    }

    pub fn with_base(mut self, base: OsBase) -> Self {
        self.base = base;
        self
    }

    /// Mount point of the boot partition inside the image
    pub fn boot_mount_point(&self) -> &'static str {
        if self.firmware.is_uefi() {
            "/boot/efi"
        } else {
            "/boot"
        }
    }

    /// Reject combinations the layout engine cannot build
    pub fn validate(&self) -> Result<()> {
        if self.img_name.trim().is_empty() {
            return Err(Error::Config("image name not set".to_string()));
        }
        if self.img_version.trim().is_empty() {
            return Err(Error::Config("image version not set".to_string()));
        }
        if self.split_device && self.firmware.is_uefi() {
            return Err(Error::Config(
                "split boot/root devices are only supported with legacy firmware".to_string(),
            ));
        }
        if self.split_device && self.boot_partition_table.is_none() {
            return Err(Error::Config(
                "split_device requires a boot device layout".to_string(),
            ));
        }
        if self.bootloader == Bootloader::Extlinux && self.boot_template.is_none() {
            return Err(Error::Config(
                "extlinux needs a configtxt template".to_string(),
            ));
        }
        if self.base == OsBase::Debian && (self.suite.is_none() || self.mirror.is_none()) {
            return Err(Error::Config(
                "debian builds need both suite and mirror".to_string(),
            ));
        }
        Ok(())
    }
}
