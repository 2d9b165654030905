// src/config/file.rs

//! `imageforge.toml` and its sibling files
//!
//! ```toml
//! img_name = "rock5b"
//! img_version = "2024.06"
//! arch = "aarch64"
//! fs = "btrfs"
//! configtxt = """
//! LABEL linux
//!     KERNEL /Image
//! """
//!
//! [layout]
//! preset = "legacy"
//!
//! [perms]
//! "/etc/sudoers.d/" = ["root", "root", "0750"]
//! ```
//!
//! Next to the file live `packages.<arch>` and, for Arch bases,
//! `pacman.conf.<arch>`. Debian bases pick up `customize.sh` when present.

use super::{
    Bootloader, BuildConfig, CommandHookFn, FirmwareMode, FsKind, ImageSize, ImageType, OsBase,
    PartitionTableType, empty_layout, no_commands,
};
use crate::error::{Error, Result};
use crate::host::ToolInvocation;
use crate::partition::LayoutSection;
use crate::rootfs::{PermFix, read_package_list};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Name of the build description inside the config directory
pub const CONFIG_FILE_NAME: &str = "imageforge.toml";

const LOOP_BACKEND: &str = "loop";

fn default_components() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_backend() -> String {
    LOOP_BACKEND.to_string()
}

fn default_boot_image_size() -> String {
    "256M".to_string()
}

fn default_grub_target() -> String {
    "arm64-efi".to_string()
}

/// Raw contents of `imageforge.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub img_name: String,
    pub img_version: String,
    pub edition: Option<String>,
    pub arch: String,

    #[serde(default)]
    pub base: OsBase,
    pub suite: Option<String>,
    pub mirror: Option<String>,
    #[serde(default = "default_components")]
    pub components: Vec<String>,

    #[serde(default)]
    pub fs: FsKind,
    #[serde(default)]
    pub img_type: ImageType,
    #[serde(default = "default_backend")]
    pub img_backend: String,
    #[serde(default)]
    pub has_uefi: bool,
    #[serde(default)]
    pub use_gpt: bool,
    #[serde(default)]
    pub boot_set_esp: bool,
    #[serde(default)]
    pub split_device: bool,

    pub image_size: Option<String>,
    #[serde(default = "default_boot_image_size")]
    pub boot_image_size: String,

    #[serde(default)]
    pub cmdline: String,
    pub configtxt: Option<String>,
    pub configtxt_suffix: Option<String>,
    pub grubcmdl: Option<String>,
    pub grubdtb: Option<String>,
    #[serde(default = "default_grub_target")]
    pub grub_target: String,
    pub bootloader: Option<Bootloader>,
    #[serde(default)]
    pub simple_boot_options: bool,

    pub overlay: Option<PathBuf>,
    /// path -> [owner, group, mode]
    #[serde(default)]
    pub perms: BTreeMap<String, (String, String, String)>,

    pub layout: Option<LayoutSection>,
    pub boot_layout: Option<LayoutSection>,
    #[serde(default)]
    pub partition_prefix: Vec<Vec<String>>,
    #[serde(default)]
    pub partition_suffix: Vec<Vec<String>>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Boot loader named in the file, or the one implied by the other keys
    pub fn resolved_bootloader(&self) -> Bootloader {
        match self.bootloader {
            Some(bootloader) => bootloader,
            None if self.configtxt.is_some() => Bootloader::Extlinux,
            None if self.has_uefi => Bootloader::Grub,
            None => Bootloader::None,
        }
    }

    /// Validate against the files in `config_dir` and build the immutable
    /// configuration
    pub fn into_build_config(self, config_dir: &Path) -> Result<BuildConfig> {
        if self.arch.trim().is_empty() {
            return Err(Error::Config("arch not set".to_string()));
        }
        if self.img_backend != LOOP_BACKEND {
            return Err(Error::Config(format!(
                "image backend {} not supported, only {}",
                self.img_backend, LOOP_BACKEND
            )));
        }

        let bootloader = self.resolved_bootloader();
        let packages = read_package_list(&config_dir.join(format!("packages.{}", self.arch)))?;

        let pacman_conf = match self.base {
            OsBase::Arch => {
                let path = config_dir.join(format!("pacman.conf.{}", self.arch));
                if !path.is_file() {
                    return Err(Error::Config(format!("{} not found", path.display())));
                }
                Some(path)
            }
            OsBase::Debian => None,
        };
        let customize_hook = Some(config_dir.join("customize.sh"))
            .filter(|p| self.base == OsBase::Debian && p.is_file());

        let overlay = match self.overlay {
            Some(dir) => {
                let dir = config_dir.join(dir);
                if !dir.is_dir() {
                    return Err(Error::Config(format!(
                        "overlay directory {} not found",
                        dir.display()
                    )));
                }
                Some(dir)
            }
            None => None,
        };

        let perms = self
            .perms
            .iter()
            .map(|(path, (owner, group, mode))| PermFix::parse(path, owner, group, mode))
            .collect::<Result<Vec<_>>>()?;

        let partition_table = match (self.layout, self.img_type) {
            (Some(layout), _) => layout.into_generator()?,
            (None, ImageType::Rootfs) => empty_layout(),
            (None, ImageType::Image) => {
                return Err(Error::Config("image builds need a [layout]".to_string()));
            }
        };
        let boot_partition_table = match (self.boot_layout, self.split_device) {
            (Some(layout), true) => Some(layout.into_generator()?),
            (None, true) => {
                return Err(Error::Config(
                    "split_device requires a [boot_layout]".to_string(),
                ));
            }
            (Some(_), false) => {
                return Err(Error::Config(
                    "[boot_layout] is only used with split_device".to_string(),
                ));
            }
            (None, false) => None,
        };

        let image_size = self
            .image_size
            .as_deref()
            .map(str::parse::<ImageSize>)
            .transpose()?;

        let config = BuildConfig {
            img_name: self.img_name,
            img_version: self.img_version,
            edition: self.edition,
            arch: self.arch,
            config_dir: config_dir.to_path_buf(),
            base: self.base,
            img_type: self.img_type,
            filesystem: self.fs,
            firmware: FirmwareMode::from_uefi(self.has_uefi),
            table_type: PartitionTableType::from_gpt(self.use_gpt),
            boot_set_esp: self.boot_set_esp,
            split_device: self.split_device,
            image_size,
            boot_image_size: self.boot_image_size.parse()?,
            partition_table,
            boot_partition_table,
            partition_prefix: command_hook(self.partition_prefix)?,
            partition_suffix: command_hook(self.partition_suffix)?,
            bootloader,
            boot_template: self.configtxt,
            boot_template_suffix: self.configtxt_suffix,
            cmdline: self.cmdline,
            grub_cmdline: self.grubcmdl,
            grub_dtb: self.grubdtb,
            grub_target: self.grub_target,
            simple_boot_options: self.simple_boot_options,
            packages,
            pacman_conf,
            suite: self.suite,
            mirror: self.mirror,
            components: self.components,
            customize_hook,
            overlay,
            perms,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Expand `{config_dir}` and `{disk}` in each argv when the hook runs
fn command_hook(commands: Vec<Vec<String>>) -> Result<CommandHookFn> {
    if commands.is_empty() {
        return Ok(no_commands());
    }
    if commands.iter().any(|argv| argv.first().is_none_or(|p| p.is_empty())) {
        return Err(Error::Config(
            "partition hook commands need a program".to_string(),
        ));
    }

    Ok(Arc::new(move |config_dir: &Path, disk: &str| {
        let config_dir = config_dir.to_string_lossy();
        let expand = |arg: &String| {
            arg.replace("{config_dir}", &config_dir)
                .replace("{disk}", disk)
        };
        commands
            .iter()
            .filter_map(|argv| argv.split_first())
            .map(|(program, args)| ToolInvocation::new(expand(program)).args(args.iter().map(expand)))
            .collect()
    }))
}

/// Read `<config_dir>/imageforge.toml` and build the configuration
pub(crate) fn load(config_dir: &Path) -> Result<BuildConfig> {
    let config_dir = config_dir.canonicalize().map_err(|e| {
        Error::Config(format!(
            "config directory {} not usable: {}",
            config_dir.display(),
            e
        ))
    })?;
    let path = config_dir.join(CONFIG_FILE_NAME);
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

    let file = ConfigFile::parse(&text)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    debug!("Loaded {}", path.display());
    file.into_build_config(&config_dir)
}
