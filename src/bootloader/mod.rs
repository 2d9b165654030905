// src/bootloader/mod.rs

//! Boot loader configuration
//!
//! - **extlinux**: a stanza rendered from the configured template, with the
//!   root UUID appended to the kernel command line
//! - **grub**: the image's own GRUB defaults are rewritten, then grub-install
//!   and grub-mkconfig run inside the image

pub mod extlinux;
pub mod grub;

use crate::config::{Bootloader, BuildConfig};
use crate::error::Result;
use crate::host::Host;
use std::path::Path;
use tracing::debug;

/// Configure whichever boot loader the build selected
pub fn configure(
    mount_root: &Path,
    disk: &str,
    config: &BuildConfig,
    host: &(impl Host + ?Sized),
) -> Result<()> {
    match config.bootloader {
        Bootloader::Extlinux => {
            extlinux::write_conf(mount_root, disk, config, host)?;
        }
        Bootloader::Grub => grub::install(mount_root, config, host)?,
        Bootloader::None => debug!("No boot loader configured"),
    }
    Ok(())
}
