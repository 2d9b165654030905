// src/bootloader/grub.rs

use crate::config::{BuildConfig, OsBase};
use crate::error::Result;
use crate::host::{Host, ToolInvocation};
use std::fs;
use std::path::Path;
use tracing::info;

/// GRUB defaults file inside the image
pub const GRUB_DEFAULTS: &str = "etc/default/grub";

const STOCK_CMDLINE: &str = r#"GRUB_CMDLINE_LINUX_DEFAULT="loglevel=3 quiet""#;
const DTB_PLACEHOLDER: &str = r#"# GRUB_DTB="path_to_dtb_file""#;

/// Rewrite the stock GRUB defaults
///
/// The stock kernel command line is replaced with `cmdline`. The device tree
/// setting replaces the commented placeholder on Arch and is appended on
/// Debian, whose defaults file has no placeholder.
pub fn rewrite_defaults(
    contents: &str,
    cmdline: Option<&str>,
    dtb: Option<&str>,
    base: OsBase,
) -> String {
    let mut text = contents.to_string();

    if let Some(cmdline) = cmdline {
        text = text.replace(
            STOCK_CMDLINE,
            &format!(r#"GRUB_CMDLINE_LINUX_DEFAULT="{}""#, cmdline),
        );
    }

    if let Some(dtb) = dtb.filter(|d| !d.is_empty()) {
        let setting = format!(r#"GRUB_DTB="{}""#, dtb);
        match base {
            OsBase::Debian => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&setting);
                text.push('\n');
            }
            OsBase::Arch => text = text.replace(DTB_PLACEHOLDER, &setting),
        }
    }

    text
}

/// Rewrite the defaults file and run grub-install and grub-mkconfig inside
/// the image
pub fn install(mount_root: &Path, config: &BuildConfig, host: &(impl Host + ?Sized)) -> Result<()> {
    let defaults = mount_root.join(GRUB_DEFAULTS);
    let contents = fs::read_to_string(&defaults)?;
    fs::write(
        &defaults,
        rewrite_defaults(
            &contents,
            config.grub_cmdline.as_deref(),
            config.grub_dtb.as_deref(),
            config.base,
        ),
    )?;

    info!("Installing GRUB ({})", config.grub_target);
    host.chroot(
        mount_root,
        &ToolInvocation::new("/sbin/grub-install").args([
            format!("--target={}", config.grub_target),
            "--efi-directory=/boot/efi".to_string(),
            "--removable".to_string(),
            format!("--bootloader-id={}", config.base),
        ]),
    )?;

    fs::create_dir_all(mount_root.join("boot/grub"))?;
    host.chroot(
        mount_root,
        &ToolInvocation::new("/sbin/grub-mkconfig").args(["-o", "/boot/grub/grub.cfg"]),
    )?;
    Ok(())
}
