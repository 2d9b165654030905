// src/bootloader/extlinux.rs

use crate::config::BuildConfig;
use crate::device::partition_path;
use crate::error::{Error, Result};
use crate::fstab::probe_required;
use crate::host::Host;
use crate::partition::root_partition_index;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Location of the stanza inside the image
pub const EXTLINUX_CONF: &str = "boot/extlinux/extlinux.conf";

/// Template, then `append root=UUID=...`, then the optional suffix
pub fn render(template: &str, uuid: &str, cmdline: &str, suffix: Option<&str>) -> String {
    let mut text = template.to_string();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }

    let append = format!("    append root=UUID={} {}", uuid, cmdline);
    text.push_str(append.trim_end());
    text.push('\n');

    if let Some(suffix) = suffix {
        text.push_str(suffix);
    }
    text
}

/// Partition whose UUID goes on the kernel command line
///
/// `disk` is the device holding the boot partition. Split builds use its
/// partition 1, the boot partition. Otherwise the root partition of `disk`.
pub fn stanza_partition(disk: &str, config: &BuildConfig) -> String {
    if config.split_device {
        partition_path(disk, 1)
    } else {
        partition_path(disk, root_partition_index(config.firmware, false))
    }
}

/// Write `boot/extlinux/extlinux.conf` under `mount_root`, truncating any
/// existing file
pub fn write_conf(
    mount_root: &Path,
    disk: &str,
    config: &BuildConfig,
    host: &(impl Host + ?Sized),
) -> Result<PathBuf> {
    let template = config
        .boot_template
        .as_deref()
        .ok_or_else(|| Error::Config("extlinux needs a configtxt template".to_string()))?;

    let partition = stanza_partition(disk, config);
    let identity = probe_required(host, &partition)?;

    let path = mount_root.join(EXTLINUX_CONF);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(
        &path,
        render(
            template,
            &identity.uuid,
            &config.cmdline,
            config.boot_template_suffix.as_deref(),
        ),
    )?;

    info!("Wrote {} (root={})", path.display(), partition);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FirmwareMode;
    use crate::host::RecordingHost;
    use crate::partition::{LayoutPreset, preset};

    const TEMPLATE: &str = "DEFAULT linux\nLABEL linux\n    KERNEL /Image\n    FDT /dtbs/rk3588-rock-5b.dtb\n";

    #[test]
    fn test_render() {
        let text = render(
            TEMPLATE,
            "1111-2222",
            "rw rootwait console=ttyS2,1500000",
            Some("    INITRD /initramfs-linux.img\n"),
        );
        assert!(text.starts_with(TEMPLATE));
        assert!(text.contains("\n    append root=UUID=1111-2222 rw rootwait console=ttyS2,1500000\n"));
        assert!(text.ends_with("    INITRD /initramfs-linux.img\n"));
    }

    #[test]
    fn test_render_without_cmdline() {
        let text = render("LABEL linux", "abcd", "", None);
        assert_eq!(text, "LABEL linux\n    append root=UUID=abcd\n");
    }

    #[test]
    fn test_stanza_partition() {
        let config = BuildConfig::new("aarch64");
        assert_eq!(stanza_partition("/dev/loop0", &config), "/dev/loop0p2");

        let uefi = BuildConfig::new("aarch64").with_firmware(FirmwareMode::Uefi);
        assert_eq!(stanza_partition("/dev/loop0", &uefi), "/dev/loop0p3");

        let split = config.with_split_device(preset(LayoutPreset::BootOnly));
        assert_eq!(stanza_partition("/dev/loop1", &split), "/dev/loop1p1");
    }

    #[test]
    fn test_split_stanza_uses_boot_partition_uuid() {
        let tmp = tempfile::tempdir().unwrap();
        let host = RecordingHost::new()
            .with_identity("/dev/loop0p1", "root-uuid", "btrfs")
            .with_identity("/dev/loop1p1", "boot-uuid", "vfat");
        let config = BuildConfig::new("aarch64")
            .with_boot_template(TEMPLATE)
            .with_split_device(preset(LayoutPreset::BootOnly));

        // Boot device is loop1, root device loop0
        let conf = write_conf(tmp.path(), "/dev/loop1", &config, &host).unwrap();
        let text = fs::read_to_string(conf).unwrap();
        assert!(text.contains("append root=UUID=boot-uuid"));
        assert!(!text.contains("root-uuid"));
    }

    #[test]
    fn test_write_conf_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = tmp.path().join(EXTLINUX_CONF);
        fs::create_dir_all(conf.parent().unwrap()).unwrap();
        fs::write(&conf, "stale contents\n").unwrap();

        let host = RecordingHost::new().with_identity("/dev/loop0p2", "root-uuid", "ext4");
        let config = BuildConfig::new("aarch64")
            .with_boot_template(TEMPLATE)
            .with_cmdline("rw");
        write_conf(tmp.path(), "/dev/loop0", &config, &host).unwrap();

        let text = fs::read_to_string(conf).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.ends_with("    append root=UUID=root-uuid rw\n"));
    }
}
