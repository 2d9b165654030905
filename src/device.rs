// src/device.rs

//! Loop device allocation
//!
//! Backing files are created sparse and bound to the next free loop slot with
//! `losetup --find --show --partscan`, so the kernel exposes `<dev>pN`
//! partition nodes as soon as parted writes the table.

use crate::error::{Error, Result};
use crate::host::{Host, ToolInvocation};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Device path of partition `index` on `disk`
///
/// Disks whose name ends in a digit (`/dev/loop0`, `/dev/nvme0n1`) take a
/// `p` separator.
pub fn partition_path(disk: &str, index: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, index)
    } else {
        format!("{}{}", disk, index)
    }
}

/// A backing file bound to a loop device
#[derive(Debug)]
pub struct DeviceHandle {
    backing_file: PathBuf,
    device: String,
    released: bool,
}

impl DeviceHandle {
    /// Handle for a binding made outside this process, e.g. by a previous
    /// build that failed before cleanup
    pub fn attached(backing_file: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        Self {
            backing_file: backing_file.into(),
            device: device.into(),
            released: false,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn partition(&self, index: u32) -> String {
        partition_path(&self.device, index)
    }
}

/// Binds backing files to loop devices through a [`Host`]
pub struct DeviceAllocator<'h, H: Host + ?Sized> {
    host: &'h H,
}

impl<'h, H: Host + ?Sized> DeviceAllocator<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }

    /// Create a sparse backing file of `size_kib` and bind it to a free loop
    /// device
    pub fn acquire(&self, backing_file: &Path, size_kib: u64) -> Result<DeviceHandle> {
        if size_kib == 0 {
            return Err(Error::Allocation(format!(
                "refusing to create empty image {}",
                backing_file.display()
            )));
        }
        let parent = backing_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.is_dir() {
            return Err(Error::Allocation(format!(
                "directory {} does not exist",
                parent.display()
            )));
        }

        info!("Creating image file {} ({} KiB)", backing_file.display(), size_kib);
        let file = File::create(backing_file)?;
        file.set_len(size_kib * 1024)?;
        drop(file);

        match self.host.run(&ToolInvocation::new("modprobe").arg("loop")) {
            Ok(output) if output.success() => {}
            Ok(_) => debug!("modprobe loop failed, assuming loop support is built in"),
            Err(e) => debug!("Could not run modprobe ({}), assuming loop support is built in", e),
        }

        let losetup = ToolInvocation::new("losetup")
            .args(["--find", "--show", "--partscan"])
            .arg_path(backing_file);
        let reason = match self.host.run(&losetup) {
            Ok(output) if output.success() && !output.stdout_trimmed().is_empty() => {
                let device = output.stdout_trimmed();
                info!("Attached {} to {}", backing_file.display(), device);
                return Ok(DeviceHandle::attached(backing_file, device));
            }
            Ok(output) => format!("no free loop device: {}", output.stderr.trim()),
            Err(e) => format!("could not run losetup: {}", e),
        };

        // Nothing is bound to the file, so no cleanup would ever find it
        if let Err(e) = fs::remove_file(backing_file) {
            warn!("Could not remove {}: {}", backing_file.display(), e);
        }
        Err(Error::Allocation(format!("{} for {}", reason, backing_file.display())))
    }

    /// Unbind a loop device
    ///
    /// Releasing twice is a no-op, and a device that is already gone only
    /// logs a warning.
    pub fn release(&self, handle: &mut DeviceHandle) -> Result<()> {
        if handle.released {
            debug!("{} already released", handle.device);
            return Ok(());
        }

        let detach = ToolInvocation::new("losetup").arg("-d").arg(handle.device.clone());
        match self.host.run(&detach) {
            Ok(output) if output.success() => info!("Released {}", handle.device),
            Ok(output) => warn!(
                "losetup -d {} failed ({}), treating it as released: {}",
                handle.device,
                output.code,
                output.stderr.trim()
            ),
            Err(e) => warn!("Could not run losetup for {}: {}", handle.device, e),
        }

        handle.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CommandOutput, RecordingHost};

    #[test]
    fn test_partition_path() {
        assert_eq!(partition_path("/dev/loop0", 3), "/dev/loop0p3");
        assert_eq!(partition_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
        assert_eq!(partition_path("/dev/sda", 2), "/dev/sda2");
        assert_eq!(partition_path("/dev/mmcblk1", 1), "/dev/mmcblk1p1");
    }

    #[test]
    fn test_acquire_creates_sparse_file() {
        let tmp = tempfile::tempdir().unwrap();
        let host = RecordingHost::new();
        let image = tmp.path().join("disk.img");

        let handle = DeviceAllocator::new(&host).acquire(&image, 8192).unwrap();
        assert_eq!(handle.device(), "/dev/loop0");
        assert_eq!(handle.partition(2), "/dev/loop0p2");
        assert_eq!(std::fs::metadata(&image).unwrap().len(), 8192 * 1024);
        assert_eq!(host.count("modprobe"), 1);
        assert!(host.invocations()[1].has_arg("--partscan"));
    }

    #[test]
    fn test_acquire_without_free_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let host = RecordingHost::new().with_no_free_loop();
        let image = tmp.path().join("disk.img");
        let err = DeviceAllocator::new(&host).acquire(&image, 1024).unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
        assert!(!image.exists());
    }

    /// Host on which losetup cannot be started at all
    struct NoLosetup;

    impl Host for NoLosetup {
        fn run(&self, invocation: &ToolInvocation) -> Result<CommandOutput> {
            if invocation.program == "losetup" {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "losetup: not found",
                )));
            }
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn test_acquire_when_losetup_cannot_start() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("disk.img");
        let err = DeviceAllocator::new(&NoLosetup).acquire(&image, 1024).unwrap_err();
        assert!(matches!(err, Error::Allocation(ref msg) if msg.contains("losetup: not found")));
        assert!(!image.exists());
    }

    #[test]
    fn test_acquire_preconditions() {
        let tmp = tempfile::tempdir().unwrap();
        let host = RecordingHost::new();
        let allocator = DeviceAllocator::new(&host);

        assert!(matches!(
            allocator.acquire(&tmp.path().join("disk.img"), 0),
            Err(Error::Allocation(_))
        ));
        assert!(matches!(
            allocator.acquire(&tmp.path().join("missing/disk.img"), 1024),
            Err(Error::Allocation(_))
        ));
        assert!(host.invocations().is_empty());
    }

    #[test]
    fn test_modprobe_failure_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let host = RecordingHost::new().failing("modprobe");
        assert!(DeviceAllocator::new(&host)
            .acquire(&tmp.path().join("disk.img"), 1024)
            .is_ok());
    }

    #[test]
    fn test_release_twice() {
        let tmp = tempfile::tempdir().unwrap();
        let host = RecordingHost::new();
        let allocator = DeviceAllocator::new(&host);
        let mut handle = allocator.acquire(&tmp.path().join("disk.img"), 1024).unwrap();

        allocator.release(&mut handle).unwrap();
        allocator.release(&mut handle).unwrap();
        assert!(handle.is_released());
        assert_eq!(host.command_lines().last().unwrap(), "losetup -d /dev/loop0");
        assert_eq!(
            host.invocations().iter().filter(|i| i.has_arg("-d")).count(),
            1
        );
    }

    #[test]
    fn test_release_of_vanished_device() {
        let host = RecordingHost::new().failing("losetup");
        let mut handle = DeviceHandle::attached("/work/disk.img", "/dev/loop9");
        DeviceAllocator::new(&host).release(&mut handle).unwrap();
        assert!(handle.is_released());
    }
}
