// src/image.rs

//! Build orchestration
//!
//! A build runs strictly in sequence:
//!
//! 1. bootstrap the root tree into the install directory
//! 2. attach the backing file(s) to loop devices
//! 3. partition, format and mount
//! 4. copy the tree onto the image and finish it in place
//! 5. append the mount table and configure the boot loader
//! 6. unmount, release the devices, publish the artifacts
//!
//! Nothing here cleans up on failure by itself. Whoever drives the build
//! calls [`ImageForge::cleanup`] afterwards, or the free [`cleanup`] when
//! only the work directory and device paths are known.

use crate::artifact::{self, Artifact};
use crate::bootloader;
use crate::config::{BuildConfig, ImageType, WorkPaths};
use crate::device::{DeviceAllocator, DeviceHandle};
use crate::error::Result;
use crate::filesystem;
use crate::fstab;
use crate::host::Host;
use crate::partition::{self, root_partition_index};
use crate::rootfs;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Knobs that come from the command line rather than the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// xz-compress disk images
    pub compress: bool,
    /// Lowest xz level
    pub fast_forward: bool,
    /// Reuse the install directory as it is
    pub skip_bootstrap: bool,
    pub keep_work_dir: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compress: true,
            fast_forward: false,
            skip_bootstrap: false,
            keep_work_dir: false,
        }
    }
}

/// Outcome of a successful build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub img_name: String,
    pub img_version: String,
    pub artifacts: Vec<Artifact>,
    pub log: String,
}

/// Drives one build against a [`Host`]
pub struct ImageForge<'a, H: Host + ?Sized> {
    config: &'a BuildConfig,
    paths: &'a WorkPaths,
    host: &'a H,
    options: BuildOptions,
    devices: Vec<DeviceHandle>,
    log: String,
}

impl<'a, H: Host + ?Sized> ImageForge<'a, H> {
    pub fn new(
        config: &'a BuildConfig,
        paths: &'a WorkPaths,
        host: &'a H,
        options: BuildOptions,
    ) -> Self {
        Self {
            config,
            paths,
            host,
            options,
            devices: Vec::new(),
            log: String::new(),
        }
    }

    /// Add a line to the build log
    fn log_line(&mut self, msg: &str) {
        info!("{}", msg);
        self.log.push_str(msg);
        self.log.push('\n');
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// Devices attached so far and not yet released
    pub fn attached_devices(&self) -> Vec<&str> {
        self.devices
            .iter()
            .filter(|d| !d.is_released())
            .map(DeviceHandle::device)
            .collect()
    }

    /// Byte offset of the root partition in the configured layout
    fn root_start_bytes(&self) -> u64 {
        let probe_kib = artifact::MIN_IMAGE_KIB;
        let specs = (self.config.partition_table)(probe_kib, self.config.filesystem);
        let index = root_partition_index(self.config.firmware, self.config.split_device);
        specs
            .get((index as usize).saturating_sub(1))
            .map(|spec| spec.start.resolve(probe_kib * 1024))
            .unwrap_or(0)
    }

    /// Size of the main image: configured, or estimated from the root tree
    pub fn image_size_kib(&self) -> u64 {
        match self.config.image_size {
            Some(size) => size.kib(),
            None => artifact::estimate_size_kib(
                rootfs::tree_size_bytes(&self.paths.install_dir),
                self.root_start_bytes(),
            ),
        }
    }

    /// Run the whole build
    pub fn build(&mut self) -> Result<BuildReport> {
        self.config.validate()?;
        self.log_line(&format!(
            "Building {} {} for {} ({:?}, {} firmware, {})",
            self.config.img_name,
            self.config.img_version,
            self.config.arch,
            self.config.img_type,
            self.config.firmware,
            self.config.filesystem
        ));

        self.prepare_tree()?;
        let artifacts = match self.config.img_type {
            ImageType::Image => self.build_image()?,
            ImageType::Rootfs => self.build_rootfs()?,
        };

        for artifact in &artifacts {
            self.log_line(&format!("{}  {}", artifact.sha256, artifact.path.display()));
        }
        self.log_line("Build complete");

        Ok(BuildReport {
            img_name: self.config.img_name.clone(),
            img_version: self.config.img_version.clone(),
            artifacts,
            log: self.log.clone(),
        })
    }

    fn prepare_tree(&mut self) -> Result<()> {
        let (config, paths) = (self.config, self.paths);
        let install_dir = &paths.install_dir;
        fs::create_dir_all(install_dir)?;

        if self.options.skip_bootstrap {
            self.log_line("Skipping bootstrap, reusing the install directory");
        } else {
            self.log_line(&format!("Bootstrapping {} root tree", config.base));
            rootfs::bootstrap(config, install_dir, self.host)?;
        }

        if let Some(overlay) = &config.overlay {
            self.log_line(&format!("Applying overlay {}", overlay.display()));
            rootfs::copy_tree(overlay, install_dir, self.host)?;
        }
        Ok(())
    }

    fn attach(&mut self, backing_file: &Path, size_kib: u64) -> Result<String> {
        let handle = DeviceAllocator::new(self.host).acquire(backing_file, size_kib)?;
        let device = handle.device().to_string();
        self.devices.push(handle);
        Ok(device)
    }

    fn build_image(&mut self) -> Result<Vec<Artifact>> {
        let config = self.config;
        let mnt = self.paths.mnt_dir.clone();

        let size_kib = self.image_size_kib();
        let image_file = self.paths.image_file(&config.img_name);
        self.log_line(&format!("Image size {} KiB", size_kib));
        let device = self.attach(&image_file, size_kib)?;

        let plan = partition::plan(&device, size_kib, config)?;
        let mut mounts = filesystem::build(&plan, config, &mnt, self.host)?;

        // Split builds keep /boot on a second device
        let boot_device = if config.split_device {
            let boot_file = self.paths.boot_image_file(&config.img_name);
            let boot_kib = config.boot_image_size.kib();
            let boot_device = self.attach(&boot_file, boot_kib)?;
            let boot_plan = partition::plan_boot_device(&boot_device, boot_kib, config)?;
            filesystem::partition(&boot_plan, self.host)?;
            filesystem::mount_boot(&boot_plan, config, &mut mounts, self.host)?;
            Some(boot_device)
        } else {
            filesystem::mount_boot(&plan, config, &mut mounts, self.host)?;
            None
        };

        self.log_line(&format!("Populating {}", mounts.root_partition));
        rootfs::copy_tree(&self.paths.install_dir, &mnt, self.host)?;
        rootfs::finalize(&mnt, &config.perms)?;

        let (disk, alt_disk) = match &boot_device {
            Some(boot) => (boot.as_str(), Some(device.as_str())),
            None => (device.as_str(), None),
        };
        let table = fstab::generate(disk, alt_disk, config, config.simple_boot_options, self.host)?;
        fstab::append_mount_table(&mnt, &table)?;
        bootloader::configure(&mnt, disk, config, self.host)?;

        filesystem::unmount(&mnt, self.host)?;
        self.release_devices();

        let mut images = vec![image_file];
        if boot_device.is_some() {
            images.push(self.paths.boot_image_file(&config.img_name));
        }

        let mut artifacts = Vec::with_capacity(images.len());
        for image in images {
            artifacts.push(artifact::publish_image(
                &image,
                &self.paths.out_dir,
                self.options.compress,
                self.options.fast_forward,
            )?);
        }
        Ok(artifacts)
    }

    fn build_rootfs(&mut self) -> Result<Vec<Artifact>> {
        let install_dir = &self.paths.install_dir;
        rootfs::finalize(install_dir, &self.config.perms)?;
        let artifact = artifact::pack_rootfs(install_dir, &self.paths.out_dir, &self.config.img_name)?;
        Ok(vec![artifact])
    }

    fn release_devices(&mut self) {
        let allocator = DeviceAllocator::new(self.host);
        for handle in &mut self.devices {
            if let Err(e) = allocator.release(handle) {
                warn!("Releasing {} failed: {}", handle.device(), e);
            }
        }
    }

    /// Unmount, release every attached device and, unless asked to keep it,
    /// remove the work directory
    pub fn cleanup(&mut self) {
        self.log_line("Cleaning up");
        let work_dir = (!self.options.keep_work_dir).then_some(self.paths.work_dir.as_path());
        cleanup(&self.paths.mnt_dir, &mut self.devices, work_dir, self.host);
    }
}

/// Whether `path` is a mount point according to `/proc/self/mountinfo`
pub fn is_mounted(path: &Path) -> bool {
    let Ok(mountinfo) = fs::read_to_string("/proc/self/mountinfo") else {
        return false;
    };
    let path = path.to_string_lossy();
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| mount_point == path)
}

/// Tear down whatever a build left behind
///
/// Unmounts everything below `mount_root`, releases `devices` and removes
/// `work_dir` when given. The work directory stays if the mount root is
/// still mounted. Every step tolerates state that is already gone.
pub fn cleanup(
    mount_root: &Path,
    devices: &mut [DeviceHandle],
    work_dir: Option<&Path>,
    host: &(impl Host + ?Sized),
) {
    filesystem::unmount_all(mount_root, host);

    let allocator = DeviceAllocator::new(host);
    for handle in devices.iter_mut() {
        if let Err(e) = allocator.release(handle) {
            warn!("Releasing {} failed: {}", handle.device(), e);
        }
    }

    let Some(work_dir) = work_dir else {
        return;
    };
    if is_mounted(mount_root) {
        warn!(
            "{} is still mounted, keeping {}",
            mount_root.display(),
            work_dir.display()
        );
        return;
    }
    match fs::remove_dir_all(work_dir) {
        Ok(()) => info!("Removed {}", work_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", work_dir.display(), e),
    }
}

/// Write a build log next to the artifacts as `<img_name>.log`
pub fn write_build_log(out_dir: &Path, img_name: &str, log: &str) -> Result<PathBuf> {
    let path = out_dir.join(format!("{}.log", img_name));
    fs::write(&path, log)?;
    Ok(path)
}

/// Write the build report as `<img_name>.json` beside the artifacts
pub fn write_build_manifest(out_dir: &Path, report: &BuildReport) -> Result<PathBuf> {
    let path = out_dir.join(format!("{}.json", report.img_name));
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsKind, ImageSize};
    use crate::host::RecordingHost;
    use crate::partition::{Offset, PartitionSpec};

    fn small_layout(_size_kib: u64, root: FsKind) -> Vec<PartitionSpec> {
        vec![
            PartitionSpec::fat32(Offset::Mib(1), Offset::Mib(9)),
            PartitionSpec::filesystem(Offset::Mib(9), Offset::Percent(100), root.as_str()),
        ]
    }

    #[test]
    fn test_size_estimate_uses_root_start() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = WorkPaths::new(tmp.path(), tmp.path(), tmp.path(), "aarch64");
        let config = BuildConfig::new("aarch64").with_partition_table(small_layout);
        let host = RecordingHost::new();
        let forge = ImageForge::new(&config, &paths, &host, BuildOptions::default());

        assert_eq!(forge.root_start_bytes(), 9 << 20);
        assert_eq!(forge.image_size_kib(), artifact::MIN_IMAGE_KIB);

        let mut sized = config.clone();
        sized.image_size = Some(ImageSize::from_mib(32));
        let forge = ImageForge::new(&sized, &paths, &host, BuildOptions::default());
        assert_eq!(forge.image_size_kib(), 32 * 1024);
    }

    #[test]
    fn test_cleanup_tolerates_released_devices() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        fs::create_dir_all(work.join("mnt")).unwrap();

        let host = RecordingHost::new();
        let mut devices = vec![DeviceHandle::attached(work.join("a.img"), "/dev/loop3")];
        cleanup(&work.join("mnt"), &mut devices, Some(&work), &host);
        cleanup(&work.join("mnt"), &mut devices, Some(&work), &host);

        assert_eq!(host.count("losetup"), 1);
        assert_eq!(host.count("umount"), 2);
        assert!(!work.exists());
    }

    #[test]
    fn test_build_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_build_log(tmp.path(), "board", "Build complete\n").unwrap();
        assert_eq!(path, tmp.path().join("board.log"));
        assert_eq!(fs::read_to_string(path).unwrap(), "Build complete\n");
    }

    #[test]
    fn test_build_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let report = BuildReport {
            img_name: "board".to_string(),
            img_version: "1.2".to_string(),
            artifacts: vec![Artifact {
                path: tmp.path().join("board.img.xz"),
                sha256: "ab".repeat(32),
                checksum_file: tmp.path().join("board.img.xz.sha256"),
            }],
            log: String::new(),
        };
        let path = write_build_manifest(tmp.path(), &report).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["img_version"], "1.2");
        assert_eq!(value["artifacts"][0]["sha256"], "ab".repeat(32));
    }
}
