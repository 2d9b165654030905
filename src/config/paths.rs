// src/config/paths.rs

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directories used by one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub work_dir: PathBuf,
    pub config_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Mount root for the image being populated
    pub mnt_dir: PathBuf,
    /// Root tree the package manager installs into
    pub install_dir: PathBuf,
}

impl WorkPaths {
    /// Derive paths without touching the filesystem
    pub fn new(
        work_dir: impl AsRef<Path>,
        config_dir: impl AsRef<Path>,
        out_dir: impl AsRef<Path>,
        arch: &str,
    ) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        Self {
            mnt_dir: work_dir.join("mnt"),
            install_dir: work_dir.join(arch),
            config_dir: config_dir.as_ref().to_path_buf(),
            out_dir: out_dir.as_ref().to_path_buf(),
            work_dir,
        }
    }

    /// Create the work, output, mount and install directories and
    /// canonicalize everything
    pub fn prepare(
        work_dir: impl AsRef<Path>,
        config_dir: impl AsRef<Path>,
        out_dir: impl AsRef<Path>,
        arch: &str,
    ) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.is_dir() {
            return Err(Error::Config(format!(
                "config directory {} does not exist",
                config_dir.display()
            )));
        }

        fs::create_dir_all(work_dir.as_ref())?;
        fs::create_dir_all(out_dir.as_ref())?;

        let paths = Self::new(
            work_dir.as_ref().canonicalize()?,
            config_dir.canonicalize()?,
            out_dir.as_ref().canonicalize()?,
            arch,
        );
        fs::create_dir_all(&paths.mnt_dir)?;
        fs::create_dir_all(&paths.install_dir)?;

        Ok(paths)
    }

    /// Backing file of the main (or root) device
    pub fn image_file(&self, img_name: &str) -> PathBuf {
        self.work_dir.join(format!("{}.img", img_name))
    }

    /// Backing file of the boot device in split builds
    pub fn boot_image_file(&self, img_name: &str) -> PathBuf {
        self.work_dir.join(format!("{}-boot.img", img_name))
    }

    pub fn log_file(&self) -> PathBuf {
        self.config_dir.join("imageforge.log")
    }
}
