// src/rootfs/packages.rs

use crate::config::{BuildConfig, OsBase};
use crate::error::{Error, Result};
use crate::host::{Host, ToolInvocation};
use std::fs;
use std::path::Path;
use tracing::info;

/// Package names from a `packages.<arch>` list; blank lines and `#`
/// comments are skipped
pub fn parse_package_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

pub fn read_package_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read package list {}: {}", path.display(), e))
    })?;
    Ok(parse_package_list(&text))
}

/// `pacstrap` invocation for Arch based images
pub fn pacstrap(config: &BuildConfig, install_dir: &Path) -> Result<ToolInvocation> {
    let pacman_conf = config
        .pacman_conf
        .as_deref()
        .ok_or_else(|| Error::Config("arch builds need a pacman.conf".to_string()))?;

    Ok(ToolInvocation::new("pacstrap")
        .args(["-c", "-C"])
        .arg_path(pacman_conf)
        .args(["-M", "-G"])
        .arg_path(install_dir)
        .args(config.packages.iter().cloned()))
}

/// `mmdebstrap` invocation for Debian based images
pub fn mmdebstrap(config: &BuildConfig, install_dir: &Path) -> Result<ToolInvocation> {
    let (Some(suite), Some(mirror)) = (config.suite.as_deref(), config.mirror.as_deref()) else {
        return Err(Error::Config(
            "debian builds need both suite and mirror".to_string(),
        ));
    };

    let mut inv = ToolInvocation::new("mmdebstrap")
        .arg(format!("--arch={}", config.arch))
        .arg(format!("--include={}", config.packages.join(",")))
        .arg(format!("--components={}", config.components.join(" ")));
    if let Some(hook) = &config.customize_hook {
        inv = inv.arg(format!(
            "--customize-hook={} {}",
            hook.display(),
            install_dir.display()
        ));
    }
    Ok(inv
        .arg("--verbose")
        .arg(suite)
        .arg_path(install_dir)
        .arg(mirror))
}

/// Install the package set into `install_dir` with the distribution's
/// bootstrap tool
pub fn bootstrap(config: &BuildConfig, install_dir: &Path, host: &(impl Host + ?Sized)) -> Result<()> {
    let invocation = match config.base {
        OsBase::Arch => pacstrap(config, install_dir)?,
        OsBase::Debian => mmdebstrap(config, install_dir)?,
    };

    info!(
        "Installing {} packages into {} with {}",
        config.packages.len(),
        install_dir.display(),
        invocation.program
    );
    host.run_checked(&invocation)?;
    info!("{} complete", invocation.program);
    Ok(())
}
