// src/commands/build.rs

//! `imageforge build`

use anyhow::{Context, Result};
use imageforge::config::{BuildConfig, WorkPaths};
use imageforge::host::SystemHost;
use imageforge::image::{BuildOptions, ImageForge, write_build_log, write_build_manifest};
use imageforge::preflight;
use std::path::Path;
use tracing::warn;

/// Run a full build, then clean up whether or not it succeeded
pub fn cmd_build(
    work_dir: &Path,
    config_dir: &Path,
    out_dir: &Path,
    options: BuildOptions,
) -> Result<()> {
    let config = BuildConfig::load(config_dir)
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;
    let paths = WorkPaths::prepare(work_dir, &config.config_dir, out_dir, &config.arch)
        .context("Failed to prepare work directories")?;

    let host = SystemHost;
    preflight::check(&config, &host)
        .ensure_ready()
        .context("Host is not ready to build images")?;

    println!("Building {} {}...", config.img_name, config.img_version);
    println!("  Config: {}", paths.config_dir.display());
    println!("  Work directory: {}", paths.work_dir.display());
    println!("  Output: {}", paths.out_dir.display());

    let mut forge = ImageForge::new(&config, &paths, &host, options);
    let result = forge.build();
    if result.is_err() {
        for device in forge.attached_devices() {
            warn!("Build failed with {} still attached", device);
        }
    }
    forge.cleanup();

    let log_path = write_build_log(&paths.out_dir, &config.img_name, forge.log())
        .context("Failed to write build log")?;
    let report = result.context("Build failed")?;
    let manifest = write_build_manifest(&paths.out_dir, &report)
        .context("Failed to write build manifest")?;

    println!();
    for artifact in &report.artifacts {
        println!("  [OK] {}", artifact.path.display());
        println!("       sha256 {}", artifact.sha256);
    }
    println!("  Log: {}", log_path.display());
    println!("  Manifest: {}", manifest.display());
    println!("\n[OK] Build complete.");
    Ok(())
}
