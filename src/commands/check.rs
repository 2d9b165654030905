// src/commands/check.rs

use anyhow::{Context, Result};
use imageforge::config::BuildConfig;
use imageforge::host::SystemHost;
use imageforge::preflight;
use std::path::Path;

/// Report host tools and privileges for the build in `config_dir`
pub fn cmd_check(config_dir: &Path) -> Result<()> {
    let config = BuildConfig::load(config_dir)
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;

    println!("Checking host for {} ({})...\n", config.img_name, config.arch);
    let report = preflight::check(&config, &SystemHost);

    for tool in &report.tools {
        let status = if tool.found { "[OK]" } else { "[MISSING]" };
        let note = if tool.required { "" } else { " (optional)" };
        println!("  {} {}{}", status, tool.name, note);
    }
    let root = if report.is_root { "[OK]" } else { "[MISSING]" };
    println!("  {} root privileges", root);
    println!();

    report.ensure_ready()?;
    println!("[OK] Host is ready to build.");
    Ok(())
}
