// src/commands/plan.rs

//! `imageforge plan`: the partition layout of a build, without side effects

use anyhow::{Context, Result};
use imageforge::artifact::MIN_IMAGE_KIB;
use imageforge::config::{BuildConfig, ImageSize};
use imageforge::fstab::{MountTargets, mount_targets};
use imageforge::partition::{self, PartitionPlan};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct PlanOutput<'a> {
    img_name: &'a str,
    devices: Vec<PartitionPlan>,
    boot_partition: String,
    root_partition: String,
}

fn print_plan(plan: &PartitionPlan) {
    let device_bytes = plan.size_kib * 1024;
    println!("{} ({} MiB, {:?})", plan.disk, plan.size_kib / 1024, plan.role);
    println!(
        "  {:<16} {:>10} {:>10} {:>10}  {}",
        "Partition", "Start", "End", "Size", "Filesystem"
    );
    for part in &plan.partitions {
        let start = part.spec.start.resolve(device_bytes);
        let end = part.spec.end.resolve(device_bytes);
        let size_mib = end.saturating_sub(start) >> 20;
        let marker = if part.created { "" } else { " (not created)" };
        println!(
            "  {:<16} {:>10} {:>10} {:>7} MiB  {}{}",
            part.path,
            part.spec.start.to_string(),
            part.spec.end.to_string(),
            size_mib,
            part.spec.fs,
            marker
        );
    }
    println!("  Commands:");
    for invocation in &plan.invocations {
        println!("    {}", invocation);
    }
    println!();
}

/// Print the layout a build of `config_dir` would create
pub fn cmd_plan(
    config_dir: &Path,
    size: Option<&str>,
    disk: &str,
    alt_disk: &str,
    json: bool,
) -> Result<()> {
    let config = BuildConfig::load(config_dir)
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;

    let size_kib = match size {
        Some(size) => size.parse::<ImageSize>()?.kib(),
        None => config.image_size.map_or(MIN_IMAGE_KIB, |s| s.kib()),
    };

    let mut devices = vec![partition::plan(disk, size_kib, &config)?];
    let targets: MountTargets = if config.split_device {
        devices.push(partition::plan_boot_device(
            alt_disk,
            config.boot_image_size.kib(),
            &config,
        )?);
        mount_targets(alt_disk, Some(disk), &config)
    } else {
        mount_targets(disk, None, &config)
    };

    if json {
        let output = PlanOutput {
            img_name: &config.img_name,
            devices,
            boot_partition: targets.boot,
            root_partition: targets.root,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Plan for {} {} ({} firmware, {}, {})\n",
        config.img_name,
        config.img_version,
        config.firmware,
        config.table_type.as_str(),
        config.filesystem
    );
    for plan in &devices {
        print_plan(plan);
    }
    println!("Boot partition: {} at {}", targets.boot, config.boot_mount_point());
    println!("Root partition: {}", targets.root);
    Ok(())
}
