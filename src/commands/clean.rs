// src/commands/clean.rs

use anyhow::Result;
use imageforge::device::DeviceHandle;
use imageforge::host::SystemHost;
use imageforge::image::cleanup;
use std::path::Path;

/// Unmount, release loop devices and remove a work directory
pub fn cmd_clean(work_dir: &Path, devices: &[String]) -> Result<()> {
    println!("Cleaning up {}...", work_dir.display());

    if !work_dir.exists() && devices.is_empty() {
        println!("Work directory does not exist.");
        return Ok(());
    }

    let mut handles: Vec<DeviceHandle> = devices
        .iter()
        .map(|device| DeviceHandle::attached(work_dir, device.clone()))
        .collect();
    for handle in &handles {
        println!("  Releasing: {}", handle.device());
    }

    cleanup(&work_dir.join("mnt"), &mut handles, Some(work_dir), &SystemHost);

    if work_dir.exists() {
        println!("\n[WARN] {} could not be removed, see the log.", work_dir.display());
    } else {
        println!("\n[OK] Clean complete.");
    }
    Ok(())
}
