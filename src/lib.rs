// src/lib.rs

//! imageforge
//!
//! Builds bootable Linux disk images, and root filesystem tarballs, from a
//! declarative config directory.
//!
//! # Architecture
//!
//! - Configuration: `imageforge.toml` is validated once into an immutable
//!   [`BuildConfig`] that every stage borrows
//! - Host seam: every external tool runs through the [`Host`] trait, so the
//!   layout engine can be exercised without touching real devices
//! - Layout engine: device allocation, partition planning, filesystem
//!   layout and mount table generation agree on one partition index rule
//! - Orchestration: [`ImageForge`] sequences the stages and leaves cleanup
//!   to its caller

pub mod artifact;
pub mod bootloader;
pub mod config;
pub mod device;
mod error;
pub mod filesystem;
pub mod fstab;
pub mod host;
pub mod image;
pub mod partition;
pub mod preflight;
pub mod rootfs;

pub use config::{
    Bootloader, BuildConfig, FirmwareMode, FsKind, ImageSize, ImageType, OsBase,
    PartitionTableType, WorkPaths,
};
pub use device::{DeviceAllocator, DeviceHandle, partition_path};
pub use error::{Error, Result};
pub use host::{CommandOutput, FsIdentity, Host, RecordingHost, SystemHost, ToolInvocation};
pub use image::{BuildOptions, BuildReport, ImageForge};
pub use partition::{
    DeviceRole, FsTag, Offset, PartitionPlan, PartitionSpec, boot_partition_index,
    root_partition_index,
};
