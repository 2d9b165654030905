// src/error.rs

//! Error types for imageforge
//!
//! Every failure in the layout engine is fatal for the build that hit it.
//! Nothing here is retried; callers surface the error and run cleanup.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while planning, formatting or packaging an image
#[derive(Debug, Error)]
pub enum Error {
    /// No loop device could be bound, or the backing file preconditions failed
    #[error("Device allocation failed: {0}")]
    Allocation(String),

    /// The partition layout is empty or malformed
    #[error("Invalid partition layout: {0}")]
    Plan(String),

    /// A partitioning, formatting or mounting tool exited non-zero
    #[error("`{command}` failed with status {code}: {stderr}")]
    Format {
        command: String,
        code: i32,
        stderr: String,
    },

    /// blkid returned nothing usable for a partition
    #[error("Block device probe failed: {0}")]
    Probe(String),

    /// The build configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Any other required host command exited non-zero
    #[error("Command `{command}` failed with status {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Required host tools are missing or the process lacks privileges
    #[error("Host not ready: {0}")]
    Preflight(String),

    /// A permission fixup path resolves outside the root tree
    #[error("Path escapes the root filesystem: {0}")]
    OutOfBounds(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
