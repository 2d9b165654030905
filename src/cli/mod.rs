// src/cli/mod.rs
//! CLI definitions for imageforge
//!
//! Argument parsing only; the handlers live in the `commands` module.
//!
//! - `build` - Bootstrap, partition, populate and publish an image
//! - `plan` - Show the partition layout without touching any device
//! - `check` - Verify host tools and privileges
//! - `clean` - Unmount, release loop devices and remove a work directory
//! - `completions` - Shell completion scripts

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imageforge")]
#[command(author = "imageforge Contributors")]
#[command(version)]
#[command(about = "Build bootable Linux disk images and root filesystem tarballs", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an image from a config directory
    Build {
        /// Scratch directory for the root tree, mounts and raw images
        #[arg(short, long)]
        work_dir: PathBuf,

        /// Directory holding imageforge.toml and package lists
        #[arg(short, long)]
        config_dir: PathBuf,

        /// Where finished artifacts are written
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Copy the raw image instead of compressing it to .xz
        #[arg(short = 'x', long)]
        no_compress: bool,

        /// Compress with the fastest xz level
        #[arg(short, long)]
        fast_forward: bool,

        /// Reuse an already bootstrapped root tree in the work directory
        #[arg(long)]
        skip_bootstrap: bool,

        /// Leave the work directory in place after the build
        #[arg(long)]
        keep_work_dir: bool,
    },

    /// Print the partition layout and the commands a build would run
    Plan {
        /// Directory holding imageforge.toml
        #[arg(short, long)]
        config_dir: PathBuf,

        /// Device size to plan for (e.g. 8G); defaults to the configured size
        #[arg(long)]
        size: Option<String>,

        /// Device path to plan against
        #[arg(long, default_value = "/dev/loop0")]
        disk: String,

        /// Second device path for split builds
        #[arg(long, default_value = "/dev/loop1")]
        alt_disk: String,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the host can run a build
    Check {
        /// Directory holding imageforge.toml
        #[arg(short, long)]
        config_dir: PathBuf,
    },

    /// Undo what a failed build left behind
    Clean {
        /// Work directory of the failed build
        #[arg(short, long)]
        work_dir: PathBuf,

        /// Loop devices to release
        #[arg(long = "device")]
        devices: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
