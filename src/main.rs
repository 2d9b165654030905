// src/main.rs

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use imageforge::config::CONFIG_FILE_NAME;
use imageforge::image::BuildOptions;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log to stderr, and mirror to `log_file` without colours when given
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Builds keep a log beside their imageforge.toml
    let log_file = match &cli.command {
        Commands::Build { config_dir, .. } if config_dir.join(CONFIG_FILE_NAME).is_file() => {
            Some(config_dir.join("imageforge.log"))
        }
        _ => None,
    };
    init_logging(cli.verbose, log_file.as_deref())?;

    match cli.command {
        Commands::Build {
            work_dir,
            config_dir,
            out_dir,
            no_compress,
            fast_forward,
            skip_bootstrap,
            keep_work_dir,
        } => commands::cmd_build(
            &work_dir,
            &config_dir,
            &out_dir,
            BuildOptions {
                compress: !no_compress,
                fast_forward,
                skip_bootstrap,
                keep_work_dir,
            },
        ),
        Commands::Plan {
            config_dir,
            size,
            disk,
            alt_disk,
            json,
        } => commands::cmd_plan(&config_dir, size.as_deref(), &disk, &alt_disk, json),
        Commands::Check { config_dir } => commands::cmd_check(&config_dir),
        Commands::Clean { work_dir, devices } => commands::cmd_clean(&work_dir, &devices),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "imageforge",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}
