// src/commands/mod.rs
//! Command handlers for the imageforge CLI

mod build;
mod check;
mod clean;
mod plan;

pub use build::cmd_build;
pub use check::cmd_check;
pub use clean::cmd_clean;
pub use plan::cmd_plan;
