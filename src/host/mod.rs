// src/host/mod.rs

//! Host collaborators
//!
//! The layout engine never touches disks directly. Every partitioning,
//! formatting, mounting and probing step is expressed as a [`ToolInvocation`]
//! and handed to a [`Host`], which runs it and reports the exit status and
//! captured output.
//!
//! - [`SystemHost`] spawns real processes
//! - [`RecordingHost`] records invocations and answers from scripted state
//!
//! Probing (`blkid`) and chroot execution (`arch-chroot`) are provided
//! methods built on top of [`Host::run`], so a host only has to know how to
//! run one command.

mod probe;
mod recording;

pub use probe::FsIdentity;
pub use recording::RecordingHost;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// A single external command: program plus argument vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Run a command line through `sh -c`
    pub fn shell(command: &str) -> Self {
        Self::new("sh").arg("-c").arg(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// True if any argument equals `value`
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|a| a == value)
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when the process was killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Executes external commands on behalf of the layout engine
pub trait Host {
    /// Run a command to completion. A non-zero exit is not an error here;
    /// only failing to start the process is.
    fn run(&self, invocation: &ToolInvocation) -> Result<CommandOutput>;

    /// Run a command and turn a non-zero exit into [`Error::Command`]
    fn run_checked(&self, invocation: &ToolInvocation) -> Result<CommandOutput> {
        let output = self.run(invocation)?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::Command {
                command: invocation.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Query UUID and filesystem type of a partition with `blkid`
    ///
    /// Returns `None` when blkid finds no filesystem signature.
    fn probe(&self, partition: &str) -> Result<Option<FsIdentity>> {
        let invocation = ToolInvocation::new("blkid")
            .args(["-o", "export"])
            .arg(partition);
        let output = self.run(&invocation)?;
        if !output.success() {
            debug!("blkid found nothing on {} ({})", partition, output.code);
            return Ok(None);
        }
        Ok(FsIdentity::from_blkid_export(&output.stdout))
    }

    /// Run a command with its root at `root`
    fn chroot(&self, root: &Path, invocation: &ToolInvocation) -> Result<CommandOutput> {
        let wrapped = ToolInvocation::new("arch-chroot")
            .arg_path(root)
            .arg(invocation.program.clone())
            .args(invocation.args.iter().cloned());
        self.run_checked(&wrapped)
    }

    /// Whether a tool can be found on the host
    fn tool_available(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Runs commands on the local machine
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, invocation: &ToolInvocation) -> Result<CommandOutput> {
        debug!("Running: {}", invocation);

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Command {
                command: invocation.to_string(),
                code: -1,
                stderr: format!("failed to start: {}", e),
            })?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            debug!(
                "{} exited with {}: {}",
                invocation.program,
                result.code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}
