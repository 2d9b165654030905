// src/host/recording.rs

use super::{CommandOutput, FsIdentity, Host, ToolInvocation};
use crate::error::Result;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

/// Host that executes nothing
///
/// Every invocation is recorded in order. `losetup --show` hands out
/// `/dev/loop0`, `/dev/loop1`, ... unless the slot table is marked
/// exhausted, probes answer from a scripted table, and programs registered
/// with [`RecordingHost::failing`] exit 1.
#[derive(Debug, Default)]
pub struct RecordingHost {
    invocations: RefCell<Vec<ToolInvocation>>,
    identities: HashMap<String, FsIdentity>,
    failing: HashSet<String>,
    missing_tools: HashSet<String>,
    next_loop: Cell<u32>,
    loops_exhausted: bool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer probes of `partition` with the given identity
    pub fn with_identity(mut self, partition: &str, uuid: &str, fstype: &str) -> Self {
        self.identities
            .insert(partition.to_string(), FsIdentity::new(uuid, fstype));
        self
    }

    /// Make every invocation of `program` exit 1
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// Report `tool` as absent from the host
    pub fn without_tool(mut self, tool: &str) -> Self {
        self.missing_tools.insert(tool.to_string());
        self
    }

    /// Behave as if every loop device slot is taken
    pub fn with_no_free_loop(mut self) -> Self {
        self.loops_exhausted = true;
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.borrow().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Number of recorded invocations of `program`
    pub fn count(&self, program: &str) -> usize {
        self.invocations
            .borrow()
            .iter()
            .filter(|inv| inv.program == program)
            .count()
    }

    fn allocate_loop(&self) -> CommandOutput {
        if self.loops_exhausted {
            return CommandOutput::failed(1, "losetup: cannot find an unused loop device");
        }
        let n = self.next_loop.get();
        self.next_loop.set(n + 1);
        CommandOutput::ok(format!("/dev/loop{}\n", n))
    }
}

impl Host for RecordingHost {
    fn run(&self, invocation: &ToolInvocation) -> Result<CommandOutput> {
        self.invocations.borrow_mut().push(invocation.clone());

        if self.failing.contains(&invocation.program) {
            return Ok(CommandOutput::failed(1, "scripted failure"));
        }
        if invocation.program == "losetup" && invocation.has_arg("--show") {
            return Ok(self.allocate_loop());
        }
        Ok(CommandOutput::ok(""))
    }

    fn probe(&self, partition: &str) -> Result<Option<FsIdentity>> {
        self.invocations.borrow_mut().push(
            ToolInvocation::new("blkid")
                .args(["-o", "export"])
                .arg(partition),
        );
        Ok(self.identities.get(partition).cloned())
    }

    fn tool_available(&self, name: &str) -> bool {
        !self.missing_tools.contains(name)
    }
}
