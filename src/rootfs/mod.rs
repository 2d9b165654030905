// src/rootfs/mod.rs

//! Root filesystem preparation
//!
//! The tree is bootstrapped into the work directory, then copied onto the
//! mounted image, then finished in place: permission fixups, skeleton
//! copies for regular accounts, and removal of the machine id so every
//! flashed device generates its own.

mod packages;
mod perms;
mod skel;

pub use packages::{bootstrap, mmdebstrap, pacstrap, parse_package_list, read_package_list};
pub use perms::{PermFix, apply as apply_perms, parse_id_table, resolve_in_root};
pub use skel::{LoginUser, copy_skel_to_users, seedable_users};

use crate::error::{Error, Result};
use crate::host::{Host, ToolInvocation};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files holding the machine id inside the tree
pub const MACHINE_ID_FILES: [&str; 2] = ["etc/machine-id", "var/lib/dbus/machine-id"];

/// rsync exit codes for a transfer where some attributes could not be kept
const RSYNC_PARTIAL: [i32; 2] = [23, 24];

/// Command copying the contents of `src` into `dst`
pub fn copy_invocation(src: &Path, dst: &Path, rsync: bool) -> ToolInvocation {
    if rsync {
        ToolInvocation::new("rsync")
            .args(["-aHAX", "--exclude=/proc/*"])
            .arg(format!("{}/", src.display()))
            .arg(format!("{}/", dst.display()))
    } else {
        ToolInvocation::new("cp")
            .arg("-a")
            .arg(format!("{}/.", src.display()))
            .arg(format!("{}/", dst.display()))
    }
}

/// Copy the bootstrapped tree onto the mounted image
///
/// Uses rsync when the host has it, `cp -a` otherwise. A partial rsync
/// transfer (FAT boot partitions cannot hold ownership) only warns.
pub fn copy_tree(src: &Path, dst: &Path, host: &(impl Host + ?Sized)) -> Result<()> {
    let invocation = copy_invocation(src, dst, host.tool_available("rsync"));
    info!("Copying {} to {}", src.display(), dst.display());

    let output = host.run(&invocation)?;
    if output.success() {
        return Ok(());
    }
    if invocation.program == "rsync" && RSYNC_PARTIAL.contains(&output.code) {
        warn!(
            "rsync could not preserve every attribute ({}): {}",
            output.code,
            output.stderr.trim()
        );
        return Ok(());
    }
    Err(Error::Command {
        command: invocation.to_string(),
        code: output.code,
        stderr: output.stderr.trim().to_string(),
    })
}

/// Delete the machine id files, returning the ones that existed
pub fn remove_machine_id(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for rel in MACHINE_ID_FILES {
        let path = root.join(rel);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed.push(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

/// Bytes of regular files under `root`, not counting its `proc` directory
pub fn tree_size_bytes(root: &Path) -> u64 {
    let proc_dir = root.join("proc");
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.path() != proc_dir)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Finish the tree mounted at `root` after it has been copied
pub fn finalize(root: &Path, perms: &[PermFix]) -> Result<()> {
    apply_perms(root, perms)?;
    copy_skel_to_users(root)?;
    remove_machine_id(root)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;

    #[test]
    fn test_copy_prefers_rsync() {
        let host = RecordingHost::new();
        copy_tree(Path::new("/work/aarch64"), Path::new("/work/mnt"), &host).unwrap();
        assert_eq!(
            host.command_lines(),
            vec!["rsync -aHAX --exclude=/proc/* /work/aarch64/ /work/mnt/"]
        );
    }

    #[test]
    fn test_copy_falls_back_to_cp() {
        let host = RecordingHost::new().without_tool("rsync");
        copy_tree(Path::new("/work/aarch64"), Path::new("/work/mnt"), &host).unwrap();
        assert_eq!(host.command_lines(), vec!["cp -a /work/aarch64/. /work/mnt/"]);
    }

    #[test]
    fn test_copy_failure() {
        let host = RecordingHost::new().failing("rsync");
        assert!(matches!(
            copy_tree(Path::new("/a"), Path::new("/b"), &host),
            Err(Error::Command { code: 1, .. })
        ));
    }

    #[test]
    fn test_remove_machine_id() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("etc")).unwrap();
        fs::write(tmp.path().join("etc/machine-id"), "abc\n").unwrap();

        let removed = remove_machine_id(tmp.path()).unwrap();
        assert_eq!(removed, vec![tmp.path().join("etc/machine-id")]);
        assert!(remove_machine_id(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_tree_size_skips_proc() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("proc")).unwrap();
        fs::create_dir_all(tmp.path().join("usr/bin")).unwrap();
        fs::write(tmp.path().join("proc/kcore"), vec![0u8; 4096]).unwrap();
        fs::write(tmp.path().join("usr/bin/tool"), vec![0u8; 1000]).unwrap();
        fs::write(tmp.path().join("etc-file"), vec![0u8; 24]).unwrap();

        assert_eq!(tree_size_bytes(tmp.path()), 1024);
    }
}
