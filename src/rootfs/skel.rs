// src/rootfs/skel.rs

use crate::error::Result;
use std::fs;
use std::os::unix::fs::{lchown, symlink};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Regular login account read from `etc/passwd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Accounts with 1000 < uid < 2000
pub fn seedable_users(passwd: &str) -> Vec<LoginUser> {
    passwd
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            let name = *fields.first()?;
            let uid: u32 = fields.get(2)?.parse().ok()?;
            let gid: u32 = fields.get(3)?.parse().ok()?;
            (uid > 1000 && uid < 2000).then(|| LoginUser {
                name: name.to_string(),
                uid,
                gid,
            })
        })
        .collect()
}

fn copy_dir(src: &Path, dst: &Path, uid: u32, gid: u32) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            if target.symlink_metadata().is_err() {
                symlink(fs::read_link(entry.path())?, &target)?;
            }
        } else {
            fs::copy(entry.path(), &target)?;
        }
        lchown(&target, Some(uid), Some(gid))?;
    }
    Ok(())
}

/// Copy `etc/skel` into the home directory of every regular account
///
/// Returns the names of the seeded accounts.
pub fn copy_skel_to_users(root: &Path) -> Result<Vec<String>> {
    let Ok(passwd) = fs::read_to_string(root.join("etc/passwd")) else {
        warn!("No etc/passwd in {}, skipping skel copy", root.display());
        return Ok(Vec::new());
    };
    let skel = root.join("etc/skel");
    if !skel.is_dir() {
        debug!("No etc/skel in {}", root.display());
        return Ok(Vec::new());
    }

    let mut seeded = Vec::new();
    for user in seedable_users(&passwd) {
        let home = root.join("home").join(&user.name);
        copy_dir(&skel, &home, user.uid, user.gid)?;
        debug!("Seeded {} from etc/skel", home.display());
        seeded.push(user.name);
    }

    if !seeded.is_empty() {
        info!("Copied etc/skel for {}", seeded.join(", "));
    }
    Ok(seeded)
}
