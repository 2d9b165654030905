// src/rootfs/perms.rs

//! Ownership and mode fixups inside the root tree
//!
//! Owner and group names are looked up in the tree's own `etc/passwd` and
//! `etc/group`, since the host's user database does not describe the image.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::{PermissionsExt, lchown};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One `[perms]` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermFix {
    /// Absolute path inside the root tree
    pub path: String,
    pub owner: String,
    pub group: String,
    pub mode: u32,
    /// Set when the configured path ends in `/`
    pub recursive: bool,
}

impl PermFix {
    pub fn parse(path: &str, owner: &str, group: &str, mode: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::Config(format!(
                "permission path {} must be absolute",
                path
            )));
        }
        let mode = u32::from_str_radix(mode.trim_start_matches("0o"), 8)
            .ok()
            .filter(|m| *m <= 0o7777)
            .ok_or_else(|| Error::Config(format!("invalid mode {} for {}", mode, path)))?;

        Ok(Self {
            path: path.to_string(),
            owner: owner.to_string(),
            group: group.to_string(),
            mode,
            recursive: path.len() > 1 && path.ends_with('/'),
        })
    }
}

/// Resolve `path` inside `root`
///
/// The result must be exactly `root/path`: parent components and symlinks
/// anywhere along the way are rejected.
pub fn resolve_in_root(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::OutOfBounds(PathBuf::from(path)));
    }

    let root = root.canonicalize()?;
    let expected = root.join(relative);
    let resolved = expected.canonicalize().map_err(|e| {
        Error::Config(format!("{} not found in the root tree: {}", path, e))
    })?;

    if resolved != expected.components().collect::<PathBuf>() {
        return Err(Error::OutOfBounds(PathBuf::from(path)));
    }
    Ok(resolved)
}

/// `name -> id` from a passwd or group file (third field is the id)
pub fn parse_id_table(text: &str) -> HashMap<String, u32> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let id = fields.nth(1)?.parse().ok()?;
            Some((name.to_string(), id))
        })
        .collect()
}

fn load_table(root: &Path, file: &str) -> HashMap<String, u32> {
    fs::read_to_string(root.join(file))
        .map(|text| parse_id_table(&text))
        .unwrap_or_default()
}

fn resolve_id(name: &str, table: &HashMap<String, u32>, kind: &str) -> Result<u32> {
    if let Ok(id) = name.parse() {
        return Ok(id);
    }
    table
        .get(name)
        .copied()
        .ok_or_else(|| Error::Config(format!("unknown {} {} in the root tree", kind, name)))
}

/// Apply every fixup to the tree at `root`
pub fn apply(root: &Path, fixes: &[PermFix]) -> Result<()> {
    if fixes.is_empty() {
        return Ok(());
    }
    let users = load_table(root, "etc/passwd");
    let groups = load_table(root, "etc/group");

    for fix in fixes {
        let path = resolve_in_root(root, &fix.path)?;
        let uid = resolve_id(&fix.owner, &users, "user")?;
        let gid = resolve_id(&fix.group, &groups, "group")?;

        if fix.recursive {
            for entry in WalkDir::new(&path).follow_links(false) {
                let entry = entry.map_err(std::io::Error::from)?;
                lchown(entry.path(), Some(uid), Some(gid))?;
            }
        } else {
            lchown(&path, Some(uid), Some(gid))?;
        }
        fs::set_permissions(&path, fs::Permissions::from_mode(fix.mode))?;

        debug!("{} -> {}:{} {:o}", fix.path, uid, gid, fix.mode);
    }

    info!("Applied {} permission fixups", fixes.len());
    Ok(())
}
