// src/filesystem/btrfs.rs

//! btrfs subvolume layout

use crate::config::OsBase;

/// Mount options used while the image is being populated
pub const BUILD_MOUNT_OPTIONS: &str = "compress=zstd";

/// A subvolume and where the installed system mounts it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subvolume {
    pub name: &'static str,
    pub mount_point: &'static str,
    /// Mounted with `discard=async`; the top-level `@` is not
    pub discard: bool,
}

/// Subvolumes in creation order; `@` first
pub fn subvolumes(base: OsBase) -> [Subvolume; 5] {
    [
        Subvolume {
            name: "@",
            mount_point: "/",
            discard: false,
        },
        Subvolume {
            name: "@home",
            mount_point: "/home",
            discard: true,
        },
        Subvolume {
            name: "@log",
            mount_point: "/var/log",
            discard: true,
        },
        Subvolume {
            name: "@pkg",
            mount_point: base.package_cache(),
            discard: true,
        },
        Subvolume {
            name: "@.snapshots",
            mount_point: "/.snapshots",
            discard: true,
        },
    ]
}

impl Subvolume {
    /// Options for the mount table entry of this subvolume
    pub fn fstab_options(&self) -> String {
        format!(
            "rw,relatime,ssd{},compress=zstd,space_cache=v2,subvol=/{}",
            if self.discard { ",discard=async" } else { "" },
            self.name
        )
    }

    /// Options for mounting this subvolume during the build
    pub fn build_mount_options(&self) -> String {
        format!("{},subvol={}", BUILD_MOUNT_OPTIONS, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_subvolume_has_no_discard() {
        let subvols = subvolumes(OsBase::Arch);
        assert_eq!(subvols[0].name, "@");
        assert_eq!(
            subvols[0].fstab_options(),
            "rw,relatime,ssd,compress=zstd,space_cache=v2,subvol=/@"
        );
        for sv in &subvols[1..] {
            assert!(sv.fstab_options().contains("discard=async"), "{}", sv.name);
            assert!(sv.fstab_options().contains("compress=zstd"), "{}", sv.name);
        }
    }

    #[test]
    fn test_pkg_mount_point_follows_base() {
        assert_eq!(subvolumes(OsBase::Arch)[3].mount_point, "/var/cache/pacman/pkg");
        assert_eq!(subvolumes(OsBase::Debian)[3].mount_point, "/var/cache/apt/archives");
    }

    #[test]
    fn test_build_mount_options() {
        assert_eq!(subvolumes(OsBase::Arch)[1].build_mount_options(), "compress=zstd,subvol=@home");
    }
}
