// src/host/probe.rs

use serde::Serialize;

/// Filesystem identity of a formatted partition, as reported by blkid
///
/// Only valid until the partition is reformatted; query it again afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsIdentity {
    pub uuid: String,
    pub fstype: String,
}

impl FsIdentity {
    pub fn new(uuid: impl Into<String>, fstype: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            fstype: fstype.into(),
        }
    }

    /// Parse `blkid -o export` output (`KEY=value` per line)
    ///
    /// Both `UUID` and `TYPE` must be present.
    pub fn from_blkid_export(output: &str) -> Option<Self> {
        let mut uuid = None;
        let mut fstype = None;

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"');
            match key {
                "UUID" if !value.is_empty() => uuid = Some(value.to_string()),
                "TYPE" if !value.is_empty() => fstype = Some(value.to_string()),
                _ => {}
            }
        }

        Some(Self {
            uuid: uuid?,
            fstype: fstype?,
        })
    }

    /// `UUID=<uuid>` spec for mount tables and kernel command lines
    pub fn uuid_spec(&self) -> String {
        format!("UUID={}", self.uuid)
    }

    /// vfat, msdos and the fatNN names all count as FAT
    pub fn is_fat(&self) -> bool {
        matches!(
            self.fstype.as_str(),
            "vfat" | "msdos" | "fat" | "fat12" | "fat16" | "fat32"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_output() {
        let out = "DEVNAME=/dev/loop0p3\nUUID=8f1c2a6e-55aa-4b6e-9d0e-1f2a3b4c5d6e\nUUID_SUB=aa\nBLOCK_SIZE=4096\nTYPE=btrfs\nPARTUUID=1234\n";
        let id = FsIdentity::from_blkid_export(out).unwrap();
        assert_eq!(id.uuid, "8f1c2a6e-55aa-4b6e-9d0e-1f2a3b4c5d6e");
        assert_eq!(id.fstype, "btrfs");
        assert_eq!(id.uuid_spec(), "UUID=8f1c2a6e-55aa-4b6e-9d0e-1f2a3b4c5d6e");
    }

    #[test]
    fn test_parse_missing_uuid() {
        assert!(FsIdentity::from_blkid_export("DEVNAME=/dev/loop0p1\nTYPE=vfat\n").is_none());
        assert!(FsIdentity::from_blkid_export("").is_none());
    }

    #[test]
    fn test_fat_family() {
        assert!(FsIdentity::new("A1B2-C3D4", "vfat").is_fat());
        assert!(FsIdentity::new("A1B2-C3D4", "msdos").is_fat());
        assert!(!FsIdentity::new("x", "ext4").is_fat());
    }
}
