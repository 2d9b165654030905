// src/partition/layouts.rs

//! Partition-table generators
//!
//! A layout is either one of the built-in presets or a declared list of
//! `{ start, end, fs }` entries from `imageforge.toml`. Either way it becomes
//! a [`PartitionTableFn`]; `fs = "root"` is replaced by the build's root
//! filesystem when the generator runs.

use super::{FsTag, Offset, PartitionSpec};
use crate::config::{FsKind, PartitionTableFn};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;

/// Built-in layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutPreset {
    /// Boot fat32 at index 1, root at index 2
    Legacy,
    /// Firmware slot at index 1 (created by prefix hooks), ESP at 2, root at 3
    Uefi,
    /// Root filesystem only, for the root half of a split build
    RootOnly,
    /// fat32 only, for the boot half of a split build
    BootOnly,
}

/// One declared partition
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutEntry {
    pub start: String,
    pub end: String,
    /// `fat32`, `none`, `root` or any parted filesystem hint
    pub fs: String,
}

/// `[layout]` / `[boot_layout]` tables
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutSection {
    pub preset: Option<LayoutPreset>,
    #[serde(default)]
    pub partitions: Vec<LayoutEntry>,
}

impl LayoutSection {
    pub fn into_generator(self) -> Result<PartitionTableFn> {
        match (self.preset, self.partitions.is_empty()) {
            (Some(p), true) => Ok(preset(p)),
            (None, false) => declared(&self.partitions),
            (Some(_), false) => Err(Error::Config(
                "a layout takes either a preset or a partition list, not both".to_string(),
            )),
            (None, true) => Err(Error::Config(
                "layout has neither a preset nor any partitions".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
enum EntryFs {
    Root,
    Tag(FsTag),
}

fn spec(start: Offset, end: Offset, fs: &EntryFs, root: FsKind) -> PartitionSpec {
    let fs = match fs {
        EntryFs::Root => FsTag::Other(root.as_str().to_string()),
        EntryFs::Tag(tag) => tag.clone(),
    };
    PartitionSpec::new(start, end, fs)
}

/// Generator for a built-in layout
pub fn preset(preset: LayoutPreset) -> PartitionTableFn {
    let entries: Vec<(Offset, Offset, EntryFs)> = match preset {
        LayoutPreset::Legacy => vec![
            (Offset::Mib(1), Offset::Mib(257), EntryFs::Tag(FsTag::Fat32)),
            (Offset::Mib(257), Offset::Percent(100), EntryFs::Root),
        ],
        LayoutPreset::Uefi => vec![
            (Offset::Mib(1), Offset::Mib(16), EntryFs::Tag(FsTag::Reserved)),
            (Offset::Mib(16), Offset::Mib(528), EntryFs::Tag(FsTag::Fat32)),
            (Offset::Mib(528), Offset::Percent(100), EntryFs::Root),
        ],
        LayoutPreset::RootOnly => {
            vec![(Offset::Mib(1), Offset::Percent(100), EntryFs::Root)]
        }
        LayoutPreset::BootOnly => vec![(
            Offset::Mib(1),
            Offset::Percent(100),
            EntryFs::Tag(FsTag::Fat32),
        )],
    };
    into_generator(entries)
}

/// Generator for a declared partition list; offsets are parsed up front
pub fn declared(entries: &[LayoutEntry]) -> Result<PartitionTableFn> {
    let parsed = entries
        .iter()
        .map(|entry| {
            let fs = if entry.fs.eq_ignore_ascii_case("root") {
                EntryFs::Root
            } else {
                EntryFs::Tag(FsTag::parse(&entry.fs))
            };
            Ok((
                entry.start.parse::<Offset>()?,
                entry.end.parse::<Offset>()?,
                fs,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(into_generator(parsed))
}

fn into_generator(entries: Vec<(Offset, Offset, EntryFs)>) -> PartitionTableFn {
    Arc::new(move |_size_kib: u64, root: FsKind| {
        entries
            .iter()
            .map(|(start, end, fs)| spec(*start, *end, fs, root))
            .collect()
    })
}
