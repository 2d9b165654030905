// src/config/size.rs

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Image size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageSize(u64);

impl ImageSize {
    pub fn from_kib(kib: u64) -> Self {
        Self(kib * KIB)
    }

    pub fn from_mib(mib: u64) -> Self {
        Self(mib * MIB)
    }

    /// Size in bytes
    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Size in KiB, rounded up
    pub fn kib(&self) -> u64 {
        self.0.div_ceil(KIB)
    }
}

impl FromStr for ImageSize {
    type Err = Error;

    /// Parse size from string (e.g., "4G", "512M", "8192K")
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("empty size".to_string()));
        }

        let (num_str, multiplier) = if let Some(n) = s.strip_suffix(['G', 'g']) {
            (n, GIB)
        } else if let Some(n) = s.strip_suffix(['M', 'm']) {
            (n, MIB)
        } else if let Some(n) = s.strip_suffix(['K', 'k']) {
            (n, KIB)
        } else if let Some(n) = s.strip_suffix(['T', 't']) {
            (n, TIB)
        } else {
            (s, 1u64)
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid size: {}", s)))?;

        let bytes = num
            .checked_mul(multiplier)
            .ok_or_else(|| Error::Config(format!("size out of range: {}", s)))?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= GIB && self.0 % GIB == 0 {
            write!(f, "{}G", self.0 / GIB)
        } else if self.0 >= MIB && self.0 % MIB == 0 {
            write!(f, "{}M", self.0 / MIB)
        } else if self.0 >= KIB && self.0 % KIB == 0 {
            write!(f, "{}K", self.0 / KIB)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
