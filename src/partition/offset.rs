// src/partition/offset.rs

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A partition boundary in the units parted understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// 512-byte sectors
    Sectors(u64),
    Kib(u64),
    Mib(u64),
    Gib(u64),
    /// Percentage of the whole device
    Percent(u8),
}

impl Offset {
    /// Absolute position in bytes on a device of `device_bytes`
    ///
    /// Saturates at `u64::MAX`, which no device can hold.
    pub fn resolve(&self, device_bytes: u64) -> u64 {
        match *self {
            Self::Percent(p) => (u128::from(device_bytes) * u128::from(p) / 100) as u64,
            _ => self.absolute_bytes().unwrap_or(u64::MAX),
        }
    }

    /// Byte position of a fixed offset, `None` on overflow or for percentages
    fn absolute_bytes(&self) -> Option<u64> {
        match *self {
            Self::Sectors(n) => n.checked_mul(512),
            Self::Kib(n) => n.checked_mul(1 << 10),
            Self::Mib(n) => n.checked_mul(1 << 20),
            Self::Gib(n) => n.checked_mul(1 << 30),
            Self::Percent(_) => None,
        }
    }
}

impl FromStr for Offset {
    type Err = Error;

    /// Parse parted-style offsets: `2048s`, `32KiB`, `257MiB`, `2GiB`, `100%`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num, unit) = s.split_at(split);

        let value: u64 = num
            .parse()
            .map_err(|_| Error::Config(format!("invalid partition offset: {:?}", s)))?;

        let offset = match unit.to_ascii_lowercase().as_str() {
            "s" => Self::Sectors(value),
            "kib" => Self::Kib(value),
            "mib" => Self::Mib(value),
            "gib" => Self::Gib(value),
            "%" if value <= 100 => return Ok(Self::Percent(value as u8)),
            "%" => return Err(Error::Config(format!("percentage above 100: {}", s))),
            _ => {
                return Err(Error::Config(format!(
                    "unsupported offset unit in {:?} (use s, KiB, MiB, GiB or %)",
                    s
                )));
            }
        };

        if offset.absolute_bytes().is_none() {
            return Err(Error::Config(format!("partition offset {} is too large", s)));
        }
        Ok(offset)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sectors(n) => write!(f, "{}s", n),
            Self::Kib(n) => write!(f, "{}KiB", n),
            Self::Mib(n) => write!(f, "{}MiB", n),
            Self::Gib(n) => write!(f, "{}GiB", n),
            Self::Percent(p) => write!(f, "{}%", p),
        }
    }
}

impl Serialize for Offset {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
