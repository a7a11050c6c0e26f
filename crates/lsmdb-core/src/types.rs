//! Small value types shared by the engine boundary and the public API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a cursor seek treats a key that is not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeekMode {
    /// Exact match only. A cursor positioned this way cannot be stepped.
    Eq,
    /// Largest key less than or equal to the target.
    Le,
    /// Smallest key greater than or equal to the target.
    Ge,
    /// Positions like [`SeekMode::Ge`] but only promises the key is valid;
    /// callers use it as a cheap existence check and never read the value.
    GeFast,
}

impl SeekMode {
    /// Numeric code understood by engines that speak the lsm1 convention.
    pub fn code(self) -> i32 {
        match self {
            SeekMode::GeFast => -2,
            SeekMode::Le => -1,
            SeekMode::Eq => 0,
            SeekMode::Ge => 1,
        }
    }

    /// Inverse of [`SeekMode::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -2 => Some(SeekMode::GeFast),
            -1 => Some(SeekMode::Le),
            0 => Some(SeekMode::Eq),
            1 => Some(SeekMode::Ge),
            _ => None,
        }
    }
}

impl Default for SeekMode {
    fn default() -> Self {
        SeekMode::Ge
    }
}

/// Durability level for committed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Safety {
    /// Never sync the log.
    Off,
    /// Sync at flush and checkpoint boundaries.
    Normal,
    /// Sync the log on every commit.
    Full,
}

impl Safety {
    /// Numeric code of this level (0, 1, 2).
    pub fn code(self) -> i32 {
        match self {
            Safety::Off => 0,
            Safety::Normal => 1,
            Safety::Full => 2,
        }
    }

    /// Inverse of [`Safety::code`]; `None` for anything outside {0, 1, 2}.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Safety::Off),
            1 => Some(Safety::Normal),
            2 => Some(Safety::Full),
            _ => None,
        }
    }
}

impl Default for Safety {
    fn default() -> Self {
        Safety::Normal
    }
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Safety::Off => "off",
            Safety::Normal => "normal",
            Safety::Full => "full",
        };
        f.write_str(name)
    }
}
