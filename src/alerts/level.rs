//! Alert severity levels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered alert severity.
///
/// `Success` is the neutral level a never-seen alert starts at.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Success,
    Warning,
    Error,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Success, Level::Warning, Level::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }

    /// Numeric value used by the level gauge
    pub fn as_i64(&self) -> i64 {
        match self {
            Level::Success => 1,
            Level::Warning => 2,
            Level::Error => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Level> {
        Level::ALL.into_iter().find(|level| level.as_i64() == value)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" => Ok(Level::Success),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown alert level '{}'", other)),
        }
    }
}
