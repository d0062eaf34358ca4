use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// One of the two resting positions of a flipper device. `Unknown` is what
/// the driver reports before the first confirmed move (power-up, lost
/// encoder state) and is never a valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    First,
    Second,
    Unknown,
}

impl Position {
    /// The two reachable positions, in device order.
    pub fn known() -> &'static [Position] {
        &[Position::First, Position::Second]
    }

    /// Wire code used by the device protocol. Zero means unreported.
    pub fn code(self) -> u8 {
        match self {
            Position::First => 1,
            Position::Second => 2,
            Position::Unknown => 0,
        }
    }

    pub fn from_code(code: u8) -> Position {
        match code {
            1 => Position::First,
            2 => Position::Second,
            _ => Position::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Position::Unknown)
    }

    /// The position a toggle lands on. `Unknown` stays `Unknown`; callers
    /// must check `is_known` before relying on the result.
    pub fn next(self) -> Position {
        match self {
            Position::First => Position::Second,
            Position::Second => Position::First,
            Position::Unknown => Position::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Position::First => "first",
            Position::Second => "second",
            Position::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Position {
    type Err = crate::error::ActuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Position::First),
            "second" => Ok(Position::Second),
            _ => Err(crate::error::ActuationError::InvalidPosition(s.to_string())),
        }
    }
}
