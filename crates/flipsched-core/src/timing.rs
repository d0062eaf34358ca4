use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

/// Unit attached to user-facing durations (intervals, signal lag, signal
/// length). Everything is converted to milliseconds at the edge; the engine
/// itself only works in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn all() -> &'static [TimeUnit] {
        &[
            TimeUnit::Milliseconds,
            TimeUnit::Seconds,
            TimeUnit::Minutes,
            TimeUnit::Hours,
        ]
    }

    /// Milliseconds in one unit.
    pub fn factor_ms(self) -> f64 {
        match self {
            TimeUnit::Milliseconds => 1.0,
            TimeUnit::Seconds => 1_000.0,
            TimeUnit::Minutes => 60_000.0,
            TimeUnit::Hours => 3_600_000.0,
        }
    }

    pub fn to_millis(self, value: f64) -> f64 {
        value * self.factor_ms()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = crate::error::ActuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ms" | "millis" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "s" | "sec" | "seconds" => Ok(TimeUnit::Seconds),
            "min" | "minutes" => Ok(TimeUnit::Minutes),
            "h" | "hours" => Ok(TimeUnit::Hours),
            _ => Err(crate::error::ActuationError::InvalidTimeUnit(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseStamp
// ---------------------------------------------------------------------------

/// Observer-facing record of one phase onset: which phase fired, the
/// position held during it, and when it began (epoch milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStamp {
    pub phase_index: u32,
    pub position: Position,
    pub onset_ms: i64,
}

// ---------------------------------------------------------------------------
// PhaseTiming
// ---------------------------------------------------------------------------

/// Intended versus real duration of one phase. A timing is opened when its
/// phase begins and closed by whatever ends the phase: the next tick, a
/// stop, or a cancel. `end_ms` stays `None` while the phase is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase_index: u32,
    pub position: Position,
    pub intended_ms: i64,
    pub begin_ms: i64,
    pub end_ms: Option<i64>,
}

impl PhaseTiming {
    pub fn open(phase_index: u32, position: Position, intended_ms: i64, begin_ms: i64) -> Self {
        PhaseTiming {
            phase_index,
            position,
            intended_ms,
            begin_ms,
            end_ms: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }

    pub fn real_ms(&self) -> Option<i64> {
        self.end_ms.map(|end| end - self.begin_ms)
    }

    /// Signed difference between real and intended duration. Negative when
    /// the phase was cut short, positive when a tick fired late.
    pub fn mismatch_ms(&self) -> Option<i64> {
        self.real_ms().map(|real| real - self.intended_ms)
    }

    /// Unserved portion of the intended duration, clamped at zero. `None`
    /// while the phase is still open.
    pub fn remainder(&self) -> Option<PhaseRemainder> {
        let real = self.real_ms()?;
        let remaining = (self.intended_ms - real).max(0);
        Some(PhaseRemainder {
            position: self.position,
            value: remaining as f64,
            unit: TimeUnit::Milliseconds,
            intended_ms: self.intended_ms as f64,
        })
    }

    pub fn stamp(&self) -> PhaseStamp {
        PhaseStamp {
            phase_index: self.phase_index,
            position: self.position,
            onset_ms: self.begin_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseRemainder
// ---------------------------------------------------------------------------

/// Leftover of a phase interrupted by a stop. Consumed as the initial delay
/// of the next run so the phase grid lines up across a pause.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseRemainder {
    /// Position held during the interrupted phase.
    pub position: Position,
    pub value: f64,
    pub unit: TimeUnit,
    /// Full intended duration of the interrupted phase, in milliseconds.
    pub intended_ms: f64,
}

impl PhaseRemainder {
    pub fn remaining_ms(&self) -> f64 {
        self.unit.to_millis(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversions_to_millis() {
        assert_eq!(TimeUnit::Milliseconds.to_millis(250.0), 250.0);
        assert_eq!(TimeUnit::Seconds.to_millis(2.0), 2_000.0);
        assert_eq!(TimeUnit::Minutes.to_millis(1.5), 90_000.0);
        assert_eq!(TimeUnit::Hours.to_millis(0.5), 1_800_000.0);
    }

    #[test]
    fn unit_parses_short_and_long_names() {
        assert_eq!("ms".parse::<TimeUnit>().unwrap(), TimeUnit::Milliseconds);
        assert_eq!("seconds".parse::<TimeUnit>().unwrap(), TimeUnit::Seconds);
        assert_eq!("min".parse::<TimeUnit>().unwrap(), TimeUnit::Minutes);
        assert_eq!("h".parse::<TimeUnit>().unwrap(), TimeUnit::Hours);
        assert!("fortnights".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn open_timing_has_no_derived_values() {
        let t = PhaseTiming::open(0, Position::First, 2_000, 1_000);
        assert!(t.is_open());
        assert_eq!(t.real_ms(), None);
        assert_eq!(t.mismatch_ms(), None);
        assert!(t.remainder().is_none());
    }

    #[test]
    fn cut_short_phase_reports_negative_mismatch_and_remainder() {
        let mut t = PhaseTiming::open(1, Position::Second, 2_000, 2_000);
        t.end_ms = Some(3_000);
        assert_eq!(t.real_ms(), Some(1_000));
        assert_eq!(t.mismatch_ms(), Some(-1_000));
        let rem = t.remainder().unwrap();
        assert_eq!(rem.position, Position::Second);
        assert_eq!(rem.remaining_ms(), 1_000.0);
        assert_eq!(rem.intended_ms, 2_000.0);
    }

    #[test]
    fn overrun_phase_clamps_remainder_at_zero() {
        let mut t = PhaseTiming::open(2, Position::First, 1_000, 0);
        t.end_ms = Some(1_250);
        assert_eq!(t.mismatch_ms(), Some(250));
        assert_eq!(t.remainder().unwrap().remaining_ms(), 0.0);
    }

    #[test]
    fn stamp_reflects_phase_onset() {
        let t = PhaseTiming::open(3, Position::Second, 500, 42_000);
        let stamp = t.stamp();
        assert_eq!(stamp.phase_index, 3);
        assert_eq!(stamp.position, Position::Second);
        assert_eq!(stamp.onset_ms, 42_000);
    }
}
