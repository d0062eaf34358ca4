use crate::error::{ActuationError, Result};
use crate::io;
use crate::position::Position;
use crate::timing::TimeUnit;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ---------------------------------------------------------------------------
// IntervalConfig
// ---------------------------------------------------------------------------

/// Flip interval for fixed-rate runs. Stored as the value the user typed
/// plus its unit; the engine reads it through `millis`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub value: f64,
    pub unit: TimeUnit,
}

impl IntervalConfig {
    pub fn new(value: f64, unit: TimeUnit) -> Result<IntervalConfig> {
        let interval = IntervalConfig { value, unit };
        interval.validate()?;
        Ok(interval)
    }

    pub fn millis(&self) -> f64 {
        self.unit.to_millis(self.value)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(ActuationError::InvalidInterval(format!(
                "{} {} is not a positive duration",
                self.value, self.unit
            )));
        }
        Ok(())
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        IntervalConfig {
            value: 30.0,
            unit: TimeUnit::Seconds,
        }
    }
}

// ---------------------------------------------------------------------------
// SignalSettings
// ---------------------------------------------------------------------------

/// Pulse description for one position: whether entering the position fires
/// the signal line at all, how long after the toggle the pulse starts, its
/// voltage, and how long it is held.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub send_signal: bool,
    pub lag_value: f64,
    pub lag_unit: TimeUnit,
    pub voltage: f64,
    pub duration_value: f64,
    pub duration_unit: TimeUnit,
}

impl SignalSettings {
    pub fn lag_ms(&self) -> f64 {
        self.lag_unit.to_millis(self.lag_value)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_unit.to_millis(self.duration_value)
    }

    /// Rejects settings the pulse tasks could not honor. Runs at
    /// configuration time; nothing is re-checked or clamped when a pulse is
    /// actually scheduled.
    pub fn validate(&self, position: Position) -> Result<()> {
        let reject = |reason: String| {
            Err(ActuationError::InvalidSignal {
                position,
                reason,
            })
        };
        if !self.lag_value.is_finite() || self.lag_value < 0.0 {
            return reject(format!("lag {} {} is negative", self.lag_value, self.lag_unit));
        }
        if !self.duration_value.is_finite() || self.duration_value < 0.0 {
            return reject(format!(
                "duration {} {} is negative",
                self.duration_value, self.duration_unit
            ));
        }
        if !self.voltage.is_finite() {
            return reject(format!("voltage {} is not finite", self.voltage));
        }
        Ok(())
    }
}

impl Default for SignalSettings {
    fn default() -> Self {
        SignalSettings {
            send_signal: false,
            lag_value: 0.0,
            lag_unit: TimeUnit::Milliseconds,
            voltage: 5.0,
            duration_value: 0.0,
            duration_unit: TimeUnit::Milliseconds,
        }
    }
}

// ---------------------------------------------------------------------------
// FlipperConfig
// ---------------------------------------------------------------------------

/// On-disk settings document for one flipper rig. Unknown positions carry
/// no settings; `first` and `second` each get their own pulse block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipperConfig {
    #[serde(default)]
    pub device_serial: String,
    #[serde(default = "default_flip_during_recording")]
    pub flip_during_recording: bool,
    #[serde(default)]
    pub interval: IntervalConfig,
    #[serde(default = "default_transit_time_ms")]
    pub transit_time_ms: u32,
    #[serde(default)]
    pub first: SignalSettings,
    #[serde(default)]
    pub second: SignalSettings,
}

fn default_flip_during_recording() -> bool {
    true
}

fn default_transit_time_ms() -> u32 {
    700
}

impl Default for FlipperConfig {
    fn default() -> Self {
        FlipperConfig {
            device_serial: String::new(),
            flip_during_recording: default_flip_during_recording(),
            interval: IntervalConfig::default(),
            transit_time_ms: default_transit_time_ms(),
            first: SignalSettings::default(),
            second: SignalSettings::default(),
        }
    }
}

impl FlipperConfig {
    pub fn load(path: &Path) -> Result<FlipperConfig> {
        let content = fs::read_to_string(path)?;
        let config: FlipperConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        io::atomic_write(path, content.as_bytes())
    }

    pub fn signal_for(&self, position: Position) -> Option<&SignalSettings> {
        match position {
            Position::First => Some(&self.first),
            Position::Second => Some(&self.second),
            Position::Unknown => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.interval.validate()?;
        self.first.validate(Position::First)?;
        self.second.validate(Position::Second)?;
        Ok(())
    }
}
