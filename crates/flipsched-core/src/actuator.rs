use crate::error::{ActuationError, Result};
use crate::position::Position;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

// ---------------------------------------------------------------------------
// PositionActuator
// ---------------------------------------------------------------------------

/// Hardware seam for a two-position flipper device. Implementations wrap a
/// real driver; the engine only ever talks to this trait.
///
/// Calls are synchronous from the engine's point of view. A driver that
/// needs time to move reports the travel time through `transit_time_ms`;
/// `flip` and `move_to` return once the command is accepted, not once the
/// device has physically arrived.
pub trait PositionActuator: Send + Sync {
    /// Toggle to the other position. `Ok(false)` means the device declined
    /// the command (busy, mid-travel, position unknown) and the caller
    /// should retry on its next opportunity rather than immediately.
    fn flip(&self) -> Result<bool>;

    /// Drive to a specific position. `Unknown` is never a valid target.
    fn move_to(&self, position: Position) -> Result<()>;

    /// Last position the device confirmed, `Unknown` if it never has.
    fn current_position(&self) -> Position;

    fn transit_time_ms(&self) -> u32;

    /// Program the device's travel time. Validated against the device's own
    /// limits and rejected synchronously when out of range.
    fn set_transit_time_ms(&self, ms: u32) -> Result<()>;

    /// Whether the device is connected and answering.
    fn is_live(&self) -> bool;

    /// Release the device. Default is a no-op for drivers with nothing to
    /// tear down.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn PositionActuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionActuator").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// StubActuator
// ---------------------------------------------------------------------------

/// In-memory actuator for tests and dry runs. Tracks position and transit
/// time without touching hardware, and can be told to decline the next N
/// flips to exercise missed-toggle handling.
pub struct StubActuator {
    position: AtomicU8,
    transit_ms: AtomicU32,
    live: AtomicBool,
    flips_applied: AtomicU32,
    decline_flips: AtomicU32,
}

impl StubActuator {
    pub const TRANSIT_MIN_MS: u32 = 100;
    pub const TRANSIT_MAX_MS: u32 = 5_000;

    pub fn new(initial: Position) -> StubActuator {
        StubActuator {
            position: AtomicU8::new(initial.code()),
            transit_ms: AtomicU32::new(700),
            live: AtomicBool::new(true),
            flips_applied: AtomicU32::new(0),
            decline_flips: AtomicU32::new(0),
        }
    }

    /// Decline the next `n` flip commands with `Ok(false)`.
    pub fn decline_next_flips(&self, n: u32) {
        self.decline_flips.store(n, Ordering::SeqCst);
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    /// Number of flips the device accepted since construction.
    pub fn flips_applied(&self) -> u32 {
        self.flips_applied.load(Ordering::SeqCst)
    }
}

impl PositionActuator for StubActuator {
    fn flip(&self) -> Result<bool> {
        if !self.is_live() {
            return Err(ActuationError::DeviceNotLive);
        }
        if self.decline_flips.load(Ordering::SeqCst) > 0 {
            self.decline_flips.fetch_sub(1, Ordering::SeqCst);
            return Ok(false);
        }
        let current = self.current_position();
        if !current.is_known() {
            return Ok(false);
        }
        self.position.store(current.next().code(), Ordering::SeqCst);
        self.flips_applied.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn move_to(&self, position: Position) -> Result<()> {
        if !self.is_live() {
            return Err(ActuationError::DeviceNotLive);
        }
        if !position.is_known() {
            return Err(ActuationError::InvalidPosition(position.to_string()));
        }
        self.position.store(position.code(), Ordering::SeqCst);
        Ok(())
    }

    fn current_position(&self) -> Position {
        Position::from_code(self.position.load(Ordering::SeqCst))
    }

    fn transit_time_ms(&self) -> u32 {
        self.transit_ms.load(Ordering::SeqCst)
    }

    fn set_transit_time_ms(&self, ms: u32) -> Result<()> {
        if !(Self::TRANSIT_MIN_MS..=Self::TRANSIT_MAX_MS).contains(&ms) {
            return Err(ActuationError::TransitTimeOutOfRange {
                requested: ms,
                min: Self::TRANSIT_MIN_MS,
                max: Self::TRANSIT_MAX_MS,
            });
        }
        self.transit_ms.store(ms, Ordering::SeqCst);
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> Result<()> {
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}
