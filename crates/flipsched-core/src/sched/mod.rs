//! Scheduling facilities: the fixed-rate toggle scheduler that drives a
//! recording run and the one-shot ordered-phase scheduler used for replays.

pub mod fixed;
pub mod sequence;

pub use fixed::{FixedRateScheduler, SchedulerState};
pub use sequence::{PhaseSequenceScheduler, SequenceOutcome, SequencePhase};

use crate::actuator::PositionActuator;
use crate::position::Position;
use crate::signal::SignalCoordinator;
use crate::timing::{PhaseStamp, PhaseTiming};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// PhaseUpdate
// ---------------------------------------------------------------------------

/// Emitted by a scheduler each time a phase opens: the stamp of the phase
/// just entered, the position held during it, and the timing record closed
/// by the same event (absent for the very first phase of a sequence).
#[derive(Debug, Clone)]
pub struct PhaseUpdate {
    pub stamp: PhaseStamp,
    pub position: Position,
    pub closed: Option<PhaseTiming>,
}

// ---------------------------------------------------------------------------
// RunClock
// ---------------------------------------------------------------------------

/// Epoch-anchored millisecond clock. The wall clock is read once at
/// creation; from there time advances with the tokio clock, so recorded
/// times follow the same clock the timers fire on. A coordinator creates
/// one clock and hands it to every scheduler it runs, which keeps the
/// stamps of a stopped and resumed run on a single timeline.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    epoch0_ms: i64,
    t0: Instant,
}

impl RunClock {
    pub fn new() -> RunClock {
        RunClock {
            epoch0_ms: Utc::now().timestamp_millis(),
            t0: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.epoch0_ms + self.t0.elapsed().as_millis() as i64
    }
}

impl Default for RunClock {
    fn default() -> Self {
        RunClock::new()
    }
}

// ---------------------------------------------------------------------------
// TimingLog
// ---------------------------------------------------------------------------

/// Ordered record of phase timings for one run. Written from the scheduler
/// task, read by the owner; the lock is held only for single push/update
/// operations.
#[derive(Debug, Default)]
pub(crate) struct TimingLog {
    entries: Mutex<Vec<PhaseTiming>>,
}

impl TimingLog {
    pub(crate) fn new() -> TimingLog {
        TimingLog::default()
    }

    /// Open a new timing and return its stamp.
    pub(crate) fn open_phase(
        &self,
        phase_index: u32,
        position: Position,
        intended_ms: i64,
        begin_ms: i64,
    ) -> PhaseStamp {
        let timing = PhaseTiming::open(phase_index, position, intended_ms, begin_ms);
        let stamp = timing.stamp();
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(timing);
        }
        stamp
    }

    /// Close the open timing, if there is one, and return the closed record.
    pub(crate) fn close_open(&self, end_ms: i64) -> Option<PhaseTiming> {
        let mut entries = self.entries.lock().ok()?;
        let last = entries.last_mut()?;
        if !last.is_open() {
            return None;
        }
        last.end_ms = Some(end_ms);
        Some(last.clone())
    }

    pub(crate) fn last(&self) -> Option<PhaseTiming> {
        self.entries.lock().ok()?.last().cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<PhaseTiming> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// apply_flip
// ---------------------------------------------------------------------------

/// One toggle attempt. Order matters: the device confirms the flip, then
/// the position advances, then the signal coordinator hears about the newly
/// entered position. A declined or failed flip changes nothing and the
/// caller waits for its next opportunity.
pub(crate) fn apply_flip(
    actuator: &Arc<dyn PositionActuator>,
    signals: &Arc<SignalCoordinator>,
    current: Position,
) -> Option<Position> {
    if !current.is_known() {
        warn!("current position unknown, toggle skipped");
        return None;
    }
    match actuator.flip() {
        Ok(true) => {
            let entered = current.next();
            signals.on_toggle(entered);
            Some(entered)
        }
        Ok(false) => {
            debug!(position = %current, "flip declined by device");
            None
        }
        Err(e) => {
            warn!(position = %current, error = %e, "flip failed, toggle missed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::StubActuator;

    #[test]
    fn timing_log_opens_and_closes_in_order() {
        let log = TimingLog::new();
        let stamp = log.open_phase(0, Position::First, 1_000, 100);
        assert_eq!(stamp.phase_index, 0);
        assert_eq!(stamp.onset_ms, 100);

        let closed = log.close_open(600).unwrap();
        assert_eq!(closed.real_ms(), Some(500));

        log.open_phase(1, Position::Second, 1_000, 600);
        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_open());
        assert!(entries[1].is_open());
    }

    #[test]
    fn close_with_nothing_open_is_a_no_op() {
        let log = TimingLog::new();
        assert!(log.close_open(10).is_none());

        log.open_phase(0, Position::First, 100, 0);
        assert!(log.close_open(50).is_some());
        assert!(log.close_open(60).is_none(), "second close must not rewrite");
        assert_eq!(log.last().unwrap().end_ms, Some(50));
    }

    #[tokio::test]
    async fn apply_flip_advances_only_on_accepted_flips() {
        let stub = Arc::new(StubActuator::new(Position::First));
        let actuator: Arc<dyn PositionActuator> = stub.clone();
        let signals = Arc::new(SignalCoordinator::new());

        assert_eq!(
            apply_flip(&actuator, &signals, Position::First),
            Some(Position::Second)
        );

        stub.decline_next_flips(1);
        assert_eq!(apply_flip(&actuator, &signals, Position::Second), None);

        stub.set_live(false);
        assert_eq!(apply_flip(&actuator, &signals, Position::Second), None);
    }

    #[tokio::test]
    async fn apply_flip_skips_unknown_position() {
        let stub = Arc::new(StubActuator::new(Position::First));
        let actuator: Arc<dyn PositionActuator> = stub.clone();
        let signals = Arc::new(SignalCoordinator::new());

        assert_eq!(apply_flip(&actuator, &signals, Position::Unknown), None);
        assert_eq!(stub.flips_applied(), 0, "device must not be commanded blind");
    }
}
