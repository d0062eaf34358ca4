use super::{apply_flip, PhaseUpdate, RunClock, TimingLog};
use crate::actuator::PositionActuator;
use crate::position::Position;
use crate::signal::SignalCoordinator;
use crate::timing::PhaseTiming;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// SchedulerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Created,
    Running,
    Stopped,
    Canceled,
}

impl SchedulerState {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerState::Created => "created",
            SchedulerState::Running => "running",
            SchedulerState::Stopped => "stopped",
            SchedulerState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Stopped | SchedulerState::Canceled)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FixedRateScheduler
// ---------------------------------------------------------------------------

/// Toggle scheduler for one recording run. Ticks on a fixed grid anchored
/// at start time: the first toggle fires after the initial delay, later
/// ones every period, and a slow tick does not shift the grid.
///
/// Single-use. A scheduler is created, started once, and ends in `Stopped`
/// or `Canceled`; a new run gets a new scheduler. Termination is
/// cooperative: the tick task is signalled and then awaited, so a toggle
/// already talking to the device always finishes before the timings are
/// sealed.
pub struct FixedRateScheduler {
    actuator: Arc<dyn PositionActuator>,
    signals: Arc<SignalCoordinator>,
    clock: RunClock,
    period_ms: u64,
    updates: mpsc::Sender<PhaseUpdate>,
    timings: Arc<TimingLog>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: SchedulerState,
}

impl FixedRateScheduler {
    pub fn new(
        actuator: Arc<dyn PositionActuator>,
        signals: Arc<SignalCoordinator>,
        clock: RunClock,
        period_ms: u64,
        updates: mpsc::Sender<PhaseUpdate>,
    ) -> FixedRateScheduler {
        let (shutdown, _) = watch::channel(false);
        FixedRateScheduler {
            actuator,
            signals,
            clock,
            period_ms,
            updates,
            timings: Arc::new(TimingLog::new()),
            shutdown,
            task: None,
            state: SchedulerState::Created,
        }
    }

    /// Begin ticking. Phase 0 opens immediately at `start_position` with the
    /// initial delay as its intended duration, so a stop before the first
    /// toggle still leaves a remainder that preserves the phase grid.
    pub fn start(&mut self, start_position: Position, initial_delay_ms: u64) {
        if self.state != SchedulerState::Created {
            warn!(state = %self.state, "scheduler is single-use, start ignored");
            return;
        }
        self.state = SchedulerState::Running;
        let clock = self.clock;
        self.timings
            .open_phase(0, start_position, initial_delay_ms as i64, clock.now_ms());

        let actuator = Arc::clone(&self.actuator);
        let signals = Arc::clone(&self.signals);
        let timings = Arc::clone(&self.timings);
        let updates = self.updates.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period_ms = self.period_ms;
        info!(period_ms, initial_delay_ms, position = %start_position, "fixed-rate run started");

        self.task = Some(tokio::spawn(async move {
            let first = Instant::now() + Duration::from_millis(initial_delay_ms);
            let mut ticker = time::interval_at(first, Duration::from_millis(period_ms.max(1)));
            let mut position = start_position;
            let mut phase_index: u32 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick_ms = clock.now_ms();
                        if let Some(entered) = apply_flip(&actuator, &signals, position) {
                            position = entered;
                        }
                        let closed = timings.close_open(tick_ms);
                        phase_index += 1;
                        let stamp = timings.open_phase(phase_index, position, period_ms as i64, tick_ms);
                        let update = PhaseUpdate { stamp, position, closed };
                        tokio::select! {
                            sent = updates.send(update) => {
                                if sent.is_err() {
                                    debug!("update receiver dropped, tick task exiting");
                                    break;
                                }
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    /// End the run, keeping its remainder usable. Waits out a toggle in
    /// progress, then closes the open timing so the caller can read how much
    /// of the interrupted phase was left.
    pub async fn stop(&mut self) -> Vec<PhaseTiming> {
        self.shut_down(SchedulerState::Stopped).await
    }

    /// End the run discarding it. Termination is identical to `stop`; what
    /// differs is the terminal state the caller sees.
    pub async fn cancel(&mut self) -> Vec<PhaseTiming> {
        self.shut_down(SchedulerState::Canceled).await
    }

    async fn shut_down(&mut self, terminal: SchedulerState) -> Vec<PhaseTiming> {
        match self.state {
            SchedulerState::Running => {
                let _ = self.shutdown.send(true);
                if let Some(task) = self.task.take() {
                    let _ = task.await;
                }
                self.timings.close_open(self.clock.now_ms());
                self.state = terminal;
                info!(state = %terminal, "fixed-rate run ended");
            }
            SchedulerState::Created => {
                self.state = terminal;
            }
            // Already terminal; first termination wins.
            SchedulerState::Stopped | SchedulerState::Canceled => {}
        }
        self.timings.snapshot()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SchedulerState::Running
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn timings(&self) -> Vec<PhaseTiming> {
        self.timings.snapshot()
    }

    pub fn last_timing(&self) -> Option<PhaseTiming> {
        self.timings.last()
    }
}
