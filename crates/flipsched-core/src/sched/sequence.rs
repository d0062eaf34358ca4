use super::{PhaseUpdate, RunClock, TimingLog};
use crate::actuator::PositionActuator;
use crate::error::{ActuationError, Result};
use crate::position::Position;
use crate::signal::SignalCoordinator;
use crate::timing::PhaseTiming;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// SequencePhase
// ---------------------------------------------------------------------------

/// One entry of an ordered phase list: drive to `position`, hold it for
/// `duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePhase {
    pub position: Position,
    pub duration_ms: u64,
}

impl SequencePhase {
    pub fn new(position: Position, duration_ms: u64) -> SequencePhase {
        SequencePhase {
            position,
            duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// SequenceOutcome
// ---------------------------------------------------------------------------

/// How a sequence run ended. Callers must be able to tell natural
/// completion from a cancel and from a failure; a failure on the scheduling
/// task never masquerades as completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SequenceOutcome {
    Completed,
    Canceled,
    Failed { reason: String },
}

// ---------------------------------------------------------------------------
// PhaseSequenceScheduler
// ---------------------------------------------------------------------------

/// One-shot scheduler that walks a finite ordered phase list. Each phase
/// fires at the cumulative offset of the durations before it (the first
/// immediately), drives the actuator to its position, and opens a timing
/// record that the next firing closes. The run completes only after the
/// last phase has been held for its full duration.
#[derive(Debug)]
pub struct PhaseSequenceScheduler {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<SequenceOutcome>>,
    outcome: Option<SequenceOutcome>,
    timings: Arc<TimingLog>,
}

impl PhaseSequenceScheduler {
    /// Validate the phase list and launch the run.
    pub fn start(
        actuator: Arc<dyn PositionActuator>,
        signals: Arc<SignalCoordinator>,
        clock: RunClock,
        phases: Vec<SequencePhase>,
        updates: mpsc::Sender<PhaseUpdate>,
    ) -> Result<PhaseSequenceScheduler> {
        if phases.is_empty() {
            return Err(ActuationError::InvalidSequence(
                "phase list is empty".to_string(),
            ));
        }
        if phases.iter().any(|phase| !phase.position.is_known()) {
            return Err(ActuationError::InvalidSequence(
                "phase targets the unknown position".to_string(),
            ));
        }

        let timings = Arc::new(TimingLog::new());
        let log = Arc::clone(&timings);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        info!(phases = phases.len(), "phase sequence started");

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut held = actuator.current_position();
            let mut offset = Duration::ZERO;
            for (index, phase) in phases.iter().enumerate() {
                tokio::select! {
                    _ = time::sleep_until(start + offset) => {}
                    _ = shutdown_rx.changed() => {
                        log.close_open(clock.now_ms());
                        return SequenceOutcome::Canceled;
                    }
                }
                let fired_ms = clock.now_ms();
                if let Err(e) = actuator.move_to(phase.position) {
                    log.close_open(fired_ms);
                    warn!(phase = index, position = %phase.position, error = %e, "sequence move failed");
                    return SequenceOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
                // A pulse fires only when the device actually changed position.
                if phase.position != held {
                    signals.on_toggle(phase.position);
                    held = phase.position;
                }
                let closed = log.close_open(fired_ms);
                let stamp =
                    log.open_phase(index as u32, phase.position, phase.duration_ms as i64, fired_ms);
                let update = PhaseUpdate {
                    stamp,
                    position: phase.position,
                    closed,
                };
                tokio::select! {
                    sent = updates.send(update) => {
                        if sent.is_err() {
                            debug!("update receiver dropped, sequence abandoned");
                            log.close_open(clock.now_ms());
                            return SequenceOutcome::Canceled;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log.close_open(clock.now_ms());
                        return SequenceOutcome::Canceled;
                    }
                }
                offset += Duration::from_millis(phase.duration_ms);
            }
            // Hold the final phase for its full duration before completing.
            tokio::select! {
                _ = time::sleep_until(start + offset) => {
                    log.close_open(clock.now_ms());
                    SequenceOutcome::Completed
                }
                _ = shutdown_rx.changed() => {
                    log.close_open(clock.now_ms());
                    SequenceOutcome::Canceled
                }
            }
        });

        Ok(PhaseSequenceScheduler {
            shutdown,
            task: Some(task),
            outcome: None,
            timings,
        })
    }

    /// Block until the run ends and report how. Repeated calls return the
    /// same outcome; callers may also race this in a `select` and come back,
    /// the run is not lost to an abandoned poll.
    pub async fn wait(&mut self) -> SequenceOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = match self.task.as_mut() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) => SequenceOutcome::Failed {
                    reason: format!("scheduling task died: {e}"),
                },
            },
            None => SequenceOutcome::Canceled,
        };
        self.task = None;
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Cancel the run and wait for the task to wind down. Idempotent; a run
    /// that already completed keeps its original outcome.
    pub async fn cancel(&mut self) -> SequenceOutcome {
        let _ = self.shutdown.send(true);
        self.wait().await
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn timings(&self) -> Vec<PhaseTiming> {
        self.timings.snapshot()
    }

    pub fn last_timing(&self) -> Option<PhaseTiming> {
        self.timings.last()
    }
}
