use crate::actuator::PositionActuator;
use crate::config::{FlipperConfig, IntervalConfig};
use crate::error::{ActuationError, Result};
use crate::position::Position;
use crate::sched::{
    FixedRateScheduler, PhaseSequenceScheduler, PhaseUpdate, RunClock, SequenceOutcome,
    SequencePhase,
};
use crate::signal::SignalCoordinator;
use crate::timing::{PhaseRemainder, PhaseStamp, PhaseTiming};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CoordinatorEvent
// ---------------------------------------------------------------------------

/// Notification published after the coordinator has applied a state change.
/// Subscribers therefore see events in exactly the order the mutations
/// happened, and a snapshot taken after an event reflects it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    RunStarted { run_id: Uuid, initial_delay_ms: u64 },
    RunResumed { run_id: Uuid, initial_delay_ms: u64 },
    PhaseStarted { stamp: PhaseStamp, position: Position },
    SequencePhaseFired { stamp: PhaseStamp, position: Position },
    SequenceFinished { outcome: SequenceOutcome },
    RunStopped { remainder: Option<PhaseRemainder> },
    RunCanceled,
    RunFinished { ok: bool },
}

// ---------------------------------------------------------------------------
// CoordinatorSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the coordinator, assembled inside its own task so
/// every field is mutually consistent.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub position: Position,
    pub scheduler_active: bool,
    pub run_id: Option<Uuid>,
    pub interval_ms: f64,
    pub transit_time_ms: u32,
    pub last_stamp: Option<PhaseStamp>,
    pub last_mismatch_ms: Option<i64>,
    pub pending_remainder: Option<PhaseRemainder>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    RunStarted {
        reply: oneshot::Sender<Result<()>>,
    },
    RunStopped {
        reply: oneshot::Sender<Result<()>>,
    },
    RunResumed {
        reply: oneshot::Sender<Result<()>>,
    },
    RunCanceled {
        reply: oneshot::Sender<Result<()>>,
    },
    RunFinished {
        error: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    RunSequence {
        phases: Vec<SequencePhase>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetInterval {
        interval: IntervalConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    SetTransitTime {
        ms: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
    Timings {
        reply: oneshot::Sender<Vec<PhaseTiming>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum ActiveScheduler {
    Fixed(FixedRateScheduler),
    Sequence(PhaseSequenceScheduler),
}

#[derive(Clone, Copy)]
enum Termination {
    Stop,
    Cancel,
}

enum Input {
    Command(Option<Command>),
    Update(PhaseUpdate),
    SequenceDone(SequenceOutcome),
}

// ---------------------------------------------------------------------------
// ActuationCoordinator
// ---------------------------------------------------------------------------

/// Single owner of all actuation state: current position, the active
/// scheduler, the pending remainder, and the last phase records. Runs as
/// one task; every mutation arrives as a message and is applied in arrival
/// order, so no lock is ever held across a device call and position updates
/// from the scheduler cannot race lifecycle hooks.
pub struct ActuationCoordinator {
    actuator: Arc<dyn PositionActuator>,
    signals: Arc<SignalCoordinator>,
    /// One timeline for every run this coordinator starts, so stamps from a
    /// stopped and resumed run stay comparable.
    clock: RunClock,
    position: Position,
    interval: IntervalConfig,
    flip_during_recording: bool,
    active: Option<ActiveScheduler>,
    run_id: Option<Uuid>,
    last_stamp: Option<PhaseStamp>,
    last_closed: Option<PhaseTiming>,
    remainder: Option<PhaseRemainder>,
    last_run_timings: Vec<PhaseTiming>,
    events: broadcast::Sender<CoordinatorEvent>,
    updates_tx: mpsc::Sender<PhaseUpdate>,
}

impl ActuationCoordinator {
    /// Validate the settings, program the device transit time, and launch
    /// the coordinator task. Transit time problems surface here, before any
    /// run starts.
    pub fn spawn(
        config: &FlipperConfig,
        actuator: Arc<dyn PositionActuator>,
        signals: SignalCoordinator,
    ) -> Result<CoordinatorHandle> {
        config.validate()?;
        actuator.set_transit_time_ms(config.transit_time_ms)?;
        let position = actuator.current_position();

        let (events, _) = broadcast::channel(1024);
        let (updates_tx, updates_rx) = mpsc::channel(64);
        let (commands_tx, commands_rx) = mpsc::channel(32);

        let coordinator = ActuationCoordinator {
            actuator,
            signals: Arc::new(signals),
            clock: RunClock::new(),
            position,
            interval: config.interval,
            flip_during_recording: config.flip_during_recording,
            active: None,
            run_id: None,
            last_stamp: None,
            last_closed: None,
            remainder: None,
            last_run_timings: Vec::new(),
            events: events.clone(),
            updates_tx,
        };
        tokio::spawn(coordinator.run(commands_rx, updates_rx));

        Ok(CoordinatorHandle {
            commands: commands_tx,
            events,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut updates: mpsc::Receiver<PhaseUpdate>,
    ) {
        info!(position = %self.position, "actuation coordinator started");
        loop {
            let sequence_active = matches!(self.active, Some(ActiveScheduler::Sequence(_)));
            let input = tokio::select! {
                cmd = commands.recv() => Input::Command(cmd),
                Some(update) = updates.recv() => Input::Update(update),
                outcome = Self::wait_sequence(&mut self.active), if sequence_active => {
                    Input::SequenceDone(outcome)
                }
            };
            match input {
                Input::Command(None) => {
                    // Every handle dropped; wind down cleanly.
                    self.terminate_active(Termination::Cancel, &mut updates).await;
                    break;
                }
                Input::Command(Some(Command::Shutdown { reply })) => {
                    self.terminate_active(Termination::Cancel, &mut updates).await;
                    let _ = reply.send(());
                    break;
                }
                Input::Command(Some(command)) => self.handle_command(command, &mut updates).await,
                Input::Update(update) => self.apply_update(update, sequence_active),
                Input::SequenceDone(outcome) => {
                    self.finish_sequence(outcome, &mut updates).await;
                }
            }
        }
        info!("actuation coordinator stopped");
    }

    async fn wait_sequence(active: &mut Option<ActiveScheduler>) -> SequenceOutcome {
        match active {
            Some(ActiveScheduler::Sequence(scheduler)) => scheduler.wait().await,
            // Unreachable under the select guard; never resolves.
            _ => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, command: Command, updates: &mut mpsc::Receiver<PhaseUpdate>) {
        match command {
            Command::RunStarted { reply } => {
                let _ = reply.send(self.start_run(false, updates).await);
            }
            Command::RunResumed { reply } => {
                let _ = reply.send(self.start_run(true, updates).await);
            }
            Command::RunStopped { reply } => {
                let _ = reply.send(self.stop_run(updates).await);
            }
            Command::RunCanceled { reply } => {
                let _ = reply.send(self.cancel_run(updates).await);
            }
            Command::RunFinished { error, reply } => {
                let _ = reply.send(self.finish_run(error, updates).await);
            }
            Command::RunSequence { phases, reply } => {
                let _ = reply.send(self.start_sequence(phases));
            }
            Command::SetInterval { interval, reply } => {
                let _ = reply.send(self.set_interval(interval));
            }
            Command::SetTransitTime { ms, reply } => {
                let _ = reply.send(self.set_transit_time(ms));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Timings { reply } => {
                let _ = reply.send(self.current_timings());
            }
            Command::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }

    // --- lifecycle ---------------------------------------------------------

    async fn start_run(
        &mut self,
        resumed: bool,
        updates: &mut mpsc::Receiver<PhaseUpdate>,
    ) -> Result<()> {
        if !self.flip_during_recording {
            debug!("flip-during-recording disabled, run hook ignored");
            return Ok(());
        }
        if self.active.is_some() {
            warn!("scheduler still active at run start, terminating it first");
            self.terminate_active(Termination::Cancel, updates).await;
        }
        if !self.position.is_known() {
            warn!("starting a run from an unknown position, toggles will be skipped");
        }

        let period_ms = self.interval.millis().round() as u64;
        let initial_delay_ms = if resumed {
            match self.remainder.take() {
                Some(remainder) => remainder.remaining_ms().round() as u64,
                None => period_ms,
            }
        } else {
            // A fresh run never inherits a stale remainder.
            self.remainder = None;
            period_ms
        };

        let mut scheduler = FixedRateScheduler::new(
            Arc::clone(&self.actuator),
            Arc::clone(&self.signals),
            self.clock,
            period_ms,
            self.updates_tx.clone(),
        );
        scheduler.start(self.position, initial_delay_ms);
        self.active = Some(ActiveScheduler::Fixed(scheduler));

        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        info!(run_id = %run_id, period_ms, initial_delay_ms, resumed, "recording run started");
        self.emit(if resumed {
            CoordinatorEvent::RunResumed {
                run_id,
                initial_delay_ms,
            }
        } else {
            CoordinatorEvent::RunStarted {
                run_id,
                initial_delay_ms,
            }
        });
        Ok(())
    }

    async fn stop_run(&mut self, updates: &mut mpsc::Receiver<PhaseUpdate>) -> Result<()> {
        match self.terminate_active(Termination::Stop, updates).await {
            Some(timings) => {
                self.remainder = timings.last().and_then(|timing| timing.remainder());
                info!(remainder = ?self.remainder, "recording run stopped");
            }
            None => {
                // A stop with nothing running invalidates whatever was left
                // over; the next start is a fresh one.
                self.remainder = None;
                debug!("run stopped with no active scheduler");
            }
        }
        self.emit(CoordinatorEvent::RunStopped {
            remainder: self.remainder,
        });
        Ok(())
    }

    async fn cancel_run(&mut self, updates: &mut mpsc::Receiver<PhaseUpdate>) -> Result<()> {
        let was_active = self
            .terminate_active(Termination::Cancel, updates)
            .await
            .is_some();
        // A canceled run is complete, not paused; nothing to resume into.
        self.remainder = None;
        info!(was_active, "recording run canceled");
        self.emit(CoordinatorEvent::RunCanceled);
        Ok(())
    }

    async fn finish_run(
        &mut self,
        error: Option<String>,
        updates: &mut mpsc::Receiver<PhaseUpdate>,
    ) -> Result<()> {
        self.terminate_active(Termination::Cancel, updates).await;
        self.remainder = None;
        match &error {
            Some(e) => warn!(error = %e, "recording run finished with error"),
            None => info!("recording run finished"),
        }
        self.emit(CoordinatorEvent::RunFinished {
            ok: error.is_none(),
        });
        Ok(())
    }

    fn start_sequence(&mut self, phases: Vec<SequencePhase>) -> Result<()> {
        if self.active.is_some() {
            return Err(ActuationError::SchedulerActive);
        }
        let scheduler = PhaseSequenceScheduler::start(
            Arc::clone(&self.actuator),
            Arc::clone(&self.signals),
            self.clock,
            phases,
            self.updates_tx.clone(),
        )?;
        self.active = Some(ActiveScheduler::Sequence(scheduler));
        Ok(())
    }

    async fn finish_sequence(
        &mut self,
        outcome: SequenceOutcome,
        updates: &mut mpsc::Receiver<PhaseUpdate>,
    ) {
        // Label drained updates while the sequence still counts as active.
        self.drain_updates(updates, true);
        if let Some(ActiveScheduler::Sequence(scheduler)) = self.active.take() {
            self.position = self.actuator.current_position();
            self.last_run_timings = scheduler.timings();
            if let Some(last) = self.last_run_timings.last() {
                self.last_closed = Some(last.clone());
            }
        }
        info!(outcome = ?outcome, "phase sequence finished");
        self.emit(CoordinatorEvent::SequenceFinished { outcome });
    }

    // --- settings ----------------------------------------------------------

    fn set_interval(&mut self, interval: IntervalConfig) -> Result<()> {
        interval.validate()?;
        self.interval = interval;
        debug!(interval_ms = interval.millis(), "interval updated, applies to the next run");
        Ok(())
    }

    fn set_transit_time(&mut self, ms: u32) -> Result<()> {
        self.actuator.set_transit_time_ms(ms)?;
        info!(transit_ms = ms, "transit time programmed");
        Ok(())
    }

    // --- shared plumbing ---------------------------------------------------

    /// Terminate whatever scheduler is active and absorb its tail: buffered
    /// updates are applied, the position is re-read from the device, and the
    /// run's timings are kept for later queries. Returns those timings, or
    /// `None` if nothing was active.
    async fn terminate_active(
        &mut self,
        termination: Termination,
        updates: &mut mpsc::Receiver<PhaseUpdate>,
    ) -> Option<Vec<PhaseTiming>> {
        let timings = match self.active.take()? {
            ActiveScheduler::Fixed(mut scheduler) => {
                let timings = match termination {
                    Termination::Stop => scheduler.stop().await,
                    Termination::Cancel => scheduler.cancel().await,
                };
                self.drain_updates(updates, false);
                timings
            }
            ActiveScheduler::Sequence(mut scheduler) => {
                let outcome = scheduler.cancel().await;
                self.drain_updates(updates, true);
                let timings = scheduler.timings();
                self.emit(CoordinatorEvent::SequenceFinished { outcome });
                timings
            }
        };
        self.position = self.actuator.current_position();
        if let Some(last) = timings.last() {
            self.last_closed = Some(last.clone());
        }
        self.last_run_timings = timings.clone();
        Some(timings)
    }

    fn drain_updates(&mut self, updates: &mut mpsc::Receiver<PhaseUpdate>, sequence: bool) {
        while let Ok(update) = updates.try_recv() {
            self.apply_update(update, sequence);
        }
    }

    fn apply_update(&mut self, update: PhaseUpdate, sequence: bool) {
        self.position = update.position;
        self.last_stamp = Some(update.stamp);
        if let Some(closed) = update.closed {
            if let Some(mismatch) = closed.mismatch_ms() {
                debug!(phase = closed.phase_index, mismatch_ms = mismatch, "phase closed");
            }
            self.last_closed = Some(closed);
        }
        self.emit(if sequence {
            CoordinatorEvent::SequencePhaseFired {
                stamp: update.stamp,
                position: update.position,
            }
        } else {
            CoordinatorEvent::PhaseStarted {
                stamp: update.stamp,
                position: update.position,
            }
        });
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            position: self.position,
            scheduler_active: self.active.is_some(),
            run_id: self.run_id,
            interval_ms: self.interval.millis(),
            transit_time_ms: self.actuator.transit_time_ms(),
            last_stamp: self.last_stamp,
            last_mismatch_ms: self.last_closed.as_ref().and_then(|t| t.mismatch_ms()),
            pending_remainder: self.remainder,
        }
    }

    fn current_timings(&self) -> Vec<PhaseTiming> {
        match &self.active {
            Some(ActiveScheduler::Fixed(scheduler)) => scheduler.timings(),
            Some(ActiveScheduler::Sequence(scheduler)) => scheduler.timings(),
            None => self.last_run_timings.clone(),
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        // Fire-and-forget: no subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// CoordinatorHandle
// ---------------------------------------------------------------------------

/// Cloneable handle to a running coordinator. Every method posts a message
/// and waits for the coordinator task to apply it; `CoordinatorClosed`
/// means the task is gone.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| ActuationError::CoordinatorClosed)?;
        reply_rx.await.map_err(|_| ActuationError::CoordinatorClosed)
    }

    /// A recording run began. Starts a fresh fixed-rate scheduler when
    /// flip-during-recording is enabled; any stale remainder is discarded.
    pub async fn on_run_started(&self) -> Result<()> {
        self.request(|reply| Command::RunStarted { reply }).await?
    }

    /// The run was paused. The scheduler is terminated and the unserved
    /// part of the interrupted phase is kept for `on_run_resumed`.
    pub async fn on_run_stopped(&self) -> Result<()> {
        self.request(|reply| Command::RunStopped { reply }).await?
    }

    /// The run resumed. The pending remainder, if any, is consumed as the
    /// initial delay so the phase grid carries across the pause.
    pub async fn on_run_resumed(&self) -> Result<()> {
        self.request(|reply| Command::RunResumed { reply }).await?
    }

    /// The run was abandoned. No remainder survives a cancel.
    pub async fn on_run_canceled(&self) -> Result<()> {
        self.request(|reply| Command::RunCanceled { reply }).await?
    }

    /// The session ended, successfully or with a device error.
    pub async fn on_run_finished(&self, error: Option<String>) -> Result<()> {
        self.request(|reply| Command::RunFinished { error, reply })
            .await?
    }

    /// Execute a finite ordered phase list once. Rejected while any
    /// scheduler is active; completion is announced as `SequenceFinished`.
    pub async fn run_sequence(&self, phases: Vec<SequencePhase>) -> Result<()> {
        self.request(|reply| Command::RunSequence { phases, reply })
            .await?
    }

    /// Store a new flip interval. Takes effect from the next started or
    /// resumed run; an in-flight scheduler keeps its rate.
    pub async fn set_interval(&self, interval: IntervalConfig) -> Result<()> {
        self.request(|reply| Command::SetInterval { interval, reply })
            .await?
    }

    /// Program the device transit time. Applied immediately and rejected
    /// synchronously when the device refuses the value.
    pub async fn set_transit_time(&self, ms: u32) -> Result<()> {
        self.request(|reply| Command::SetTransitTime { ms, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Ordered timing records of the active run, or of the last one once
    /// nothing is running.
    pub async fn timings(&self) -> Result<Vec<PhaseTiming>> {
        self.request(|reply| Command::Timings { reply }).await
    }

    /// Subscribe to coordinator events. Subscribe before issuing commands
    /// to observe a run from its start.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Terminate any active scheduler and end the coordinator task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::StubActuator;
    use crate::timing::TimeUnit;
    use std::time::Duration;
    use tokio::time::{self, Instant};

    fn test_config(interval_ms: f64) -> FlipperConfig {
        let mut config = FlipperConfig::default();
        config.interval = IntervalConfig {
            value: interval_ms,
            unit: TimeUnit::Milliseconds,
        };
        config
    }

    fn spawn_with_stub(
        config: &FlipperConfig,
        start: Position,
    ) -> (CoordinatorHandle, Arc<StubActuator>) {
        let stub = Arc::new(StubActuator::new(start));
        let handle = ActuationCoordinator::spawn(
            config,
            stub.clone() as Arc<dyn PositionActuator>,
            SignalCoordinator::new(),
        )
        .unwrap();
        (handle, stub)
    }

    async fn next_event(events: &mut broadcast::Receiver<CoordinatorEvent>) -> CoordinatorEvent {
        time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for coordinator event")
            .expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_resume_preserve_the_phase_grid() {
        let config = test_config(2_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();
        let t0 = Instant::now();

        handle.on_run_started().await.unwrap();
        match next_event(&mut events).await {
            CoordinatorEvent::RunStarted {
                initial_delay_ms, ..
            } => assert_eq!(initial_delay_ms, 2_000),
            other => panic!("expected RunStarted, got {other:?}"),
        }

        let first_toggle = match next_event(&mut events).await {
            CoordinatorEvent::PhaseStarted { stamp, position } => {
                assert_eq!(position, Position::Second);
                assert_eq!(stamp.phase_index, 1);
                assert_eq!(t0.elapsed(), Duration::from_millis(2_000));
                stamp
            }
            other => panic!("expected PhaseStarted, got {other:?}"),
        };

        // Pause the run one second into the second phase.
        time::sleep(Duration::from_millis(1_000)).await;
        handle.on_run_stopped().await.unwrap();
        match next_event(&mut events).await {
            CoordinatorEvent::RunStopped { remainder } => {
                let remainder = remainder.unwrap();
                assert_eq!(remainder.remaining_ms(), 1_000.0);
                assert_eq!(remainder.position, Position::Second);
            }
            other => panic!("expected RunStopped, got {other:?}"),
        }

        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.scheduler_active);
        assert_eq!(snap.position, Position::Second);
        assert_eq!(snap.last_mismatch_ms, Some(-1_000));
        assert!(snap.pending_remainder.is_some());

        handle.on_run_resumed().await.unwrap();
        match next_event(&mut events).await {
            CoordinatorEvent::RunResumed {
                initial_delay_ms, ..
            } => assert_eq!(initial_delay_ms, 1_000, "remainder consumed as delay"),
            other => panic!("expected RunResumed, got {other:?}"),
        }
        match next_event(&mut events).await {
            CoordinatorEvent::PhaseStarted { stamp, position } => {
                assert_eq!(position, Position::First);
                assert_eq!(
                    stamp.onset_ms - first_toggle.onset_ms,
                    2_000,
                    "phase grid preserved across the pause"
                );
            }
            other => panic!("expected PhaseStarted, got {other:?}"),
        }

        let snap = handle.snapshot().await.unwrap();
        assert!(snap.pending_remainder.is_none());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn positions_alternate_on_the_fixed_grid() {
        let config = test_config(1_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        handle.on_run_started().await.unwrap();
        let _ = next_event(&mut events).await; // RunStarted

        let mut onsets = Vec::new();
        let expected = [
            Position::Second,
            Position::First,
            Position::Second,
            Position::First,
        ];
        for expected_position in expected {
            match next_event(&mut events).await {
                CoordinatorEvent::PhaseStarted { stamp, position } => {
                    assert_eq!(position, expected_position);
                    onsets.push(stamp.onset_ms);
                }
                other => panic!("expected PhaseStarted, got {other:?}"),
            }
        }
        for pair in onsets.windows(2) {
            assert_eq!(pair[1] - pair[0], 1_000);
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_leaves_no_remainder() {
        let config = test_config(2_000.0);
        let (handle, stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        handle.on_run_started().await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        handle.on_run_canceled().await.unwrap();

        let _ = next_event(&mut events).await; // RunStarted
        match next_event(&mut events).await {
            CoordinatorEvent::RunCanceled => {}
            other => panic!("expected RunCanceled, got {other:?}"),
        }

        let snap = handle.snapshot().await.unwrap();
        assert!(snap.pending_remainder.is_none());
        assert!(!snap.scheduler_active);
        assert_eq!(stub.flips_applied(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_with_nothing_active_clears_the_stale_remainder() {
        let config = test_config(1_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);

        handle.on_run_started().await.unwrap();
        time::sleep(Duration::from_millis(1_500)).await;
        handle.on_run_stopped().await.unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(
            snap.pending_remainder.unwrap().remaining_ms(),
            500.0,
            "stopped mid-phase"
        );

        handle.on_run_stopped().await.unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert!(
            snap.pending_remainder.is_none(),
            "second stop invalidates the leftover"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_flip_during_recording_ignores_run_hooks() {
        let mut config = test_config(500.0);
        config.flip_during_recording = false;
        let (handle, stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        handle.on_run_started().await.unwrap();
        handle.on_run_resumed().await.unwrap();
        time::sleep(Duration::from_millis(2_000)).await;

        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.scheduler_active);
        assert!(snap.last_stamp.is_none());
        assert_eq!(stub.flips_applied(), 0);
        assert!(events.try_recv().is_err(), "no events for ignored hooks");
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_applies_only_to_the_next_run() {
        let config = test_config(1_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        handle.on_run_started().await.unwrap();
        let _ = next_event(&mut events).await; // RunStarted
        let first = match next_event(&mut events).await {
            CoordinatorEvent::PhaseStarted { stamp, .. } => stamp,
            other => panic!("expected PhaseStarted, got {other:?}"),
        };

        let slower = IntervalConfig {
            value: 3_000.0,
            unit: TimeUnit::Milliseconds,
        };
        handle.set_interval(slower).await.unwrap();

        // In-flight run keeps its rate.
        let second = match next_event(&mut events).await {
            CoordinatorEvent::PhaseStarted { stamp, .. } => stamp,
            other => panic!("expected PhaseStarted, got {other:?}"),
        };
        assert_eq!(second.onset_ms - first.onset_ms, 1_000);

        handle.on_run_stopped().await.unwrap();
        let _ = next_event(&mut events).await; // RunStopped
        handle.on_run_started().await.unwrap();
        match next_event(&mut events).await {
            CoordinatorEvent::RunStarted {
                initial_delay_ms, ..
            } => assert_eq!(initial_delay_ms, 3_000, "new interval from the next run"),
            other => panic!("expected RunStarted, got {other:?}"),
        }

        let invalid = IntervalConfig {
            value: 0.0,
            unit: TimeUnit::Seconds,
        };
        assert!(matches!(
            handle.set_interval(invalid).await,
            Err(ActuationError::InvalidInterval(_))
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transit_time_is_programmed_immediately() {
        let config = test_config(1_000.0);
        let (handle, stub) = spawn_with_stub(&config, Position::First);
        assert_eq!(stub.transit_time_ms(), 700, "programmed at spawn");

        handle.set_transit_time(900).await.unwrap();
        assert_eq!(stub.transit_time_ms(), 900);

        let err = handle.set_transit_time(50).await.unwrap_err();
        assert!(matches!(err, ActuationError::TransitTimeOutOfRange { .. }));
        assert_eq!(stub.transit_time_ms(), 900, "rejected value must not stick");

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.transit_time_ms, 900);
    }

    #[tokio::test]
    async fn spawn_rejects_settings_the_device_refuses() {
        let mut config = test_config(1_000.0);
        config.transit_time_ms = 50;
        let stub = Arc::new(StubActuator::new(Position::First));
        let err = ActuationCoordinator::spawn(
            &config,
            stub as Arc<dyn PositionActuator>,
            SignalCoordinator::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ActuationError::TransitTimeOutOfRange { .. }));

        let mut config = test_config(1_000.0);
        config.interval.value = -1.0;
        let stub = Arc::new(StubActuator::new(Position::First));
        let err = ActuationCoordinator::spawn(
            &config,
            stub as Arc<dyn PositionActuator>,
            SignalCoordinator::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ActuationError::InvalidInterval(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_runs_to_completion_and_reports() {
        let config = test_config(1_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        let phases = vec![
            SequencePhase::new(Position::Second, 500),
            SequencePhase::new(Position::First, 500),
        ];
        handle.run_sequence(phases).await.unwrap();

        match next_event(&mut events).await {
            CoordinatorEvent::SequencePhaseFired { stamp, position } => {
                assert_eq!(stamp.phase_index, 0);
                assert_eq!(position, Position::Second);
            }
            other => panic!("expected SequencePhaseFired, got {other:?}"),
        }
        match next_event(&mut events).await {
            CoordinatorEvent::SequencePhaseFired { stamp, position } => {
                assert_eq!(stamp.phase_index, 1);
                assert_eq!(position, Position::First);
            }
            other => panic!("expected SequencePhaseFired, got {other:?}"),
        }
        match next_event(&mut events).await {
            CoordinatorEvent::SequenceFinished { outcome } => {
                assert_eq!(outcome, SequenceOutcome::Completed)
            }
            other => panic!("expected SequenceFinished, got {other:?}"),
        }

        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.scheduler_active);
        assert_eq!(snap.position, Position::First);

        let timings = handle.timings().await.unwrap();
        assert_eq!(timings.len(), 2);
        assert!(timings.iter().all(|t| !t.is_open()));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_is_rejected_while_a_run_is_active() {
        let config = test_config(10_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);

        handle.on_run_started().await.unwrap();
        let err = handle
            .run_sequence(vec![SequencePhase::new(Position::Second, 100)])
            .await
            .unwrap_err();
        assert!(matches!(err, ActuationError::SchedulerActive));

        handle.on_run_canceled().await.unwrap();
        handle
            .run_sequence(vec![SequencePhase::new(Position::Second, 100)])
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dead_device_misses_toggles_without_killing_the_run() {
        let config = test_config(1_000.0);
        let (handle, stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        handle.on_run_started().await.unwrap();
        let _ = next_event(&mut events).await; // RunStarted
        stub.set_live(false);

        for _ in 0..2 {
            match next_event(&mut events).await {
                CoordinatorEvent::PhaseStarted { position, .. } => {
                    assert_eq!(position, Position::First, "missed toggle holds position")
                }
                other => panic!("expected PhaseStarted, got {other:?}"),
            }
        }

        stub.set_live(true);
        match next_event(&mut events).await {
            CoordinatorEvent::PhaseStarted { position, .. } => {
                assert_eq!(position, Position::Second, "run recovered on the next tick")
            }
            other => panic!("expected PhaseStarted, got {other:?}"),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_while_running_replaces_the_scheduler() {
        let config = test_config(1_000.0);
        let (handle, _stub) = spawn_with_stub(&config, Position::First);
        let mut events = handle.subscribe();

        handle.on_run_started().await.unwrap();
        let first_run = match next_event(&mut events).await {
            CoordinatorEvent::RunStarted { run_id, .. } => run_id,
            other => panic!("expected RunStarted, got {other:?}"),
        };
        let _ = next_event(&mut events).await; // first toggle at t=1000

        handle.on_run_started().await.unwrap();
        let second_run = match next_event(&mut events).await {
            CoordinatorEvent::RunStarted { run_id, .. } => run_id,
            other => panic!("expected RunStarted, got {other:?}"),
        };
        assert_ne!(first_run, second_run);

        match next_event(&mut events).await {
            CoordinatorEvent::PhaseStarted { stamp, position } => {
                assert_eq!(position, Position::First, "fresh grid toggles from Second");
                assert_eq!(stamp.phase_index, 1, "new scheduler counts from its own start");
            }
            other => panic!("expected PhaseStarted, got {other:?}"),
        }
        handle.shutdown().await.unwrap();
    }
}
