use crate::config::{FlipperConfig, SignalSettings};
use crate::error::Result;
use crate::position::Position;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// SignalAcceptor
// ---------------------------------------------------------------------------

/// Receiver of pulse commands for one position. `trigger` starts the pulse,
/// `end` finishes it; the coordinator decides when each happens.
pub trait SignalAcceptor: Send + Sync {
    fn trigger(&self) -> Result<()>;
    fn end(&self) -> Result<()>;
    /// Whether entering this position should fire the line at all.
    fn should_fire(&self) -> bool;
    /// Delay between the toggle and the pulse start, milliseconds.
    fn lag_ms(&self) -> f64;
    /// How long the pulse is held, milliseconds.
    fn duration_ms(&self) -> f64;
}

/// Low-level output line behind a `SettingsAcceptor`: raise it to a voltage,
/// clear it back to rest.
pub trait PulseSink: Send + Sync {
    fn raise(&self, voltage: f64) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SettingsAcceptor
// ---------------------------------------------------------------------------

/// Stock `SignalAcceptor` driven by per-position `SignalSettings`. Settings
/// are validated at construction; schedule time trusts them.
pub struct SettingsAcceptor {
    position: Position,
    settings: SignalSettings,
    sink: Arc<dyn PulseSink>,
}

impl SettingsAcceptor {
    pub fn new(
        position: Position,
        settings: SignalSettings,
        sink: Arc<dyn PulseSink>,
    ) -> Result<SettingsAcceptor> {
        settings.validate(position)?;
        Ok(SettingsAcceptor {
            position,
            settings,
            sink,
        })
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

impl fmt::Debug for SettingsAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsAcceptor")
            .field("position", &self.position)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SignalAcceptor for SettingsAcceptor {
    fn trigger(&self) -> Result<()> {
        self.sink.raise(self.settings.voltage)
    }

    fn end(&self) -> Result<()> {
        self.sink.clear()
    }

    fn should_fire(&self) -> bool {
        self.settings.send_signal
    }

    fn lag_ms(&self) -> f64 {
        self.settings.lag_ms()
    }

    fn duration_ms(&self) -> f64 {
        self.settings.duration_ms()
    }
}

// ---------------------------------------------------------------------------
// LoggingSink
// ---------------------------------------------------------------------------

/// `PulseSink` for dry runs: writes pulses to the log instead of driving a
/// physical line.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl PulseSink for LoggingSink {
    fn raise(&self, voltage: f64) -> Result<()> {
        info!(voltage, "signal line raised");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        info!("signal line cleared");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SignalCoordinator
// ---------------------------------------------------------------------------

/// Maps positions to their signal acceptors and turns toggles into delayed
/// pulses. Each toggle spawns one detached task that sleeps out the lag,
/// triggers, sleeps out the pulse duration, then ends. The task is not tied
/// to the scheduler that caused the toggle; a pulse in flight outlives a
/// stop or cancel.
#[derive(Default)]
pub struct SignalCoordinator {
    acceptors: HashMap<Position, Arc<dyn SignalAcceptor>>,
}

impl SignalCoordinator {
    pub fn new() -> SignalCoordinator {
        SignalCoordinator::default()
    }

    /// Build acceptors for both known positions from a settings document,
    /// all driving the same output line.
    pub fn from_config(config: &FlipperConfig, sink: Arc<dyn PulseSink>) -> Result<SignalCoordinator> {
        let mut coordinator = SignalCoordinator::new();
        for &position in Position::known() {
            if let Some(settings) = config.signal_for(position) {
                let acceptor = SettingsAcceptor::new(position, *settings, Arc::clone(&sink))?;
                coordinator.attach(position, Arc::new(acceptor));
            }
        }
        Ok(coordinator)
    }

    pub fn attach(&mut self, position: Position, acceptor: Arc<dyn SignalAcceptor>) {
        if !position.is_known() {
            warn!("ignoring signal acceptor attached to the unknown position");
            return;
        }
        self.acceptors.insert(position, acceptor);
    }

    pub fn acceptor_for(&self, position: Position) -> Option<&Arc<dyn SignalAcceptor>> {
        self.acceptors.get(&position)
    }

    /// Called with the position just entered. Must run inside a tokio
    /// runtime; the pulse task it spawns is fire-and-forget. Failures in
    /// `trigger` are logged and do not stop the `end` from running, so the
    /// line always comes back to rest.
    pub fn on_toggle(&self, entered: Position) {
        let Some(acceptor) = self.acceptors.get(&entered) else {
            return;
        };
        if !acceptor.should_fire() {
            debug!(position = %entered, "signal disabled for position");
            return;
        }
        let lag = Duration::from_secs_f64(acceptor.lag_ms().max(0.0) / 1_000.0);
        let hold = Duration::from_secs_f64(acceptor.duration_ms().max(0.0) / 1_000.0);
        debug!(position = %entered, lag_ms = acceptor.lag_ms(), duration_ms = acceptor.duration_ms(), "pulse scheduled");

        let acceptor = Arc::clone(acceptor);
        tokio::spawn(async move {
            tokio::time::sleep(lag).await;
            if let Err(e) = acceptor.trigger() {
                warn!(position = %entered, error = %e, "signal trigger failed");
            }
            tokio::time::sleep(hold).await;
            if let Err(e) = acceptor.end() {
                warn!(position = %entered, error = %e, "signal end failed");
            }
        });
    }
}
