//! `flipsched-core` — phase-timed actuation engine for two-position flipper
//! devices.
//!
//! A recording run toggles one flipper at a fixed rate; each toggle can fire
//! a delayed voltage pulse on a signal line, and every phase's intended
//! versus real duration is recorded so a paused run resumes on the same
//! phase grid.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorHandle          ← lifecycle hooks, setters, snapshot queries
//!     │  (mpsc commands)
//!     ▼
//! ActuationCoordinator       ← single task owning position, remainder,
//!     │                        and the active scheduler
//!     ├─ FixedRateScheduler  ← tick task: flip / record / notify
//!     ├─ PhaseSequenceScheduler ← one-shot ordered phase list
//!     └─ SignalCoordinator   ← detached delayed pulse tasks
//!                 │
//!                 ▼
//!     PositionActuator / PulseSink   ← hardware seams
//! ```
//!
//! Observers subscribe to a broadcast of [`coordinator::CoordinatorEvent`]s,
//! published only after the state they describe has been applied.

pub mod actuator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod io;
pub mod position;
pub mod registry;
pub mod sched;
pub mod signal;
pub mod timing;

pub use actuator::{PositionActuator, StubActuator};
pub use config::{FlipperConfig, IntervalConfig, SignalSettings};
pub use coordinator::{
    ActuationCoordinator, CoordinatorEvent, CoordinatorHandle, CoordinatorSnapshot,
};
pub use error::{ActuationError, Result};
pub use position::Position;
pub use registry::ActuatorRegistry;
pub use sched::{SchedulerState, SequenceOutcome, SequencePhase};
pub use signal::{LoggingSink, PulseSink, SettingsAcceptor, SignalAcceptor, SignalCoordinator};
pub use timing::{PhaseRemainder, PhaseStamp, PhaseTiming, TimeUnit};
