use crate::position::Position;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid signal settings for position '{position}': {reason}")]
    InvalidSignal { position: Position, reason: String },

    #[error("invalid phase sequence: {0}")]
    InvalidSequence(String),

    #[error("unknown position '{0}': expected 'first' or 'second'")]
    InvalidPosition(String),

    #[error("unknown time unit '{0}'")]
    InvalidTimeUnit(String),

    #[error("transit time {requested} ms out of range: device accepts {min}..={max} ms")]
    TransitTimeOutOfRange { requested: u32, min: u32, max: u32 },

    #[error("device not registered: {0}")]
    DeviceNotRegistered(String),

    #[error("device is not live")]
    DeviceNotLive,

    #[error("device error: {0}")]
    Device(String),

    #[error("signal line error: {0}")]
    Signal(String),

    #[error("a scheduler is already active for this coordinator")]
    SchedulerActive,

    #[error("coordinator is shut down")]
    CoordinatorClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ActuationError>;
