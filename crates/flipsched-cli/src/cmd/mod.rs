pub mod config;
pub mod run;
pub mod sequence;

use anyhow::Context;
use flipsched_core::{
    ActuationCoordinator, ActuatorRegistry, CoordinatorEvent, CoordinatorHandle, FlipperConfig,
    LoggingSink, Position, SignalCoordinator, StubActuator,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

/// Load the settings file, or start from defaults when none exists yet.
pub(crate) fn load_or_default(path: &Path) -> anyhow::Result<FlipperConfig> {
    if path.exists() {
        FlipperConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(FlipperConfig::default())
    }
}

/// Simulated rig: a stub flipper behind the registry, pulses wired to the
/// log, and a coordinator driving it all. Must be built inside a tokio
/// runtime.
pub(crate) struct SimRig {
    pub handle: CoordinatorHandle,
    pub stub: Arc<StubActuator>,
    pub registry: ActuatorRegistry,
}

pub(crate) fn build_rig(config: &FlipperConfig) -> anyhow::Result<SimRig> {
    let serial = if config.device_serial.is_empty() {
        "SIM-FLIPPER".to_string()
    } else {
        config.device_serial.clone()
    };
    let registry = ActuatorRegistry::new();
    let stub = Arc::new(StubActuator::new(Position::First));
    registry.register(serial.as_str(), stub.clone());
    let actuator = registry.acquire(&serial)?;

    let signals = SignalCoordinator::from_config(config, Arc::new(LoggingSink))?;
    let handle = ActuationCoordinator::spawn(config, actuator, signals)?;
    Ok(SimRig {
        handle,
        stub,
        registry,
    })
}

/// Next coordinator event, with a hang guard.
pub(crate) async fn next_event(
    events: &mut broadcast::Receiver<CoordinatorEvent>,
    timeout: Duration,
) -> anyhow::Result<CoordinatorEvent> {
    loop {
        match tokio::time::timeout(timeout, events.recv()).await {
            Ok(Ok(event)) => return Ok(event),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!(skipped, "event stream lagged");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                anyhow::bail!("coordinator event stream closed")
            }
            Err(_) => anyhow::bail!("timed out waiting for a scheduler event"),
        }
    }
}
