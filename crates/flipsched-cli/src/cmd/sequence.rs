use super::{build_rig, load_or_default, next_event};
use crate::output::{fmt_signed_ms, print_json, print_table};
use anyhow::Context;
use flipsched_core::{
    CoordinatorEvent, FlipperConfig, PhaseTiming, Position, SequenceOutcome, SequencePhase,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, spec: &str, json: bool) -> anyhow::Result<()> {
    let config = load_or_default(config_path)?;
    let phases = parse_phases(spec)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(session(config, phases, json))
}

/// Parse "first:800,second:400" into an ordered phase list.
fn parse_phases(spec: &str) -> anyhow::Result<Vec<SequencePhase>> {
    let mut phases = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (position, duration) = part
            .split_once(':')
            .with_context(|| format!("phase '{part}' is not position:duration_ms"))?;
        let position: Position = position
            .trim()
            .parse()
            .with_context(|| format!("phase '{part}' names no known position"))?;
        let duration_ms: u64 = duration
            .trim()
            .parse()
            .with_context(|| format!("phase '{part}' has a bad duration"))?;
        phases.push(SequencePhase::new(position, duration_ms));
    }
    if phases.is_empty() {
        anyhow::bail!("no phases in '{spec}'");
    }
    Ok(phases)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SequenceReport {
    #[serde(flatten)]
    outcome: SequenceOutcome,
    timings: Vec<PhaseTiming>,
}

async fn session(
    config: FlipperConfig,
    phases: Vec<SequencePhase>,
    json: bool,
) -> anyhow::Result<()> {
    let total_ms: u64 = phases.iter().map(|p| p.duration_ms).sum();
    let event_timeout = Duration::from_millis((total_ms * 2).max(10_000));

    let rig = build_rig(&config)?;
    let mut events = rig.handle.subscribe();
    rig.handle.run_sequence(phases).await?;

    let outcome = loop {
        match next_event(&mut events, event_timeout).await? {
            CoordinatorEvent::SequencePhaseFired { stamp, position } => {
                info!(phase = stamp.phase_index, position = %position, "phase");
            }
            CoordinatorEvent::SequenceFinished { outcome } => break outcome,
            _ => {}
        }
    };

    let timings = rig.handle.timings().await?;
    rig.handle.shutdown().await?;
    rig.registry.shutdown_all();

    if json {
        print_json(&SequenceReport {
            outcome: outcome.clone(),
            timings,
        })?;
    } else {
        let rows = timings
            .iter()
            .map(|timing| {
                vec![
                    timing.phase_index.to_string(),
                    timing.position.to_string(),
                    timing.intended_ms.to_string(),
                    timing
                        .real_ms()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".into()),
                    timing
                        .mismatch_ms()
                        .map(fmt_signed_ms)
                        .unwrap_or_else(|| "-".into()),
                ]
            })
            .collect();
        print_table(
            &["phase", "position", "intended ms", "real ms", "mismatch ms"],
            rows,
        );
        println!();
        match &outcome {
            SequenceOutcome::Completed => println!("sequence completed"),
            SequenceOutcome::Canceled => println!("sequence canceled"),
            SequenceOutcome::Failed { reason } => println!("sequence failed: {reason}"),
        }
    }

    if let SequenceOutcome::Failed { reason } = outcome {
        anyhow::bail!("sequence failed: {reason}");
    }
    Ok(())
}
