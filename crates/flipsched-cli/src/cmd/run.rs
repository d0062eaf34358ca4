use super::{build_rig, load_or_default, next_event};
use crate::output::{fmt_signed_ms, print_json, print_table};
use anyhow::Context;
use flipsched_core::{
    CoordinatorEvent, CoordinatorSnapshot, FlipperConfig, IntervalConfig, PhaseTiming, TimeUnit,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    config_path: &Path,
    phases: u32,
    interval: Option<f64>,
    unit: &str,
    pause_after: Option<u32>,
    pause_ms: u64,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = load_or_default(config_path)?;
    if let Some(value) = interval {
        let unit: TimeUnit = unit.parse().context("bad --unit")?;
        config.interval = IntervalConfig::new(value, unit).context("bad --interval")?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(session(config, phases, pause_after, pause_ms, json))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunReport {
    snapshot: CoordinatorSnapshot,
    flips_applied: u32,
    segments: Vec<Vec<PhaseTiming>>,
}

async fn session(
    config: FlipperConfig,
    phases: u32,
    pause_after: Option<u32>,
    pause_ms: u64,
    json: bool,
) -> anyhow::Result<()> {
    // A healthy run fires every interval; anything slower is a hang.
    let event_timeout =
        Duration::from_millis((config.interval.millis() * 4.0).max(10_000.0) as u64);

    let rig = build_rig(&config)?;
    let mut events = rig.handle.subscribe();
    rig.handle.on_run_started().await?;

    let mut segments: Vec<Vec<PhaseTiming>> = Vec::new();
    let mut seen = 0u32;
    let mut paused = false;
    while seen < phases {
        if let CoordinatorEvent::PhaseStarted { stamp, position } =
            next_event(&mut events, event_timeout).await?
        {
            seen += 1;
            info!(phase = stamp.phase_index, position = %position, "flip");
            if !paused && pause_after == Some(seen) && seen < phases {
                rig.handle.on_run_stopped().await?;
                segments.push(rig.handle.timings().await?);
                let snap = rig.handle.snapshot().await?;
                let remainder_ms = snap
                    .pending_remainder
                    .map(|r| r.remaining_ms())
                    .unwrap_or(0.0);
                println!("paused after {seen} flips (remainder {remainder_ms:.0} ms)");
                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
                rig.handle.on_run_resumed().await?;
                paused = true;
            }
        }
    }
    rig.handle.on_run_stopped().await?;
    segments.push(rig.handle.timings().await?);
    rig.handle.on_run_finished(None).await?;

    let snapshot = rig.handle.snapshot().await?;
    let flips_applied = rig.stub.flips_applied();
    rig.handle.shutdown().await?;
    rig.registry.shutdown_all();

    report(snapshot, flips_applied, segments, json)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

fn report(
    snapshot: CoordinatorSnapshot,
    flips_applied: u32,
    segments: Vec<Vec<PhaseTiming>>,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        return print_json(&RunReport {
            snapshot,
            flips_applied,
            segments,
        });
    }

    let mut rows = Vec::new();
    for (run, segment) in segments.iter().enumerate() {
        for timing in segment {
            rows.push(vec![
                (run + 1).to_string(),
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
            ]);
        }
    }
    print_table(
        &["run", "phase", "position", "intended ms", "real ms", "mismatch ms"],
        rows,
    );

    let run_id = snapshot
        .run_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".into());
    println!();
    println!(
        "run {run_id}: {flips_applied} flips applied, device at {}",
        snapshot.position
    );
    Ok(())
}
