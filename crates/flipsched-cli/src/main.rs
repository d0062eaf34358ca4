mod cmd;
mod output;
mod paths;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flipsched",
    about = "Phase scheduling for a two-position flipper rig",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the flipper settings file (defaults to the nearest flipper.yaml)
    #[arg(long, global = true, env = "FLIPSCHED_CONFIG")]
    config: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a simulated recording run and report its phase timings
    Run {
        /// How many flips to record before the run ends
        #[arg(long, default_value_t = 4)]
        phases: u32,

        /// Flip interval, overriding the settings file
        #[arg(long)]
        interval: Option<f64>,

        /// Unit for --interval: ms, s, min or h
        #[arg(long, default_value = "s")]
        unit: String,

        /// Pause the run after this many flips, then resume
        #[arg(long)]
        pause_after: Option<u32>,

        /// How long the pause lasts, in milliseconds
        #[arg(long, default_value_t = 500)]
        pause_ms: u64,
    },

    /// Play an ordered phase list once and report its timings
    Sequence {
        /// Comma-separated position:duration_ms pairs, e.g. "first:800,second:400"
        phases: String,
    },

    /// Inspect and manage the settings file
    Config {
        #[command(subcommand)]
        subcommand: cmd::config::ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    // Sessions narrate themselves; settings commands stay quiet.
    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Sequence { .. } => tracing::Level::INFO,
        Commands::Config { .. } => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let config_path = paths::resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Run {
            phases,
            interval,
            unit,
            pause_after,
            pause_ms,
        } => cmd::run::run(
            &config_path,
            phases,
            interval,
            &unit,
            pause_after,
            pause_ms,
            cli.json,
        ),
        Commands::Sequence { phases } => cmd::sequence::run(&config_path, &phases, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
