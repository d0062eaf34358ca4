use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use flipsched_core::{io, FlipperConfig};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a starter settings file if none exists
    Init,

    /// Print the resolved settings
    Show,

    /// Check the settings file for mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init => init(path),
        ConfigSubcommand::Show => show(path, json),
        ConfigSubcommand::Validate => validate(path),
    }
}

fn init(path: &Path) -> anyhow::Result<()> {
    let starter = serde_yaml::to_string(&FlipperConfig::default())?;
    let written = io::write_if_missing(path, starter.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    if written {
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists, leaving it alone", path.display());
    }
    Ok(())
}

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = FlipperConfig::load(path).with_context(|| {
        format!(
            "failed to load {} (run `flipsched config init` first)",
            path.display()
        )
    })?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = FlipperConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.validate().context("settings rejected")?;
    println!("settings are valid");
    Ok(())
}
