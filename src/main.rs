//! Audiorack CLI - Real-time Audio Filter Rack
//!
//! Command-line interface for the audiorack filter rack.

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use audiorack::cli::commands;
use audiorack::cli::{Cli, Commands, PresetCommand};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Audiorack v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Audiorack v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Process {
            input,
            output,
            filters,
            preset,
            store,
            block_ms,
            realtime,
        } => commands::process(
            &input,
            &output,
            &filters,
            preset.as_deref(),
            &store.dir,
            block_ms,
            realtime,
        )
        .with_context(|| format!("failed to process {}", input.display())),
        Commands::Inspect { input } => commands::inspect(&input)
            .with_context(|| format!("failed to inspect {}", input.display())),
        Commands::Preset(preset) => handle_preset(preset),
    }
}

fn handle_preset(cmd: PresetCommand) -> Result<()> {
    let result = match cmd {
        PresetCommand::Save {
            name,
            filters,
            sample_rate,
            block_ms,
            store,
        } => commands::preset_save(&store.dir, name.as_deref(), &filters, sample_rate, block_ms),
        PresetCommand::List { store } => commands::preset_list(&store.dir),
        PresetCommand::Show { name, store } => commands::preset_show(&store.dir, &name),
        PresetCommand::Delete { name, store } => commands::preset_delete(&store.dir, &name),
    };
    result.context("preset command failed")
}
