//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use super::InlineFilter;
use crate::config::{default_name, ConfigStore, FilterSpec, Preset};
use crate::effects::EffectRuntime;
use crate::error::{RackError, Result};
use crate::pipeline::{wav, Pipeline, PipelineConfig, WavHost, WorkerExit};
use crate::rack::{FilterRack, SharedRack};

/// Load a preset by name, or by path to a file inside the store
fn load_named_preset(store: &ConfigStore, name: &str) -> Result<Preset> {
    let resolved = store
        .find_config(Path::new(name))
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| name.to_string());

    store
        .load_preset(&resolved)?
        .ok_or_else(|| RackError::InvalidFilter {
            reason: format!("no preset named '{}' in {}", name, store.dir().display()),
        })
}

/// Run `input` through the rack into `output`.
#[allow(clippy::too_many_arguments)]
pub fn process(
    input: &Path,
    output: &Path,
    filters: &[InlineFilter],
    preset: Option<&str>,
    presets_dir: &Path,
    block_ms: Option<u64>,
    realtime: bool,
) -> Result<()> {
    info!("Processing {} -> {}", input.display(), output.display());

    let mut config = PipelineConfig::default();
    let mut specs: Vec<FilterSpec> = Vec::new();
    if let Some(name) = preset {
        let store = ConfigStore::open(presets_dir)?;
        let preset = load_named_preset(&store, name)?;
        info!("Loaded preset '{}' ({} filters)", preset.name, preset.filters.len());
        if let Some(pipeline) = preset.pipeline {
            config = pipeline;
        }
        specs.extend(preset.filters);
    }
    if let Some(ms) = block_ms {
        config.block_ms = ms;
    }
    config.duplex = true;

    let host = WavHost::new()
        .with_input(input)
        .with_output(output)
        .realtime(realtime);
    let pipeline = Pipeline::new(Arc::new(host), SharedRack::default(), config)?;
    let sample_rate = f64::from(pipeline.format().sample_rate);

    specs.extend(filters.iter().map(|f| f.to_spec(sample_rate)));
    for spec in &specs {
        if let FilterSpec::Designed {
            sample_rate: designed_for,
            ..
        } = spec
        {
            if (designed_for - sample_rate).abs() > f64::EPSILON {
                warn!(
                    "{} is designed for {} Hz but the input runs at {} Hz",
                    spec.label(),
                    designed_for,
                    sample_rate
                );
            }
        }
    }

    let runtime = EffectRuntime::load_native()?;
    pipeline
        .rack()
        .with(|rack| rack.apply_specs(&specs, &runtime))?;

    pipeline.start()?;
    pipeline.wait(None);
    let stats = pipeline.stats();
    let exit = pipeline.last_exit();
    pipeline.stop();

    if let Some(WorkerExit::Failed(reason)) = exit {
        return Err(RackError::processing("pipeline", reason));
    }

    println!(
        "Processed {} blocks ({} bytes) through {} filters",
        stats.blocks,
        stats.bytes,
        specs.len()
    );
    println!("Output written: {}", output.display());
    Ok(())
}

/// Print the line format of a WAV file.
pub fn inspect(input: &Path) -> Result<()> {
    info!("Inspecting {}", input.display());

    let format = wav::format_of(input)?;
    let frames = hound::WavReader::open(input)?.duration();

    println!("File:     {}", input.display());
    println!("Format:   {}", format);
    println!("Frames:   {}", frames);
    println!(
        "Duration: {:.3} s",
        f64::from(frames) / f64::from(format.sample_rate)
    );
    println!(
        "Block:    {} bytes per {} ms",
        format.block_bytes(PipelineConfig::default().block_duration()),
        PipelineConfig::default().block_ms
    );
    Ok(())
}

/// Save inline filters as a preset.
pub fn preset_save(
    presets_dir: &Path,
    name: Option<&str>,
    filters: &[InlineFilter],
    sample_rate: u32,
    block_ms: Option<u64>,
) -> Result<()> {
    let specs: Vec<FilterSpec> = filters
        .iter()
        .map(|f| f.to_spec(f64::from(sample_rate)))
        .collect();

    // reject filters that cannot be built before anything is written
    let runtime = EffectRuntime::load_native()?;
    FilterRack::from_specs(&specs, &runtime)?;

    let store = ConfigStore::open(presets_dir)?;
    let path = match block_ms {
        None => store.add_config(&specs, name)?,
        Some(ms) => {
            let config = PipelineConfig {
                block_ms: ms,
                ..PipelineConfig::default()
            };
            config.validate()?;
            let name = name.map(str::to_string).unwrap_or_else(default_name);
            store.save_preset(&Preset::new(name, specs).with_pipeline(config))?
        }
    };

    println!("Preset saved: {}", path.display());
    Ok(())
}

/// List stored presets.
pub fn preset_list(presets_dir: &Path) -> Result<()> {
    let store = ConfigStore::open(presets_dir)?;
    let names = store.list_configs()?;

    if names.is_empty() {
        println!("No presets in {}.", store.dir().display());
        return Ok(());
    }

    println!("Presets in {}:", store.dir().display());
    println!("{:-<60}", "");
    for name in &names {
        match store.get_config(name) {
            Ok(filters) => println!("  {} ({} filters)", name, filters.len()),
            Err(e) => println!("  {} (unreadable: {})", name, e),
        }
    }
    println!("{:-<60}", "");
    Ok(())
}

/// Print a preset.
pub fn preset_show(presets_dir: &Path, name: &str) -> Result<()> {
    let store = ConfigStore::open(presets_dir)?;
    let preset = load_named_preset(&store, name)?;

    println!("Preset:  {}", preset.name);
    println!("Created: {}", preset.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(pipeline) = &preset.pipeline {
        println!(
            "Pipeline: {} ms blocks, {} ms grace",
            pipeline.block_ms, pipeline.grace_ms
        );
    }
    println!("{:-<60}", "");
    for (position, spec) in preset.filters.iter().enumerate() {
        println!("{:>3}: {}", position, spec.label());
    }
    println!("{:-<60}", "");
    Ok(())
}

/// Delete a preset.
pub fn preset_delete(presets_dir: &Path, name: &str) -> Result<()> {
    let store = ConfigStore::open(presets_dir)?;
    if store.remove_config(name)? {
        println!("Preset deleted: {}", name);
    } else {
        println!("No preset named '{}'.", name);
    }
    Ok(())
}
