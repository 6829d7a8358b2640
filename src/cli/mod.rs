//! CLI Module
//!
//! Command-line interface for running WAV files through a filter rack and
//! managing rack presets.

pub mod commands;

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::config::FilterSpec;
use crate::design::Band;
use crate::error::{RackError, Result};
use crate::filter::FilterKind;

/// Audiorack - real-time audio filter rack
#[derive(Parser, Debug)]
#[command(name = "audiorack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a WAV file through the rack into another WAV file
    #[command(name = "process")]
    Process {
        /// Input WAV file (capture side)
        input: PathBuf,

        /// Output WAV file (playback side)
        output: PathBuf,

        /// Inline filter, `kind:order:shape:freq[:width][:ripple]`
        #[arg(short, long = "filter")]
        filters: Vec<InlineFilter>,

        /// Preset to load before the inline filters
        #[arg(short, long)]
        preset: Option<String>,

        #[command(flatten)]
        store: StoreArgs,

        /// Block duration in milliseconds (15-50)
        #[arg(long)]
        block_ms: Option<u64>,

        /// Pace capture to the file's sample rate
        #[arg(long)]
        realtime: bool,
    },

    /// Print the line format of a WAV file
    #[command(name = "inspect")]
    Inspect {
        /// WAV file to inspect
        input: PathBuf,
    },

    /// Manage rack presets
    #[command(subcommand)]
    Preset(PresetCommand),
}

#[derive(Subcommand, Debug)]
pub enum PresetCommand {
    /// Save inline filters as a preset
    Save {
        /// Preset name (timestamped default if omitted)
        name: Option<String>,

        /// Inline filter, `kind:order:shape:freq[:width][:ripple]`
        #[arg(short, long = "filter", required = true)]
        filters: Vec<InlineFilter>,

        /// Sample rate the filters are designed for
        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,

        /// Store pipeline settings with this block duration
        #[arg(long)]
        block_ms: Option<u64>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// List stored presets
    List {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Print a preset
    Show {
        name: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Delete a preset
    Delete {
        name: String,

        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Preset directory
    #[arg(long = "presets-dir", default_value = "presets")]
    pub dir: PathBuf,
}

// ============================================================================
// Inline Filters
// ============================================================================

/// Designed filter given on the command line
///
/// Format is `kind:order:shape:freq[:width][:ripple]`. Low/high-pass take an
/// optional ripple as the fifth field; band-pass/stop require the width there
/// and take the ripple as the sixth.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFilter {
    pub kind: FilterKind,
    pub order: usize,
    pub band: Band,
    pub ripple_db: Option<f64>,
}

impl InlineFilter {
    /// Preset entry for a stream at `sample_rate`
    pub fn to_spec(&self, sample_rate: f64) -> FilterSpec {
        FilterSpec::Designed {
            kind: self.kind,
            order: self.order,
            sample_rate,
            ripple_db: self.ripple_db.unwrap_or(0.0),
            band: Some(self.band),
        }
    }
}

fn parse_number(field: &str, what: &str) -> Result<f64> {
    field.trim().parse::<f64>().map_err(|_| RackError::InvalidFilter {
        reason: format!("invalid {} '{}'", what, field),
    })
}

impl FromStr for InlineFilter {
    type Err = RackError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() < 4 {
            return Err(RackError::InvalidFilter {
                reason: format!("'{}' is not kind:order:shape:freq[:width][:ripple]", s),
            });
        }

        let kind: FilterKind = fields[0].trim().parse()?;
        let order = fields[1]
            .trim()
            .parse::<usize>()
            .map_err(|_| RackError::InvalidFilter {
                reason: format!("invalid order '{}'", fields[1]),
            })?;
        let freq = parse_number(fields[3], "frequency")?;

        let shape = fields[2].trim().to_ascii_lowercase();
        let (band, rest) = match shape.as_str() {
            "lowpass" | "lp" => (Band::Lowpass { cutoff: freq }, &fields[4..]),
            "highpass" | "hp" => (Band::Highpass { cutoff: freq }, &fields[4..]),
            "bandpass" | "bp" | "bandstop" | "bs" => {
                let width = fields.get(4).ok_or_else(|| RackError::InvalidFilter {
                    reason: format!("{} needs a width", shape),
                })?;
                let width = parse_number(width, "width")?;
                let band = if shape.starts_with("bandp") || shape == "bp" {
                    Band::Bandpass {
                        center: freq,
                        width,
                    }
                } else {
                    Band::Bandstop {
                        center: freq,
                        width,
                    }
                };
                (band, &fields[5.min(fields.len())..])
            }
            other => {
                return Err(RackError::InvalidFilter {
                    reason: format!("unknown shape '{}'", other),
                })
            }
        };

        let ripple_db = match rest {
            [] => None,
            [ripple] => Some(parse_number(ripple, "ripple")?),
            _ => {
                return Err(RackError::InvalidFilter {
                    reason: format!("too many fields in '{}'", s),
                })
            }
        };

        Ok(Self {
            kind,
            order,
            band,
            ripple_db,
        })
    }
}
