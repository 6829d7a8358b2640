//! Rack presets
//!
//! A preset is a JSON document listing the filters of a rack in processing
//! order, optionally with the pipeline settings it was tuned under. Presets
//! live as `<name>.json` files in one directory managed by [`ConfigStore`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::design::Band;
use crate::effects::{
    BalancerParams, ChannelBalancer, EffectRuntime, GraphicEqParams, GraphicEqualizer, Limiter,
    LimiterParams, StreamLayout,
};
use crate::error::{RackError, Result};
use crate::filter::{DesignedFilter, FilterKind};
use crate::pipeline::PipelineConfig;
use crate::rack::FilterHandle;

/// Prefix of generated preset names
pub const DEFAULT_NAME_PREFIX: &str = "tuning_configuration__";

/// chrono rendering of `dd_MM_yy__hh_mm_AM`
const DEFAULT_NAME_FORMAT: &str = "%d_%m_%y__%I_%M_%p";

const EXTENSION: &str = "json";

// ============================================================================
// Filter Specs
// ============================================================================

/// Serializable description of one rack entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    Designed {
        kind: FilterKind,
        order: usize,
        sample_rate: f64,
        #[serde(default)]
        ripple_db: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        band: Option<Band>,
    },
    Limiter {
        layout: StreamLayout,
        #[serde(default)]
        params: LimiterParams,
    },
    ChannelBalancer {
        layout: StreamLayout,
        #[serde(default)]
        params: BalancerParams,
    },
    GraphicEqualizer {
        layout: StreamLayout,
        #[serde(default)]
        params: GraphicEqParams,
    },
}

impl FilterSpec {
    /// Short label for listings
    pub fn label(&self) -> String {
        match self {
            FilterSpec::Designed {
                kind, order, band, ..
            } => match band {
                Some(band) => format!("{} order {} {:?}", kind, order, band),
                None => format!("{} order {} (unconfigured)", kind, order),
            },
            FilterSpec::Limiter { params, .. } => {
                format!("limiter {} dB", params.threshold_db)
            }
            FilterSpec::ChannelBalancer { params, .. } => {
                format!("channel balancer {}", params.preference)
            }
            FilterSpec::GraphicEqualizer { params, .. } => {
                format!("graphic equalizer {:?}", params.gains)
            }
        }
    }

    /// Construct the live handle this spec describes
    ///
    /// # Errors
    /// Whatever the filter or effect constructor rejects.
    pub fn build(&self, runtime: &EffectRuntime) -> Result<FilterHandle> {
        let handle = match self {
            FilterSpec::Designed {
                kind,
                order,
                sample_rate,
                ripple_db,
                band,
            } => {
                let mut filter =
                    DesignedFilter::new(*kind, *order, *sample_rate, Some(*ripple_db))?;
                if let Some(band) = band {
                    filter.configure(*band)?;
                }
                FilterHandle::Designed(filter)
            }
            FilterSpec::Limiter { layout, params } => {
                FilterHandle::Effect(Box::new(Limiter::new(runtime, *layout, *params)?))
            }
            FilterSpec::ChannelBalancer { layout, params } => {
                FilterHandle::Effect(Box::new(ChannelBalancer::new(runtime, *layout, *params)?))
            }
            FilterSpec::GraphicEqualizer { layout, params } => {
                FilterHandle::Effect(Box::new(GraphicEqualizer::new(runtime, *layout, *params)?))
            }
        };
        Ok(handle)
    }
}

// ============================================================================
// Presets
// ============================================================================

/// Preset document as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub filters: Vec<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,
}

impl Preset {
    pub fn new(name: impl Into<String>, filters: Vec<FilterSpec>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            filters,
            pipeline: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Timestamped name used when none is given
pub fn default_name() -> String {
    format!(
        "{}{}",
        DEFAULT_NAME_PREFIX,
        Local::now().format(DEFAULT_NAME_FORMAT)
    )
}

// ============================================================================
// Store
// ============================================================================

/// Directory of preset files
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Open a store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| RackError::ConfigIo {
            path: dir.clone(),
            source: e,
        })?;
        debug!("Preset store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a preset name resolves to
    pub fn path_for(&self, name: &str) -> PathBuf {
        let mut file = sanitize_name(name);
        let suffix = format!(".{}", EXTENSION);
        if !file.ends_with(&suffix) {
            file.push_str(&suffix);
        }
        self.dir.join(file)
    }

    /// Save filters under `name` (or a timestamped default name)
    ///
    /// # Returns
    /// Path of the written file. An existing preset of the same name is
    /// overwritten.
    pub fn add_config(&self, filters: &[FilterSpec], name: Option<&str>) -> Result<PathBuf> {
        let name = name.map(str::to_string).unwrap_or_else(default_name);
        self.save_preset(&Preset::new(name, filters.to_vec()))
    }

    /// Write a full preset document
    pub fn save_preset(&self, preset: &Preset) -> Result<PathBuf> {
        let path = self.path_for(&preset.name);
        let content = serde_json::to_string_pretty(preset)?;

        fs::write(&path, content).map_err(|e| RackError::ConfigIo {
            path: path.clone(),
            source: e,
        })?;

        info!(
            "Saved preset '{}' ({} filters) to {}",
            preset.name,
            preset.filters.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load a preset document; `None` when no such file exists
    pub fn load_preset(&self, name: &str) -> Result<Option<Preset>> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| RackError::ConfigIo {
            path: path.clone(),
            source: e,
        })?;
        let preset: Preset = serde_json::from_str(&content)?;
        Ok(Some(preset))
    }

    /// Filters stored under `name`; an unknown name yields an empty list
    pub fn get_config(&self, name: &str) -> Result<Vec<FilterSpec>> {
        Ok(self
            .load_preset(name)?
            .map(|preset| preset.filters)
            .unwrap_or_default())
    }

    /// Delete a preset, returning whether a file was removed
    pub fn remove_config(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(false);
        }

        fs::remove_file(&path).map_err(|e| RackError::ConfigIo {
            path: path.clone(),
            source: e,
        })?;
        info!("Removed preset {}", path.display());
        Ok(true)
    }

    /// Locate a preset in this store by the file name of `path`
    pub fn find_config(&self, path: &Path) -> Option<PathBuf> {
        let candidate = self.dir.join(path.file_name()?);
        candidate.is_file().then_some(candidate)
    }

    /// Names of every stored preset, sorted
    pub fn list_configs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable preset entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(EXTENSION)
            {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
