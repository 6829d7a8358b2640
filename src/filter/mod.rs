//! Designed filter adapter
//!
//! [`DesignedFilter`] wraps one IIR design and exposes the four band
//! configuration calls plus per-sample filtering. Kind, order and sample rate
//! are fixed at construction; the band shape is whatever the last
//! configuration call set.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::design::{Band, Cascade, Prototype, MAX_ORDER};
use crate::error::{RackError, Result};

/// Supported filter families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Butterworth,
    Bessel,
    #[serde(rename = "chebyshev1")]
    ChebyshevI,
    #[serde(rename = "chebyshev2")]
    ChebyshevII,
}

impl FilterKind {
    pub const ALL: [FilterKind; 4] = [
        FilterKind::Butterworth,
        FilterKind::Bessel,
        FilterKind::ChebyshevI,
        FilterKind::ChebyshevII,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Butterworth => "butterworth",
            FilterKind::Bessel => "bessel",
            FilterKind::ChebyshevI => "chebyshev1",
            FilterKind::ChebyshevII => "chebyshev2",
        }
    }

    /// Whether the ripple parameter affects this kind
    pub fn uses_ripple(&self) -> bool {
        matches!(self, FilterKind::ChebyshevI | FilterKind::ChebyshevII)
    }

    fn prototype(&self, ripple_db: f64) -> Prototype {
        match self {
            FilterKind::Butterworth => Prototype::Butterworth,
            FilterKind::Bessel => Prototype::Bessel,
            FilterKind::ChebyshevI => Prototype::ChebyshevI { ripple_db },
            FilterKind::ChebyshevII => Prototype::ChebyshevII {
                attenuation_db: ripple_db,
            },
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = RackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "butterworth" => Ok(FilterKind::Butterworth),
            "bessel" => Ok(FilterKind::Bessel),
            "chebyshev1" | "chebyshev_i" | "chebyshevi" => Ok(FilterKind::ChebyshevI),
            "chebyshev2" | "chebyshev_ii" | "chebyshevii" => Ok(FilterKind::ChebyshevII),
            other => Err(RackError::InvalidFilter {
                reason: format!("unknown filter kind '{}'", other),
            }),
        }
    }
}

/// Band configuration last applied to a filter
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BandShape {
    /// No configuration call yet; samples pass through unchanged
    #[default]
    Unconfigured,
    Configured(Band),
}

impl BandShape {
    pub fn band(&self) -> Option<Band> {
        match self {
            BandShape::Unconfigured => None,
            BandShape::Configured(band) => Some(*band),
        }
    }
}

/// A Butterworth, Bessel or Chebyshev filter with live per-sample state
#[derive(Debug, Clone)]
pub struct DesignedFilter {
    kind: FilterKind,
    order: usize,
    sample_rate: f64,
    ripple_db: f64,
    shape: BandShape,
    cascade: Cascade,
}

impl DesignedFilter {
    /// Create an unconfigured filter
    ///
    /// # Arguments
    /// * `kind` - Filter family
    /// * `order` - Prototype order, 1..=16
    /// * `sample_rate` - Sample rate in Hz
    /// * `ripple_db` - Chebyshev ripple (type I) or stop-band attenuation
    ///   (type II); defaults to 0
    ///
    /// # Errors
    /// `InvalidFilter` when the order or sample rate is out of range.
    pub fn new(
        kind: FilterKind,
        order: usize,
        sample_rate: f64,
        ripple_db: Option<f64>,
    ) -> Result<Self> {
        if order == 0 || order > MAX_ORDER {
            return Err(RackError::InvalidFilter {
                reason: format!("order {} outside 1..={}", order, MAX_ORDER),
            });
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(RackError::InvalidFilter {
                reason: format!("sample rate {} must be positive", sample_rate),
            });
        }

        Ok(Self {
            kind,
            order,
            sample_rate,
            ripple_db: ripple_db.unwrap_or(0.0),
            shape: BandShape::Unconfigured,
            cascade: Cascade::default(),
        })
    }

    /// Create and configure in one step
    pub fn with_band(
        kind: FilterKind,
        order: usize,
        sample_rate: f64,
        ripple_db: Option<f64>,
        band: Band,
    ) -> Result<Self> {
        let mut filter = Self::new(kind, order, sample_rate, ripple_db)?;
        filter.configure(band)?;
        Ok(filter)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn ripple_db(&self) -> f64 {
        self.ripple_db
    }

    pub fn shape(&self) -> BandShape {
        self.shape
    }

    /// Cutoff of a low- or high-pass configuration
    pub fn cutoff(&self) -> Option<f64> {
        match self.shape.band()? {
            Band::Lowpass { cutoff } | Band::Highpass { cutoff } => Some(cutoff),
            _ => None,
        }
    }

    /// Center frequency of a band-pass or band-stop configuration
    pub fn center(&self) -> Option<f64> {
        match self.shape.band()? {
            Band::Bandpass { center, .. } | Band::Bandstop { center, .. } => Some(center),
            _ => None,
        }
    }

    /// Width of a band-pass or band-stop configuration
    pub fn width(&self) -> Option<f64> {
        match self.shape.band()? {
            Band::Bandpass { width, .. } | Band::Bandstop { width, .. } => Some(width),
            _ => None,
        }
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_lowpass(&mut self, cutoff: f64) -> Result<()> {
        self.configure(Band::Lowpass { cutoff })
    }

    pub fn set_highpass(&mut self, cutoff: f64) -> Result<()> {
        self.configure(Band::Highpass { cutoff })
    }

    pub fn set_bandpass(&mut self, center: f64, width: f64) -> Result<()> {
        self.configure(Band::Bandpass { center, width })
    }

    pub fn set_bandstop(&mut self, center: f64, width: f64) -> Result<()> {
        self.configure(Band::Bandstop { center, width })
    }

    /// Redesign for `band`, replacing the current response
    ///
    /// On error the previous response and history are kept. History carries
    /// over when the new design has the same section count.
    pub fn configure(&mut self, band: Band) -> Result<()> {
        let mut next = Cascade::design(
            self.kind.prototype(self.ripple_db),
            band,
            self.order,
            self.sample_rate,
        )?;

        let carried = next.carry_state_from(&self.cascade);
        debug!(
            "{} order {} reconfigured to {:?} ({} sections, history {})",
            self.kind,
            self.order,
            band,
            next.len(),
            if carried { "kept" } else { "reset" }
        );

        self.cascade = next;
        self.shape = BandShape::Configured(band);
        Ok(())
    }

    // ========================================================================
    // Processing
    // ========================================================================

    #[inline]
    pub fn filter_one_sample(&mut self, sample: f64) -> f64 {
        self.cascade.filter(sample)
    }

    /// Filter a buffer in place, in index order
    pub fn process(&mut self, buffer: &mut [f64]) {
        for sample in buffer.iter_mut() {
            *sample = self.cascade.filter(*sample);
        }
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        self.cascade.reset();
    }
}
