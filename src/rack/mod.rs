//! Filter Rack
//!
//! An ordered, position-addressable collection of filter handles. Filters are
//! processed in rack order (position 0 first); each handle's output is the
//! next handle's input. Duplicate kinds are allowed and the rack never fills.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::config::FilterSpec;
use crate::effects::{EffectModule, EffectRuntime};
use crate::error::{RackError, Result};
use crate::filter::DesignedFilter;

// ============================================================================
// Filter Handles
// ============================================================================

/// One rack entry: a designed IIR filter or an effect module
#[derive(Debug)]
pub enum FilterHandle {
    Designed(DesignedFilter),
    Effect(Box<dyn EffectModule>),
}

impl FilterHandle {
    /// Process a buffer in place
    ///
    /// A designed filter runs per sample in index order; an effect module
    /// sees the whole buffer once.
    pub fn process(&mut self, buffer: &mut [f64]) -> Result<()> {
        match self {
            FilterHandle::Designed(filter) => {
                filter.process(buffer);
                Ok(())
            }
            FilterHandle::Effect(effect) => effect.process(buffer),
        }
    }

    /// Clear per-sample history
    pub fn reset(&mut self) {
        match self {
            FilterHandle::Designed(filter) => filter.reset(),
            FilterHandle::Effect(effect) => effect.reset(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterHandle::Designed(filter) => filter.kind().as_str(),
            FilterHandle::Effect(effect) => effect.name(),
        }
    }

    /// Description that rebuilds an equivalent handle
    pub fn spec(&self) -> FilterSpec {
        match self {
            FilterHandle::Designed(filter) => FilterSpec::Designed {
                kind: filter.kind(),
                order: filter.order(),
                sample_rate: filter.sample_rate(),
                ripple_db: filter.ripple_db(),
                band: filter.shape().band(),
            },
            FilterHandle::Effect(effect) => effect.spec(),
        }
    }

    pub fn as_designed(&self) -> Option<&DesignedFilter> {
        match self {
            FilterHandle::Designed(filter) => Some(filter),
            FilterHandle::Effect(_) => None,
        }
    }

    pub fn as_designed_mut(&mut self) -> Option<&mut DesignedFilter> {
        match self {
            FilterHandle::Designed(filter) => Some(filter),
            FilterHandle::Effect(_) => None,
        }
    }

    pub fn as_effect(&self) -> Option<&dyn EffectModule> {
        match self {
            FilterHandle::Designed(_) => None,
            FilterHandle::Effect(effect) => Some(effect.as_ref()),
        }
    }

    pub fn as_effect_mut(&mut self) -> Option<&mut (dyn EffectModule + 'static)> {
        match self {
            FilterHandle::Designed(_) => None,
            FilterHandle::Effect(effect) => Some(effect.as_mut()),
        }
    }
}

impl From<DesignedFilter> for FilterHandle {
    fn from(filter: DesignedFilter) -> Self {
        FilterHandle::Designed(filter)
    }
}

impl From<Box<dyn EffectModule>> for FilterHandle {
    fn from(effect: Box<dyn EffectModule>) -> Self {
        FilterHandle::Effect(effect)
    }
}

// ============================================================================
// Rack
// ============================================================================

/// Ordered chain of filter handles
#[derive(Debug, Default)]
pub struct FilterRack {
    filters: Vec<FilterHandle>,
}

impl FilterRack {
    /// Create an empty rack
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rack from preset specs, in order
    pub fn from_specs(specs: &[FilterSpec], runtime: &EffectRuntime) -> Result<Self> {
        let filters = specs
            .iter()
            .map(|spec| spec.build(runtime))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { filters })
    }

    /// Replace the whole rack from specs; on error the rack is unchanged
    pub fn apply_specs(&mut self, specs: &[FilterSpec], runtime: &EffectRuntime) -> Result<()> {
        let rebuilt = Self::from_specs(specs, runtime)?;
        debug!("Rack replaced: {} -> {} filters", self.len(), rebuilt.len());
        self.filters = rebuilt.filters;
        Ok(())
    }

    /// Specs of every handle in rack order
    pub fn snapshot(&self) -> Vec<FilterSpec> {
        self.filters.iter().map(FilterHandle::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The rack is unbounded
    pub fn is_full(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterHandle> {
        self.filters.iter()
    }

    fn check_position(&self, position: usize) -> Result<()> {
        if self.filters.is_empty() {
            return Err(RackError::EmptyRack);
        }
        if position >= self.filters.len() {
            return Err(RackError::OutOfRange {
                position,
                size: self.filters.len(),
            });
        }
        Ok(())
    }

    /// Insert at `position` (0..=len), shifting later filters right
    pub fn insert(&mut self, handle: impl Into<FilterHandle>, position: usize) -> Result<()> {
        if position > self.filters.len() {
            return Err(RackError::OutOfRange {
                position,
                size: self.filters.len(),
            });
        }
        let handle = handle.into();
        debug!("Rack insert {} at {}", handle.name(), position);
        self.filters.insert(position, handle);
        Ok(())
    }

    /// Append to the end of the rack
    pub fn push(&mut self, handle: impl Into<FilterHandle>) {
        self.filters.push(handle.into());
    }

    /// Remove and return the filter at `position`
    pub fn remove(&mut self, position: usize) -> Result<FilterHandle> {
        self.check_position(position)?;
        let handle = self.filters.remove(position);
        debug!("Rack remove {} from {}", handle.name(), position);
        Ok(handle)
    }

    pub fn get(&self, position: usize) -> Result<&FilterHandle> {
        self.check_position(position)?;
        Ok(&self.filters[position])
    }

    /// Live access, e.g. to retune a designed filter in place
    pub fn get_mut(&mut self, position: usize) -> Result<&mut FilterHandle> {
        self.check_position(position)?;
        Ok(&mut self.filters[position])
    }

    /// Move a filter from one position to another
    pub fn move_filter(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_position(from)?;
        self.check_position(to)?;
        let handle = self.filters.remove(from);
        self.filters.insert(to, handle);
        Ok(())
    }

    /// Drop every filter
    pub fn clear(&mut self) {
        self.filters.clear();
    }

    /// Clear history of every filter
    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(FilterHandle::reset);
    }

    /// Run the buffer through every filter in rack order
    ///
    /// Stops at the first failing handle and returns its error.
    pub fn process_data(&mut self, buffer: &mut [f64]) -> Result<()> {
        for (position, handle) in self.filters.iter_mut().enumerate() {
            if let Err(e) = handle.process(buffer) {
                warn!("Rack position {} ({}) failed: {}", position, handle.name(), e);
                return Err(e);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Shared Rack
// ============================================================================

/// Rack shared between the pipeline worker and controlling threads
///
/// The worker locks once per block, so any mutation lands between blocks.
#[derive(Debug, Clone, Default)]
pub struct SharedRack {
    inner: Arc<Mutex<FilterRack>>,
}

impl SharedRack {
    pub fn new(rack: FilterRack) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rack)),
        }
    }

    /// Lock the rack, recovering from a poisoned lock
    pub fn lock(&self) -> MutexGuard<'_, FilterRack> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with the rack locked
    pub fn with<R>(&self, f: impl FnOnce(&mut FilterRack) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl From<FilterRack> for SharedRack {
    fn from(rack: FilterRack) -> Self {
        Self::new(rack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Band;
    use crate::effects::{BalancerParams, ChannelBalancer, Platform, StreamLayout};
    use crate::filter::FilterKind;

    fn lowpass(cutoff: f64) -> DesignedFilter {
        DesignedFilter::with_band(
            FilterKind::Butterworth,
            2,
            48000.0,
            None,
            Band::Lowpass { cutoff },
        )
        .unwrap()
    }

    fn cutoff_at(rack: &FilterRack, position: usize) -> Option<f64> {
        rack.get(position).unwrap().as_designed().unwrap().cutoff()
    }

    #[test]
    fn test_insert_and_get() {
        let mut rack = FilterRack::new();
        rack.insert(lowpass(100.0), 0).unwrap();
        rack.insert(lowpass(300.0), 1).unwrap();
        rack.insert(lowpass(200.0), 1).unwrap();

        assert_eq!(rack.len(), 3);
        assert_eq!(cutoff_at(&rack, 0), Some(100.0));
        assert_eq!(cutoff_at(&rack, 1), Some(200.0));
        assert_eq!(cutoff_at(&rack, 2), Some(300.0));
        assert!(!rack.is_full());
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut rack = FilterRack::new();
        assert!(matches!(
            rack.insert(lowpass(100.0), 1),
            Err(RackError::OutOfRange {
                position: 1,
                size: 0
            })
        ));
        assert!(rack.is_empty());
    }

    #[test]
    fn test_remove_errors() {
        let mut rack = FilterRack::new();
        assert!(matches!(rack.remove(0), Err(RackError::EmptyRack)));

        rack.push(lowpass(100.0));
        assert!(matches!(
            rack.remove(1),
            Err(RackError::OutOfRange { .. })
        ));
        assert_eq!(rack.len(), 1);

        let removed = rack.remove(0).unwrap();
        assert_eq!(removed.as_designed().unwrap().cutoff(), Some(100.0));
        assert!(rack.is_empty());
    }

    #[test]
    fn test_get_errors() {
        let mut rack = FilterRack::new();
        assert!(matches!(rack.get(0), Err(RackError::EmptyRack)));
        rack.push(lowpass(100.0));
        assert!(matches!(rack.get_mut(3), Err(RackError::OutOfRange { .. })));
    }

    #[test]
    fn test_retune_through_get_mut() {
        let mut rack = FilterRack::new();
        rack.push(lowpass(100.0));
        rack.get_mut(0)
            .unwrap()
            .as_designed_mut()
            .unwrap()
            .set_highpass(500.0)
            .unwrap();
        assert_eq!(
            rack.get(0).unwrap().as_designed().unwrap().shape().band(),
            Some(Band::Highpass { cutoff: 500.0 })
        );
    }

    #[test]
    fn test_empty_rack_is_identity() {
        let mut rack = FilterRack::new();
        let mut buf = vec![0.5, -0.25, 1.0];
        rack.process_data(&mut buf).unwrap();
        assert_eq!(buf, vec![0.5, -0.25, 1.0]);

        let mut empty: Vec<f64> = Vec::new();
        rack.process_data(&mut empty).unwrap();
    }

    #[test]
    fn test_move_filter() {
        let mut rack = FilterRack::new();
        for cutoff in [100.0, 200.0, 300.0] {
            rack.push(lowpass(cutoff));
        }
        rack.move_filter(0, 2).unwrap();
        assert_eq!(cutoff_at(&rack, 0), Some(200.0));
        assert_eq!(cutoff_at(&rack, 2), Some(100.0));
        assert!(rack.move_filter(0, 3).is_err());
    }

    #[test]
    fn test_effect_failure_aborts_processing() {
        let runtime = EffectRuntime::load(Platform::new("linux", "x86_64").unwrap());
        let layout = StreamLayout::new(2, 4, 48000.0).unwrap();
        let balancer = ChannelBalancer::new(&runtime, layout, BalancerParams::default()).unwrap();

        let mut rack = FilterRack::new();
        rack.push(Box::new(balancer) as Box<dyn EffectModule>);
        rack.push(lowpass(1000.0));

        let mut buf = vec![0.0; 8];
        assert!(matches!(
            rack.process_data(&mut buf),
            Err(RackError::ProcessingError { .. })
        ));
    }

    #[test]
    fn test_snapshot_and_apply() {
        let runtime = EffectRuntime::load(Platform::new("linux", "x86_64").unwrap());
        let mut rack = FilterRack::new();
        rack.push(lowpass(100.0));
        rack.push(lowpass(200.0));
        let specs = rack.snapshot();

        let mut other = FilterRack::new();
        other.apply_specs(&specs, &runtime).unwrap();
        assert_eq!(other.snapshot(), specs);

        let mut bad = specs.clone();
        bad.push(FilterSpec::Designed {
            kind: FilterKind::Bessel,
            order: 0,
            sample_rate: 48000.0,
            ripple_db: 0.0,
            band: None,
        });
        assert!(other.apply_specs(&bad, &runtime).is_err());
        assert_eq!(other.len(), 2);
    }

    #[test]
    fn test_shared_rack_survives_poison() {
        let shared = SharedRack::new(FilterRack::new());
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock();
            panic!("poison the lock");
        })
        .join();

        shared.with(|rack| rack.push(lowpass(100.0)));
        assert_eq!(shared.len(), 1);
    }
}
