//! Owned working state and per-iteration history.
//!
//! [`ProfileStore`] is the single owner of the mutable profile and zone map
//! during a solve. Nothing outside the equilibrium solver touches it;
//! everything handed outward is a deep copy. When history tracking is
//! enabled every iteration appends one [`IterationRecord`], an append-only
//! sequence suitable for convergence animations or offline analysis. The
//! record schema is plain columns (arrays and scalars) so it serializes to
//! any tabular format via serde.

use crate::profile::{FloatValue, Profile};
use crate::zones::ConvectiveZoneMap;
use serde::{Deserialize, Serialize};

/// Snapshot of the working state after one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub pressure_bar: Vec<FloatValue>,
    pub temperature_k: Vec<FloatValue>,
    /// Flattened zone bounds, `[start0, end0, start1, end1, ...]`.
    pub zone_boundaries: Vec<usize>,
    /// Largest per-level temperature change since the previous iteration (K).
    pub max_delta_t_k: FloatValue,
    /// Relative net-flux deviation from the equilibrium target.
    pub flux_imbalance: FloatValue,
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    profile: Profile,
    zones: ConvectiveZoneMap,
    history: Option<Vec<IterationRecord>>,
}

impl ProfileStore {
    pub fn new(profile: Profile, zones: ConvectiveZoneMap, track_history: bool) -> Self {
        Self {
            profile,
            zones,
            history: track_history.then(Vec::new),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn zones(&self) -> &ConvectiveZoneMap {
        &self.zones
    }

    pub fn update(&mut self, profile: Profile, zones: ConvectiveZoneMap) {
        self.profile = profile;
        self.zones = zones;
    }

    /// Immutable deep copy of the working state plus scalar diagnostics.
    pub fn snapshot(
        &self,
        iteration: usize,
        max_delta_t_k: FloatValue,
        flux_imbalance: FloatValue,
    ) -> IterationRecord {
        IterationRecord {
            iteration,
            pressure_bar: self.profile.pressure().to_vec(),
            temperature_k: self.profile.temperature().to_vec(),
            zone_boundaries: self.zones.boundaries(),
            max_delta_t_k,
            flux_imbalance,
        }
    }

    /// Append a snapshot when history tracking is enabled.
    pub fn record(
        &mut self,
        iteration: usize,
        max_delta_t_k: FloatValue,
        flux_imbalance: FloatValue,
    ) {
        if self.history.is_none() {
            return;
        }
        let record = self.snapshot(iteration, max_delta_t_k, flux_imbalance);
        if let Some(history) = self.history.as_mut() {
            history.push(record);
        }
    }

    pub fn history(&self) -> Option<&[IterationRecord]> {
        self.history.as_deref()
    }

    /// Consume the store, returning the final state and history.
    pub fn into_parts(self) -> (Profile, ConvectiveZoneMap, Option<Vec<IterationRecord>>) {
        (self.profile, self.zones, self.history)
    }
}
