//! Convective zone bookkeeping.
//!
//! A [`ConvectiveZoneMap`] records which contiguous level ranges are
//! convectively unstable and therefore held on an adiabat rather than in
//! pure radiative balance. Zones are ordered by their start index, never
//! overlap, and the zone count is bounded by the configured maximum
//! (`nofczns`). Only the convective adjuster mutates the map; the solver
//! and flux code read it.

use crate::errors::{RceError, RceResult};
use serde::{Deserialize, Serialize};

/// A contiguous run of convectively unstable levels, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub start: usize,
    pub end: usize,
}

impl Zone {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, level: usize) -> bool {
        level >= self.start && level <= self.end
    }

    fn touches(&self, other: &Zone) -> bool {
        // Overlapping or directly adjacent runs collapse into one zone.
        self.start <= other.end + 1 && other.start <= self.end + 1
    }

    fn union(&self, other: &Zone) -> Zone {
        Zone::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvectiveZoneMap {
    zones: Vec<Zone>,
    max_zones: usize,
}

impl ConvectiveZoneMap {
    /// An empty map allowing up to `max_zones` zones.
    pub fn empty(max_zones: usize) -> Self {
        Self {
            zones: Vec::new(),
            max_zones,
        }
    }

    /// Initial guess covering levels `nstr_upper..=nstr_deep`.
    pub fn from_guess(
        nstr_upper: usize,
        nstr_deep: usize,
        max_zones: usize,
        nlevel: usize,
    ) -> RceResult<Self> {
        if max_zones == 0 {
            return Ok(Self::empty(0));
        }
        if nstr_upper > nstr_deep || nstr_deep >= nlevel {
            return Err(RceError::Configuration(format!(
                "convective zone guess [{}, {}] outside level range 0..{}",
                nstr_upper, nstr_deep, nlevel
            )));
        }
        Ok(Self {
            zones: vec![Zone::new(nstr_upper, nstr_deep)],
            max_zones,
        })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn max_zones(&self) -> usize {
        self.max_zones
    }

    pub fn count(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn level_is_convective(&self, level: usize) -> bool {
        self.zones.iter().any(|z| z.contains(level))
    }

    /// Flattened `[start0, end0, start1, end1, ...]` form for diagnostics.
    pub fn boundaries(&self) -> Vec<usize> {
        self.zones
            .iter()
            .flat_map(|z| [z.start, z.end])
            .collect()
    }

    /// Replace the zone set, canonicalizing as needed.
    ///
    /// Zones are sorted by start index, touching runs are unioned, and if
    /// more than `max_zones` remain the pair separated by the smallest gap
    /// is merged (their ranges unioned, absorbing the gap) until the bound
    /// holds. With `max_zones == 0` the map always ends up empty.
    pub fn replace(&mut self, mut zones: Vec<Zone>) {
        if self.max_zones == 0 {
            self.zones.clear();
            return;
        }
        zones.sort_by_key(|z| z.start);
        let mut merged: Vec<Zone> = Vec::with_capacity(zones.len());
        for zone in zones {
            match merged.last_mut() {
                Some(last) if last.touches(&zone) => *last = last.union(&zone),
                _ => merged.push(zone),
            }
        }
        while merged.len() > self.max_zones {
            let mut best = 1;
            let mut best_gap = usize::MAX;
            for i in 1..merged.len() {
                let gap = merged[i].start - merged[i - 1].end;
                if gap < best_gap {
                    best_gap = gap;
                    best = i;
                }
            }
            log::warn!(
                "merging convective zones {:?} and {:?} to respect the zone bound of {}",
                merged[best - 1],
                merged[best],
                self.max_zones
            );
            let union = merged[best - 1].union(&merged[best]);
            merged[best - 1] = union;
            merged.remove(best);
        }
        self.zones = merged;
    }

    /// Check the map invariants against a profile of `nlevel` levels.
    pub fn validate(&self, nlevel: usize) -> RceResult<()> {
        if self.zones.len() > self.max_zones {
            return Err(RceError::Configuration(format!(
                "{} convective zones exceeds the configured maximum of {}",
                self.zones.len(),
                self.max_zones
            )));
        }
        let mut previous_end: Option<usize> = None;
        for zone in &self.zones {
            if zone.start > zone.end || zone.end >= nlevel {
                return Err(RceError::Configuration(format!(
                    "convective zone {:?} outside level range 0..{}",
                    zone, nlevel
                )));
            }
            if let Some(end) = previous_end {
                if zone.start <= end {
                    return Err(RceError::Configuration(format!(
                        "convective zones overlap or are out of order near level {}",
                        zone.start
                    )));
                }
            }
            previous_end = Some(zone.end);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_builds_single_zone() {
        let map = ConvectiveZoneMap::from_guess(80, 90, 1, 91).unwrap();
        assert_eq!(map.zones(), &[Zone::new(80, 90)]);
        assert!(map.level_is_convective(85));
        assert!(!map.level_is_convective(79));
    }

    #[test]
    fn guess_outside_grid_is_rejected() {
        assert!(ConvectiveZoneMap::from_guess(80, 91, 1, 91).is_err());
        assert!(ConvectiveZoneMap::from_guess(50, 40, 1, 91).is_err());
    }

    #[test]
    fn replace_unions_touching_runs() {
        let mut map = ConvectiveZoneMap::empty(3);
        map.replace(vec![Zone::new(10, 20), Zone::new(21, 30), Zone::new(40, 50)]);
        assert_eq!(map.zones(), &[Zone::new(10, 30), Zone::new(40, 50)]);
        map.validate(60).unwrap();
    }

    #[test]
    fn replace_merges_closest_pair_when_over_budget() {
        let mut map = ConvectiveZoneMap::empty(2);
        map.replace(vec![
            Zone::new(0, 5),
            Zone::new(30, 35),
            Zone::new(38, 45),
        ]);
        // The 30..35 and 38..45 pair has the smaller gap, so it absorbs it.
        assert_eq!(map.zones(), &[Zone::new(0, 5), Zone::new(30, 45)]);
    }

    #[test]
    fn zero_budget_map_stays_empty() {
        let mut map = ConvectiveZoneMap::empty(0);
        map.replace(vec![Zone::new(3, 9)]);
        assert!(map.is_empty());
        map.validate(20).unwrap();
    }

    #[test]
    fn boundaries_flatten_in_order() {
        let mut map = ConvectiveZoneMap::empty(2);
        map.replace(vec![Zone::new(40, 50), Zone::new(10, 20)]);
        assert_eq!(map.boundaries(), vec![10, 20, 40, 50]);
    }
}
