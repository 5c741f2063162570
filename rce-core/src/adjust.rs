//! Convective adjustment.
//!
//! A level pair is convectively unstable when its temperature gradient with
//! respect to log pressure exceeds the adiabatic gradient of the local
//! composition (the Schwarzschild criterion). Unstable runs are pulled onto
//! the adiabat anchored at the run's deep (high pressure) boundary, whose
//! temperature is preserved as the pivot.
//!
//! Zone boundaries move slowly: per iteration a zone may grow or shrink by
//! at most `zone_growth_limit` levels at each edge, which stops the
//! radiative/convective boundary from hunting back and forth between
//! iterations. The zone count bound itself is enforced by
//! [`ConvectiveZoneMap::replace`], which merges the closest pair when a
//! proposed update would exceed it.

use crate::errors::{RceError, RceResult};
use crate::profile::Profile;
use crate::provider::Composition;
use crate::zones::{ConvectiveZoneMap, Zone};

#[derive(Debug, Clone)]
pub struct AdjustOutcome {
    pub profile: Profile,
    pub zones: ConvectiveZoneMap,
    /// No unstable levels remain; the solver may treat the run as purely
    /// radiative.
    pub purely_radiative: bool,
    /// Levels whose temperature was rewritten onto an adiabat.
    pub adjusted_levels: usize,
}

#[derive(Debug, Clone)]
pub struct ConvectiveAdjuster {
    zone_growth_limit: usize,
}

impl ConvectiveAdjuster {
    pub fn new(zone_growth_limit: usize) -> Self {
        Self { zone_growth_limit }
    }

    /// Detect unstable runs, update the zone map, and relax zone levels
    /// onto the adiabat. Returns corrected copies; the inputs are untouched.
    pub fn adjust(
        &self,
        profile: &Profile,
        zones: &ConvectiveZoneMap,
        compositions: &[Composition],
    ) -> RceResult<AdjustOutcome> {
        let n = profile.nlevel();
        if compositions.len() != n {
            return Err(RceError::Error(format!(
                "expected {} compositions, got {}",
                n,
                compositions.len()
            )));
        }

        let candidates = self.unstable_runs(profile, compositions);
        let proposed = self.bound_boundary_motion(&candidates, zones, n);

        let mut updated_zones = zones.clone();
        updated_zones.replace(proposed);

        let mut temperature = profile.temperature().clone();
        let pressure = profile.pressure();
        let mut adjusted_levels = 0;
        for zone in updated_zones.zones() {
            // March upward from the deep anchor, level by level, so each
            // step uses the adiabatic gradient of the layer below it.
            for i in (zone.start..zone.end).rev() {
                let nabla = compositions[i + 1].adiabatic_gradient;
                temperature[i] = temperature[i + 1] * (pressure[i] / pressure[i + 1]).powf(nabla);
                adjusted_levels += 1;
            }
        }

        if adjusted_levels > 0 {
            log::debug!(
                "convective adjustment rewrote {} levels across {} zones",
                adjusted_levels,
                updated_zones.count()
            );
        }

        let mut adjusted = profile.clone();
        adjusted.set_temperature(temperature)?;
        let purely_radiative = updated_zones.is_empty();
        Ok(AdjustOutcome {
            profile: adjusted,
            zones: updated_zones,
            purely_radiative,
            adjusted_levels,
        })
    }

    /// Contiguous runs of unstable interfaces, as level ranges.
    fn unstable_runs(&self, profile: &Profile, compositions: &[Composition]) -> Vec<Zone> {
        let n = profile.nlevel();
        let mut runs = Vec::new();
        let mut current: Option<Zone> = None;
        for i in 0..n - 1 {
            // Threshold from the deeper level of the pair, where the rising
            // parcel starts.
            let nabla_ad = compositions[i + 1].adiabatic_gradient;
            if profile.lapse(i) > nabla_ad {
                current = Some(match current {
                    Some(run) => Zone::new(run.start, i + 1),
                    None => Zone::new(i, i + 1),
                });
            } else if let Some(run) = current.take() {
                runs.push(run);
            }
        }
        if let Some(run) = current {
            runs.push(run);
        }
        runs
    }

    /// Clamp candidate zones so no existing boundary moves more than the
    /// growth limit, shrink unmatched existing zones gradually, and admit
    /// newly detected zones as seeds.
    fn bound_boundary_motion(
        &self,
        candidates: &[Zone],
        previous: &ConvectiveZoneMap,
        nlevel: usize,
    ) -> Vec<Zone> {
        let limit = self.zone_growth_limit;
        let mut proposed = Vec::new();
        let mut matched = vec![false; previous.count()];

        for candidate in candidates {
            let overlap = previous
                .zones()
                .iter()
                .position(|z| candidate.start <= z.end && z.start <= candidate.end);
            match overlap {
                Some(index) => {
                    matched[index] = true;
                    let prev = previous.zones()[index];
                    let start = candidate
                        .start
                        .clamp(prev.start.saturating_sub(limit), prev.start + limit);
                    let end = candidate
                        .end
                        .clamp(prev.end.saturating_sub(limit), (prev.end + limit).min(nlevel - 1));
                    if start <= end {
                        proposed.push(Zone::new(start, end));
                    }
                }
                None => proposed.push(*candidate),
            }
        }

        // Zones with no unstable levels left release edge levels gradually
        // instead of vanishing in one step.
        for (index, prev) in previous.zones().iter().enumerate() {
            if matched[index] {
                continue;
            }
            if prev.end - prev.start >= 2 * limit && limit > 0 {
                proposed.push(Zone::new(prev.start + limit, prev.end - limit));
            } else if limit == 0 {
                proposed.push(*prev);
            }
            // Otherwise the zone is small enough to release entirely.
        }

        proposed
    }
}
