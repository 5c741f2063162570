//! The radiative-convective equilibrium iteration.
//!
//! [`EquilibriumSolver::solve`] drives a damped fixed-point iteration to a
//! self-consistent temperature profile. Each iteration:
//!
//! 1. refreshes per-level chemistry and opacity from the current profile
//!    (independent across levels, so this phase forks across the worker
//!    pool and joins before the flux solve),
//! 2. runs the single-threaded radiative flux solve,
//! 3. applies a damped Newton step on the per-level net-flux residual,
//!    halving a level's damping when its update direction alternates,
//! 4. hands the profile to the convective adjuster, which rewrites unstable
//!    runs onto the adiabat and updates the zone map,
//! 5. records diagnostics and checks the termination conditions.
//!
//! The solve is a state machine: `INITIALIZED -> ITERATING -> {CONVERGED,
//! DIVERGED, MAX_ITER_EXCEEDED, CANCELLED}`. All terminal states return a
//! [`ConvergenceResult`] holding the best-known profile; only configuration
//! problems and failed lookups surface as `Err`.

use crate::adjust::ConvectiveAdjuster;
use crate::config::SolverConfig;
use crate::errors::{RceError, RceResult};
use crate::flux::{
    brightness_temperature_k, BoundaryConditions, FluxProfile, RadiativeFluxSolver,
    STEFAN_BOLTZMANN,
};
use crate::profile::{FloatValue, Profile};
use crate::provider::{
    ChemistryEngine, Composition, LookupError, OpacityProvider, OpacitySpectrum, WavelengthGrid,
};
use crate::store::{IterationRecord, ProfileStore};
use crate::zones::ConvectiveZoneMap;
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation flag, checked at the top of every iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Internal state machine of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolverState {
    Initialized,
    Iterating,
    Converged,
    Diverged,
    MaxIterExceeded,
    Cancelled,
}

/// Terminal outcome of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverOutcome {
    Converged,
    Diverged,
    MaxIterExceeded,
    Cancelled,
}

impl SolverOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolverOutcome::Converged)
    }
}

/// Final output of a solve: the last valid profile and zone map, the
/// outcome, and optionally the full iteration history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub profile: Profile,
    pub zones: ConvectiveZoneMap,
    pub outcome: SolverOutcome,
    pub iterations: usize,
    /// Upward flux at the top of the atmosphere from the last flux solve.
    pub toa_flux_up_w_m2: FloatValue,
    pub history: Option<Vec<IterationRecord>>,
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        self.outcome.is_converged()
    }

    /// Convective zone bounds in pressure (bar), ordered top down.
    pub fn zone_pressure_bounds(&self) -> Vec<(FloatValue, FloatValue)> {
        let pressure = self.profile.pressure();
        self.zones
            .zones()
            .iter()
            .map(|z| (pressure[z.start], pressure[z.end]))
            .collect()
    }

    /// Blackbody temperature of the emergent flux.
    pub fn brightness_temperature_k(&self) -> FloatValue {
        brightness_temperature_k(self.toa_flux_up_w_m2)
    }

    /// True when the emergent flux implies a brightness temperature above
    /// every temperature in the profile. A converged solve in this state
    /// usually means the pressure grid is too shallow to carry the
    /// configured effective temperature.
    pub fn brightness_temperature_exceeds_profile(&self) -> bool {
        self.brightness_temperature_k() > self.profile.max_temperature()
    }
}

/// Halve the damping when the update direction alternates, recover slowly
/// while it stays steady.
fn update_damping(damping: &mut FloatValue, previous_sign: &mut i8, sign: i8, initial: FloatValue) {
    let floor = initial / 64.0;
    if sign != 0 && *previous_sign == -sign {
        *damping = (*damping * 0.5).max(floor);
    } else if sign != 0 {
        *damping = (*damping * 1.1).min(initial);
    }
    *previous_sign = sign;
}

/// Watches the flux imbalance for sustained monotone growth.
///
/// The monitor only arms once the imbalance has decreased at least once:
/// warming a cold initial guess toward equilibrium legitimately grows the
/// imbalance for many iterations, and must not be mistaken for divergence.
/// A run that never makes progress is bounded by `max_iterations` instead.
#[derive(Debug)]
struct DivergenceMonitor {
    window: usize,
    armed: bool,
    recent: Vec<FloatValue>,
}

impl DivergenceMonitor {
    fn new(window: usize) -> Self {
        Self {
            window,
            armed: false,
            recent: Vec::new(),
        }
    }

    /// Record one iteration's imbalance. True when the imbalance has grown
    /// strictly for a full window of iterations after first decreasing.
    fn observe(&mut self, imbalance: FloatValue) -> bool {
        if let Some(previous) = self.recent.last() {
            if imbalance < *previous {
                self.armed = true;
            }
        }
        self.recent.push(imbalance);
        if self.recent.len() > self.window {
            self.recent.remove(0);
        }
        self.armed
            && self.recent.len() == self.window
            && self.recent.windows(2).all(|w| w[1] > w[0])
    }
}

pub struct EquilibriumSolver {
    config: SolverConfig,
    grid: WavelengthGrid,
    flux_solver: RadiativeFluxSolver,
    cancellation: CancellationToken,
    pool: Option<rayon::ThreadPool>,
}

impl EquilibriumSolver {
    /// Build a solver for one run. The config is validated here, before any
    /// iteration can execute; a rejected config never partially runs.
    pub fn new(config: SolverConfig, grid: WavelengthGrid) -> RceResult<Self> {
        config.validate()?;
        let pool = match config.workers {
            Some(workers) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| RceError::Error(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            config,
            grid,
            flux_solver: RadiativeFluxSolver::default(),
            cancellation: CancellationToken::new(),
            pool,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve from the configured initial guess.
    pub fn solve(
        &self,
        opacity: &dyn OpacityProvider,
        chemistry: &dyn ChemistryEngine,
    ) -> RceResult<ConvergenceResult> {
        let profile = self.config.initial_profile()?;
        let zones = self.config.initial_zones()?;
        self.solve_from(profile, zones, opacity, chemistry)
    }

    /// Solve from an explicit initial profile and zone map.
    pub fn solve_from(
        &self,
        initial_profile: Profile,
        initial_zones: ConvectiveZoneMap,
        opacity: &dyn OpacityProvider,
        chemistry: &dyn ChemistryEngine,
    ) -> RceResult<ConvergenceResult> {
        if initial_profile.nlevel() != self.config.nlevel {
            return Err(RceError::ProfileLengthMismatch {
                expected: self.config.nlevel,
                actual: initial_profile.nlevel(),
            });
        }
        initial_zones.validate(self.config.nlevel)?;
        if initial_zones.max_zones() > self.config.nofczns {
            return Err(RceError::Configuration(format!(
                "zone map allows {} zones but nofczns is {}",
                initial_zones.max_zones(),
                self.config.nofczns
            )));
        }

        let bc = BoundaryConditions::from_config(&self.config);
        let adjuster = ConvectiveAdjuster::new(self.config.zone_growth_limit);
        let mut store =
            ProfileStore::new(initial_profile, initial_zones, self.config.track_history);

        let n = self.config.nlevel;
        let mut damping = vec![self.config.damping_initial; n];
        let mut previous_sign = vec![0i8; n];
        let mut converged_streak = 0usize;
        let mut divergence = DivergenceMonitor::new(self.config.divergence_window);
        let mut toa_flux_up = 0.0;
        let mut iterations = 0;

        let mut state = SolverState::Initialized;
        log::info!(
            "starting solve: Teff={} K, g={} m/s2, {} levels, {} to {} bar",
            self.config.effective_temperature_k,
            self.config.gravity_m_s2,
            n,
            self.config.pressure_min_bar,
            self.config.pressure_max_bar
        );
        log::debug!("solver state: {:?} -> {:?}", state, SolverState::Iterating);
        state = SolverState::Iterating;

        for iteration in 0..self.config.max_iterations {
            if self.cancellation.is_cancelled() {
                log::info!("solve cancelled at iteration {}", iteration);
                state = SolverState::Cancelled;
                break;
            }
            iterations = iteration + 1;

            // Fork per-level chemistry/opacity lookups, join for the flux
            // solve. Only the current profile is ever queried.
            let (compositions, opacities) =
                self.refresh_levels(store.profile(), opacity, chemistry, iteration)?;

            let flux = self.flux_solver.compute_heating(
                store.profile(),
                store.zones(),
                &opacities,
                &self.grid,
                &bc,
            )?;
            toa_flux_up = flux.toa_flux_up();
            let imbalance = flux.flux_imbalance(store.zones());

            let previous_profile = store.profile().clone();
            let candidate_temperature =
                self.relaxation_step(&previous_profile, &flux, &bc, &mut damping, &mut previous_sign);

            let mut candidate = previous_profile.clone();
            candidate.set_temperature(candidate_temperature)?;
            if !candidate.temperatures_within(self.config.temperature_ceiling_k) {
                log::warn!(
                    "temperature left the physical bounds at iteration {}; keeping the last valid profile",
                    iteration
                );
                state = SolverState::Diverged;
                break;
            }

            let adjusted = adjuster.adjust(&candidate, store.zones(), &compositions)?;
            if adjusted.purely_radiative && !store.zones().is_empty() {
                log::debug!(
                    "no unstable levels remain at iteration {}; run is purely radiative",
                    iteration
                );
            }
            store.update(adjusted.profile, adjusted.zones);

            let max_delta_t = store.profile().max_delta_temperature(&previous_profile);
            store.record(iteration, max_delta_t, imbalance);
            log::debug!(
                "iteration {}: max dT={:.3} K, flux imbalance={:.3e}, zones={}",
                iteration,
                max_delta_t,
                imbalance,
                store.zones().count()
            );

            if divergence.observe(imbalance) {
                log::warn!(
                    "flux imbalance grew for {} consecutive iterations",
                    self.config.divergence_window
                );
                state = SolverState::Diverged;
                break;
            }

            if max_delta_t < self.config.tol_delta_t_k && imbalance < self.config.tol_flux {
                converged_streak += 1;
            } else {
                converged_streak = 0;
            }
            if converged_streak >= self.config.consecutive_converged {
                state = SolverState::Converged;
                break;
            }
        }

        if state == SolverState::Iterating {
            state = SolverState::MaxIterExceeded;
        }

        let outcome = match state {
            SolverState::Converged => SolverOutcome::Converged,
            SolverState::Diverged => SolverOutcome::Diverged,
            SolverState::Cancelled => SolverOutcome::Cancelled,
            _ => SolverOutcome::MaxIterExceeded,
        };
        log::info!("solve finished after {} iterations: {:?}", iterations, outcome);

        let (profile, zones, history) = store.into_parts();
        Ok(ConvergenceResult {
            profile,
            zones,
            outcome,
            iterations,
            toa_flux_up_w_m2: toa_flux_up,
            history,
        })
    }

    /// Per-level chemistry and opacity refresh, parallel across levels.
    ///
    /// When `lookup_timeout_s` is set the wall clock is checked after every
    /// provider call; a synchronous call cannot be preempted mid-flight, so
    /// an overrun is detected on return and fails the solve without retry.
    fn refresh_levels(
        &self,
        profile: &Profile,
        opacity: &dyn OpacityProvider,
        chemistry: &dyn ChemistryEngine,
        iteration: usize,
    ) -> RceResult<(Vec<Composition>, Vec<OpacitySpectrum>)> {
        let pressure = profile.pressure();
        let temperature = profile.temperature();
        let grid = &self.grid;

        let timeout = self.config.lookup_timeout_s;
        let overran = move |started: Instant| -> Option<LookupError> {
            let limit_s = timeout?;
            (started.elapsed().as_secs_f64() > limit_s)
                .then_some(LookupError::Timeout { limit_s })
        };

        let lookup = |i: usize| -> Result<
            (Composition, OpacitySpectrum),
            (usize, &'static str, LookupError),
        > {
            let started = Instant::now();
            let composition = chemistry
                .equilibrium(pressure[i], temperature[i])
                .map_err(|e| (i, "chemistry", e))?;
            if let Some(timed_out) = overran(started) {
                return Err((i, "chemistry", timed_out));
            }
            let started = Instant::now();
            let spectrum = opacity
                .lookup(pressure[i], temperature[i], &composition, grid)
                .map_err(|e| (i, "opacity", e))?;
            if let Some(timed_out) = overran(started) {
                return Err((i, "opacity", timed_out));
            }
            Ok((composition, spectrum))
        };

        let results: Result<Vec<_>, _> = match &self.pool {
            Some(pool) => pool.install(|| (0..profile.nlevel()).into_par_iter().map(lookup).collect()),
            None => (0..profile.nlevel()).into_par_iter().map(lookup).collect(),
        };

        match results {
            Ok(pairs) => Ok(pairs.into_iter().unzip()),
            Err((level, provider, source)) => Err(RceError::Lookup {
                provider,
                level,
                iteration,
                source,
                last_profile: Box::new(profile.clone()),
            }),
        }
    }

    /// Damped Newton step on the per-level net-flux residual.
    ///
    /// The optical-depth factor conditions the step where the column is
    /// optically thick and the flux responds only weakly to a local
    /// temperature change. Steps are capped at 15% of the local temperature.
    fn relaxation_step(
        &self,
        profile: &Profile,
        flux: &FluxProfile,
        bc: &BoundaryConditions,
        damping: &mut [FloatValue],
        previous_sign: &mut [i8],
    ) -> Array1<FloatValue> {
        let target = bc.target_net_flux();
        let mut temperature = profile.temperature().clone();
        let n = temperature.len();
        for i in 0..n - 1 {
            let drive = target - flux.net_flux[i];
            let sign = if drive > 0.0 {
                1
            } else if drive < 0.0 {
                -1
            } else {
                0
            };
            update_damping(
                &mut damping[i],
                &mut previous_sign[i],
                sign,
                self.config.damping_initial,
            );

            let t = temperature[i];
            let conditioning = 1.0 + 1.5 * flux.column_tau[i];
            let step = damping[i] * drive
                / (4.0 * STEFAN_BOLTZMANN * t.powi(3) * conditioning);
            let cap = 0.15 * t;
            temperature[i] = t + step.clamp(-cap, cap);
        }

        // The bottom level carries the internal-flux boundary condition and
        // its own residual is pinned at zero, so it cannot be driven by the
        // Newton step. Extend it along the local gradient instead.
        let pressure = profile.pressure();
        let gradient = if n >= 3 {
            let dlnt = (temperature[n - 2] / temperature[n - 3]).ln();
            let dlnp = (pressure[n - 2] / pressure[n - 3]).ln();
            (dlnt / dlnp).clamp(0.0, 0.5)
        } else {
            0.0
        };
        temperature[n - 1] =
            temperature[n - 2] * (pressure[n - 1] / pressure[n - 2]).powf(gradient);

        temperature
    }
}
