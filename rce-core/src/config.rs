//! Per-run solver configuration.
//!
//! [`SolverConfig`] captures everything a single solve needs: the physical
//! setup (effective temperature, gravity, irradiation), the pressure grid,
//! the initial convective-zone guess, and the numerical policy (tolerances,
//! damping, iteration budget). A config is immutable once a solve starts;
//! re-runs with different parameters build a fresh config.
//!
//! Configs serialize cleanly to TOML so that runs can be described in files
//! and round-tripped alongside their diagnostics.

use crate::errors::{RceError, RceResult};
use crate::profile::{FloatValue, Profile};
use crate::zones::ConvectiveZoneMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Initial temperature guess: one value broadcast to every level, or a
/// full per-level array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemperatureGuess {
    Scalar(FloatValue),
    PerLevel(Vec<FloatValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Effective temperature (K), the blackbody temperature of the total
    /// emitted flux.
    pub effective_temperature_k: FloatValue,
    /// Equilibrium temperature (K) of the incident irradiation. Zero for an
    /// isolated object.
    pub irradiation_temperature_k: FloatValue,
    /// Irradiation weighting in `[0, 1]`: 0 gates irradiation off entirely,
    /// 0.5 is the hemispheric average, 1 is full day-side heating.
    pub rfacv: FloatValue,
    /// Surface gravity (m/s^2).
    pub gravity_m_s2: FloatValue,
    /// Number of pressure levels; 51 to 91 is the recommended range.
    pub nlevel: usize,
    pub pressure_min_bar: FloatValue,
    pub pressure_max_bar: FloatValue,
    pub initial_temperature_guess: TemperatureGuess,
    /// Maximum number of convective zones (0 forces a purely radiative run).
    pub nofczns: usize,
    /// Top level of the initial convective-zone guess.
    pub nstr_upper: usize,
    /// Bottom level of the initial convective-zone guess.
    pub nstr_deep: usize,
    pub max_iterations: usize,
    /// Per-level temperature change (K) below which an iteration counts as
    /// converged.
    pub tol_delta_t_k: FloatValue,
    /// Relative net-flux deviation from the target flux below which an
    /// iteration counts as converged.
    pub tol_flux: FloatValue,
    /// Consecutive converged iterations required before terminating, to
    /// avoid declaring success on a single lucky step.
    pub consecutive_converged: usize,
    /// Initial per-level damping factor for the temperature update.
    pub damping_initial: FloatValue,
    /// Most levels a zone boundary may move per iteration.
    pub zone_growth_limit: usize,
    /// Flux imbalance growing monotonically for this many iterations is
    /// treated as divergence.
    pub divergence_window: usize,
    /// Temperatures above this (K) mark the solve as diverged.
    pub temperature_ceiling_k: FloatValue,
    /// Retain per-iteration snapshots for convergence history/animation.
    pub track_history: bool,
    /// Worker threads for the per-level lookup phase; `None` uses the
    /// global pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Wall-clock limit (seconds) on each opacity/chemistry lookup, checked
    /// by the solver after every provider call; an overrunning lookup fails
    /// the solve without retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_timeout_s: Option<FloatValue>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            effective_temperature_k: 1000.0,
            irradiation_temperature_k: 0.0,
            rfacv: 0.0,
            gravity_m_s2: 1000.0,
            nlevel: 91,
            pressure_min_bar: 1e-4,
            pressure_max_bar: 500.0,
            initial_temperature_guess: TemperatureGuess::Scalar(1000.0),
            nofczns: 1,
            nstr_upper: 81,
            nstr_deep: 90,
            max_iterations: 2000,
            tol_delta_t_k: 0.05,
            tol_flux: 1e-3,
            consecutive_converged: 3,
            damping_initial: 0.5,
            zone_growth_limit: 2,
            divergence_window: 8,
            temperature_ceiling_k: 30_000.0,
            track_history: false,
            workers: None,
            lookup_timeout_s: None,
        }
    }
}

impl SolverConfig {
    pub fn with_effective_temperature(mut self, teff_k: FloatValue) -> Self {
        self.effective_temperature_k = teff_k;
        self
    }

    pub fn with_irradiation(mut self, teq_k: FloatValue, rfacv: FloatValue) -> Self {
        self.irradiation_temperature_k = teq_k;
        self.rfacv = rfacv;
        self
    }

    pub fn with_gravity(mut self, gravity_m_s2: FloatValue) -> Self {
        self.gravity_m_s2 = gravity_m_s2;
        self
    }

    pub fn with_pressure_grid(
        mut self,
        p_min_bar: FloatValue,
        p_max_bar: FloatValue,
        nlevel: usize,
    ) -> Self {
        self.pressure_min_bar = p_min_bar;
        self.pressure_max_bar = p_max_bar;
        self.nlevel = nlevel;
        self
    }

    pub fn with_temperature_guess(mut self, guess: TemperatureGuess) -> Self {
        self.initial_temperature_guess = guess;
        self
    }

    /// Set the initial convective-zone guess (`nofczns` zones at most, with
    /// the first spanning `nstr_upper..=nstr_deep`).
    pub fn with_convective_guess(
        mut self,
        nofczns: usize,
        nstr_upper: usize,
        nstr_deep: usize,
    ) -> Self {
        self.nofczns = nofczns;
        self.nstr_upper = nstr_upper;
        self.nstr_deep = nstr_deep;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, tol_delta_t_k: FloatValue, tol_flux: FloatValue) -> Self {
        self.tol_delta_t_k = tol_delta_t_k;
        self.tol_flux = tol_flux;
        self
    }

    pub fn with_history(mut self, track_history: bool) -> Self {
        self.track_history = track_history;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_lookup_timeout(mut self, limit_s: FloatValue) -> Self {
        self.lookup_timeout_s = Some(limit_s);
        self
    }

    /// Load a config from TOML text.
    pub fn from_toml(text: &str) -> RceResult<Self> {
        toml::from_str(text).map_err(|e| RceError::Configuration(e.to_string()))
    }

    /// Fail-fast validation of every precondition, run before any iteration.
    pub fn validate(&self) -> RceResult<()> {
        if !(self.effective_temperature_k > 0.0) {
            return Err(RceError::Configuration(
                "effective temperature must be positive".to_string(),
            ));
        }
        if !(self.gravity_m_s2 > 0.0) {
            return Err(RceError::Configuration(
                "gravity must be positive".to_string(),
            ));
        }
        if !(self.irradiation_temperature_k >= 0.0) {
            return Err(RceError::Configuration(
                "irradiation temperature must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rfacv) {
            return Err(RceError::Configuration(format!(
                "rfacv={} outside [0, 1]",
                self.rfacv
            )));
        }
        if self.nlevel < 2 {
            return Err(RceError::Configuration(
                "nlevel must be at least 2".to_string(),
            ));
        }
        if !(self.pressure_min_bar > 0.0) || !(self.pressure_max_bar > self.pressure_min_bar) {
            return Err(RceError::Configuration(format!(
                "invalid pressure range [{}, {}] bar",
                self.pressure_min_bar, self.pressure_max_bar
            )));
        }
        match &self.initial_temperature_guess {
            TemperatureGuess::Scalar(t) => {
                if !(*t > 0.0) {
                    return Err(RceError::Configuration(format!(
                        "initial temperature guess {} must be positive",
                        t
                    )));
                }
            }
            TemperatureGuess::PerLevel(values) => {
                if values.len() != self.nlevel {
                    return Err(RceError::ProfileLengthMismatch {
                        expected: self.nlevel,
                        actual: values.len(),
                    });
                }
                if values.iter().any(|t| !(*t > 0.0)) {
                    return Err(RceError::Configuration(
                        "initial temperature guess must be positive at every level".to_string(),
                    ));
                }
            }
        }
        if self.nofczns > 0 && (self.nstr_upper > self.nstr_deep || self.nstr_deep >= self.nlevel) {
            return Err(RceError::Configuration(format!(
                "convective zone guess [{}, {}] outside level range 0..{}",
                self.nstr_upper, self.nstr_deep, self.nlevel
            )));
        }
        if self.max_iterations == 0 {
            return Err(RceError::Configuration(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.tol_delta_t_k > 0.0) || !(self.tol_flux > 0.0) {
            return Err(RceError::Configuration(
                "convergence tolerances must be positive".to_string(),
            ));
        }
        if self.consecutive_converged == 0 {
            return Err(RceError::Configuration(
                "consecutive_converged must be at least 1".to_string(),
            ));
        }
        if !(self.damping_initial > 0.0 && self.damping_initial <= 1.0) {
            return Err(RceError::Configuration(format!(
                "damping_initial={} outside (0, 1]",
                self.damping_initial
            )));
        }
        if self.divergence_window < 2 {
            return Err(RceError::Configuration(
                "divergence_window must be at least 2".to_string(),
            ));
        }
        if let Some(limit_s) = self.lookup_timeout_s {
            if !(limit_s > 0.0) {
                return Err(RceError::Configuration(format!(
                    "lookup timeout {} s must be positive",
                    limit_s
                )));
            }
        }
        if !(self.temperature_ceiling_k > self.effective_temperature_k) {
            return Err(RceError::Configuration(
                "temperature ceiling must exceed the effective temperature".to_string(),
            ));
        }
        Ok(())
    }

    /// Internal temperature (K) implied by `T_eff^4 = T_int^4 + T_eq^4`.
    ///
    /// Irradiation only contributes when `rfacv > 0`; with the weighting
    /// gated off the internal temperature is the effective temperature,
    /// whatever the configured irradiation temperature.
    pub fn internal_temperature_k(&self) -> FloatValue {
        if self.rfacv > 0.0 && self.irradiation_temperature_k > 0.0 {
            let tint4 = self.effective_temperature_k.powi(4)
                - self.irradiation_temperature_k.powi(4);
            tint4.max(0.0).powf(0.25)
        } else {
            self.effective_temperature_k
        }
    }

    /// Build the initial profile on the configured log-pressure grid.
    pub fn initial_profile(&self) -> RceResult<Profile> {
        let pressure =
            Profile::log_pressure_grid(self.pressure_min_bar, self.pressure_max_bar, self.nlevel)?;
        let temperature = match &self.initial_temperature_guess {
            TemperatureGuess::Scalar(t) => Array1::from_elem(self.nlevel, *t),
            TemperatureGuess::PerLevel(values) => Array1::from_vec(values.clone()),
        };
        Profile::new(pressure, temperature)
    }

    /// Build the initial convective-zone map from the `nstr` guess.
    pub fn initial_zones(&self) -> RceResult<ConvectiveZoneMap> {
        if self.nofczns == 0 {
            return Ok(ConvectiveZoneMap::empty(0));
        }
        ConvectiveZoneMap::from_guess(self.nstr_upper, self.nstr_deep, self.nofczns, self.nlevel)
    }
}
