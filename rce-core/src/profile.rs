//! Atmospheric pressure/temperature profile.
//!
//! A [`Profile`] is the working state of a solve: one pressure and one
//! temperature value per level, indexed 0..nlevel from the top of the
//! atmosphere down to the deepest level. Pressures are in bar, temperatures
//! in Kelvin. Pressure must be strictly increasing with index and the level
//! count is fixed for the lifetime of a solve.

use crate::errors::{RceError, RceResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Value type used throughout the solver.
pub type FloatValue = f64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pressure: Array1<FloatValue>,
    temperature: Array1<FloatValue>,
}

impl Profile {
    /// Create a profile from pressure (bar) and temperature (K) arrays.
    ///
    /// Fails if the arrays differ in length, the pressure grid is not
    /// strictly increasing, or any value is non-positive.
    pub fn new(pressure: Array1<FloatValue>, temperature: Array1<FloatValue>) -> RceResult<Self> {
        if pressure.len() != temperature.len() {
            return Err(RceError::Configuration(format!(
                "pressure has {} levels but temperature has {}",
                pressure.len(),
                temperature.len()
            )));
        }
        if pressure.len() < 2 {
            return Err(RceError::Configuration(
                "profile needs at least two levels".to_string(),
            ));
        }
        for window in pressure.windows(2) {
            if window[0] <= 0.0 || window[1] <= window[0] {
                return Err(RceError::Configuration(
                    "pressure grid must be positive and strictly increasing".to_string(),
                ));
            }
        }
        if temperature.iter().any(|t| !(*t > 0.0)) {
            return Err(RceError::Configuration(
                "temperatures must be positive and finite".to_string(),
            ));
        }
        Ok(Self {
            pressure,
            temperature,
        })
    }

    /// Build a log-spaced pressure grid between `p_min` and `p_max` (bar).
    pub fn log_pressure_grid(
        p_min: FloatValue,
        p_max: FloatValue,
        nlevel: usize,
    ) -> RceResult<Array1<FloatValue>> {
        if !(p_min > 0.0) || !(p_max > p_min) {
            return Err(RceError::Configuration(format!(
                "invalid pressure range [{}, {}] bar",
                p_min, p_max
            )));
        }
        if nlevel < 2 {
            return Err(RceError::Configuration(
                "pressure grid needs at least two levels".to_string(),
            ));
        }
        let ln_min = p_min.ln();
        let step = (p_max.ln() - ln_min) / (nlevel - 1) as FloatValue;
        Ok(Array1::from_iter(
            (0..nlevel).map(|i| (ln_min + step * i as FloatValue).exp()),
        ))
    }

    pub fn nlevel(&self) -> usize {
        self.pressure.len()
    }

    pub fn pressure(&self) -> &Array1<FloatValue> {
        &self.pressure
    }

    pub fn temperature(&self) -> &Array1<FloatValue> {
        &self.temperature
    }

    /// Natural log of the pressure grid, used for gradient calculations.
    pub fn log_pressure(&self) -> Array1<FloatValue> {
        self.pressure.mapv(FloatValue::ln)
    }

    /// Replace the temperature array, keeping the pressure grid.
    ///
    /// The caller is responsible for having bounds-checked the new values;
    /// only the length is verified here.
    pub fn set_temperature(&mut self, temperature: Array1<FloatValue>) -> RceResult<()> {
        if temperature.len() != self.temperature.len() {
            return Err(RceError::ProfileLengthMismatch {
                expected: self.temperature.len(),
                actual: temperature.len(),
            });
        }
        self.temperature = temperature;
        Ok(())
    }

    pub fn max_temperature(&self) -> FloatValue {
        self.temperature.iter().cloned().fold(0.0, FloatValue::max)
    }

    /// Largest absolute per-level temperature difference against `other`.
    ///
    /// Both profiles must share the same grid; this is only called between
    /// successive iterations of one solve.
    pub fn max_delta_temperature(&self, other: &Profile) -> FloatValue {
        self.temperature
            .iter()
            .zip(other.temperature.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, FloatValue::max)
    }

    /// True when every temperature lies in `(0, ceiling]`.
    pub fn temperatures_within(&self, ceiling: FloatValue) -> bool {
        self.temperature.iter().all(|t| *t > 0.0 && *t <= ceiling)
    }

    /// Local temperature gradient d ln T / d ln P at the interface between
    /// levels `i` and `i + 1`.
    pub fn lapse(&self, i: usize) -> FloatValue {
        let dlnt = (self.temperature[i + 1] / self.temperature[i]).ln();
        let dlnp = (self.pressure[i + 1] / self.pressure[i]).ln();
        dlnt / dlnp
    }
}
