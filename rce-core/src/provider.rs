//! External provider seams: opacity and chemistry.
//!
//! The solver treats both providers as deterministic, side-effect-free
//! functions of the current level state. Table interpolation, correlated-k
//! bookkeeping, and caching all live behind these traits and are invisible
//! to the iteration loop. Lookups are never retried: the inputs are
//! deterministic, so a failed call fails the solve.

use crate::profile::FloatValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Failure surfaced by an opacity or chemistry lookup.
///
/// The solver raises [`LookupError::Timeout`] itself when a call overruns
/// the configured wall-clock limit; providers that watch their own clocks
/// may also report it directly. Any of these becomes an immediate solve
/// failure carrying the iteration index and last profile.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("{quantity}={value} outside the tabulated range [{min}, {max}]")]
    OutOfRange {
        quantity: String,
        value: FloatValue,
        min: FloatValue,
        max: FloatValue,
    },
    #[error("lookup exceeded the {limit_s} s timeout")]
    Timeout { limit_s: FloatValue },
    #[error("{0}")]
    Failed(String),
}

/// Equilibrium composition at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    /// Volume mixing ratios keyed by species name.
    pub abundances: HashMap<String, FloatValue>,
    /// Mean molecular weight (amu).
    pub mean_molecular_weight: FloatValue,
    /// Adiabatic gradient d ln T / d ln P for this composition, used by the
    /// convective adjuster as the instability threshold.
    pub adiabatic_gradient: FloatValue,
}

impl Composition {
    pub fn mixing_ratio(&self, species: &str) -> FloatValue {
        self.abundances.get(species).copied().unwrap_or(0.0)
    }
}

/// Wavelength binning shared by the solver and the opacity provider.
///
/// Bin edges are in microns, strictly increasing; `n_bins()` coefficients
/// are expected from each opacity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavelengthGrid {
    edges_um: Vec<FloatValue>,
}

impl WavelengthGrid {
    pub fn new(edges_um: Vec<FloatValue>) -> Result<Self, LookupError> {
        if edges_um.len() < 2 {
            return Err(LookupError::Failed(
                "wavelength grid needs at least two bin edges".to_string(),
            ));
        }
        if edges_um
            .windows(2)
            .any(|w| !(w[0] > 0.0) || !(w[1] > w[0]))
        {
            return Err(LookupError::Failed(
                "wavelength bin edges must be positive and strictly increasing".to_string(),
            ));
        }
        Ok(Self { edges_um })
    }

    /// A single bin spanning the thermal infrared, giving gray transfer.
    pub fn gray() -> Self {
        Self {
            edges_um: vec![0.3, 300.0],
        }
    }

    pub fn n_bins(&self) -> usize {
        self.edges_um.len() - 1
    }

    pub fn edges_um(&self) -> &[FloatValue] {
        &self.edges_um
    }

    /// Bin bounds `(lower, upper)` in microns.
    pub fn bin(&self, k: usize) -> (FloatValue, FloatValue) {
        (self.edges_um[k], self.edges_um[k + 1])
    }
}

/// Per-wavelength-bin absorption coefficients, m^2 per kg of atmosphere.
pub type OpacitySpectrum = Vec<FloatValue>;

/// Absorption/scattering coefficient source, e.g. interpolated
/// correlated-k tables.
pub trait OpacityProvider: Send + Sync {
    fn lookup(
        &self,
        pressure_bar: FloatValue,
        temperature_k: FloatValue,
        composition: &Composition,
        grid: &WavelengthGrid,
    ) -> Result<OpacitySpectrum, LookupError>;
}

/// Equilibrium chemistry source.
pub trait ChemistryEngine: Send + Sync {
    fn equilibrium(
        &self,
        pressure_bar: FloatValue,
        temperature_k: FloatValue,
    ) -> Result<Composition, LookupError>;
}
