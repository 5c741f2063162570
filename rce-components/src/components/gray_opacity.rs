//! Gray / power-law opacity provider.
//!
//! Absorption follows a single power law in pressure and temperature:
//!
//! $$ \kappa(P, T) = \kappa_0 \left(\frac{P}{P_{ref}}\right)^a
//!    \left(\frac{T}{T_{ref}}\right)^b $$
//!
//! With `pressure_exponent = 0` the optical depth grows linearly with
//! pressure and a deep column stays radiative; with `pressure_exponent = 1`
//! (a crude stand-in for pressure-broadened collision-induced absorption)
//! the radiative gradient steepens past the adiabat at depth and a
//! convective zone develops.

use rce_core::profile::FloatValue;
use rce_core::provider::{
    Composition, LookupError, OpacityProvider, OpacitySpectrum, WavelengthGrid,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrayOpacityParameters {
    /// Reference absorption coefficient (m^2/kg).
    pub kappa_m2_kg: FloatValue,
    pub reference_pressure_bar: FloatValue,
    pub reference_temperature_k: FloatValue,
    pub pressure_exponent: FloatValue,
    pub temperature_exponent: FloatValue,
    /// Optional per-bin multipliers on the base coefficient; length must
    /// match the wavelength grid when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_multipliers: Option<Vec<FloatValue>>,
    /// Valid temperature range; lookups outside it fail like a table miss.
    pub temperature_range_k: (FloatValue, FloatValue),
}

impl Default for GrayOpacityParameters {
    fn default() -> Self {
        Self {
            kappa_m2_kg: 1e-4,
            reference_pressure_bar: 1.0,
            reference_temperature_k: 1000.0,
            pressure_exponent: 0.0,
            temperature_exponent: 0.0,
            bin_multipliers: None,
            temperature_range_k: (10.0, 30_000.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrayOpacity {
    parameters: GrayOpacityParameters,
}

impl GrayOpacity {
    pub fn from_parameters(parameters: GrayOpacityParameters) -> Self {
        Self { parameters }
    }

    /// Constant gray opacity, independent of pressure and temperature.
    pub fn constant(kappa_m2_kg: FloatValue) -> Self {
        Self::from_parameters(GrayOpacityParameters {
            kappa_m2_kg,
            ..GrayOpacityParameters::default()
        })
    }

    /// Base coefficient before any per-bin contrast.
    pub fn coefficient(&self, pressure_bar: FloatValue, temperature_k: FloatValue) -> FloatValue {
        let p = &self.parameters;
        p.kappa_m2_kg
            * (pressure_bar / p.reference_pressure_bar).powf(p.pressure_exponent)
            * (temperature_k / p.reference_temperature_k).powf(p.temperature_exponent)
    }
}

impl OpacityProvider for GrayOpacity {
    fn lookup(
        &self,
        pressure_bar: FloatValue,
        temperature_k: FloatValue,
        _composition: &Composition,
        grid: &WavelengthGrid,
    ) -> Result<OpacitySpectrum, LookupError> {
        let (t_min, t_max) = self.parameters.temperature_range_k;
        if temperature_k < t_min || temperature_k > t_max {
            return Err(LookupError::OutOfRange {
                quantity: "temperature".to_string(),
                value: temperature_k,
                min: t_min,
                max: t_max,
            });
        }
        let base = self.coefficient(pressure_bar, temperature_k);
        match &self.parameters.bin_multipliers {
            Some(multipliers) => {
                if multipliers.len() != grid.n_bins() {
                    return Err(LookupError::Failed(format!(
                        "{} bin multipliers for a {}-bin grid",
                        multipliers.len(),
                        grid.n_bins()
                    )));
                }
                Ok(multipliers.iter().map(|m| base * m).collect())
            }
            None => Ok(vec![base; grid.n_bins()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use std::collections::HashMap;

    fn composition() -> Composition {
        Composition {
            abundances: HashMap::new(),
            mean_molecular_weight: 2.3,
            adiabatic_gradient: 2.0 / 7.0,
        }
    }

    #[test]
    fn constant_opacity_fills_every_bin() {
        let provider = GrayOpacity::constant(1e-3);
        let grid = WavelengthGrid::new(vec![0.5, 2.0, 30.0]).unwrap();
        let spectrum = provider.lookup(1.0, 1000.0, &composition(), &grid).unwrap();
        assert_eq!(spectrum, vec![1e-3, 1e-3]);
    }

    #[test]
    fn pressure_power_law_scales_with_pressure() {
        let provider = GrayOpacity::from_parameters(GrayOpacityParameters {
            kappa_m2_kg: 1e-3,
            pressure_exponent: 1.0,
            ..GrayOpacityParameters::default()
        });
        assert!(is_close!(provider.coefficient(10.0, 1000.0), 1e-2));
        assert!(is_close!(provider.coefficient(0.1, 1000.0), 1e-4));
    }

    #[test]
    fn out_of_range_temperature_fails_the_lookup() {
        let provider = GrayOpacity::from_parameters(GrayOpacityParameters {
            temperature_range_k: (100.0, 4000.0),
            ..GrayOpacityParameters::default()
        });
        let grid = WavelengthGrid::gray();
        let result = provider.lookup(1.0, 5000.0, &composition(), &grid);
        assert!(matches!(result, Err(LookupError::OutOfRange { .. })));
    }

    #[test]
    fn bin_multiplier_length_is_checked() {
        let provider = GrayOpacity::from_parameters(GrayOpacityParameters {
            bin_multipliers: Some(vec![1.0, 2.0]),
            ..GrayOpacityParameters::default()
        });
        let grid = WavelengthGrid::gray();
        assert!(matches!(
            provider.lookup(1.0, 1000.0, &composition(), &grid),
            Err(LookupError::Failed(_))
        ));
    }
}
