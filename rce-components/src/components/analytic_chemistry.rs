//! Analytic equilibrium chemistry.
//!
//! A closed-form stand-in for a full equilibrium solver, good enough for
//! H2/He-dominated atmospheres: fixed H2/He fractions, water scaled by
//! metallicity, and the carbon budget partitioned between CO and CH4 with
//! a smooth crossover in temperature (CO dominates hot, CH4 cold). The
//! adiabatic gradient starts at the ideal diatomic value 2/7 and eases off
//! as H2 dissociation becomes significant.

use rce_core::profile::FloatValue;
use rce_core::provider::{ChemistryEngine, Composition, LookupError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const NABLA_DIATOMIC: FloatValue = 2.0 / 7.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticChemistryParameters {
    /// Metallicity relative to solar (linear, 1.0 = solar).
    pub metallicity: FloatValue,
    /// Carbon-to-oxygen ratio relative to solar.
    pub c_to_o: FloatValue,
    /// Temperature (K) at which CO and CH4 carry equal carbon.
    pub co_ch4_crossover_k: FloatValue,
    /// Width (K) of the CO/CH4 crossover.
    pub crossover_width_k: FloatValue,
    /// Valid pressure range (bar); lookups outside it fail.
    pub pressure_range_bar: (FloatValue, FloatValue),
}

impl Default for AnalyticChemistryParameters {
    fn default() -> Self {
        Self {
            metallicity: 1.0,
            c_to_o: 1.0,
            co_ch4_crossover_k: 1100.0,
            crossover_width_k: 150.0,
            pressure_range_bar: (1e-8, 1e4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticChemistry {
    parameters: AnalyticChemistryParameters,
}

impl AnalyticChemistry {
    pub fn from_parameters(parameters: AnalyticChemistryParameters) -> Self {
        Self { parameters }
    }

    pub fn solar() -> Self {
        Self::from_parameters(AnalyticChemistryParameters::default())
    }

    /// Fraction of the carbon budget carried by CO at `temperature_k`.
    pub fn co_fraction(&self, temperature_k: FloatValue) -> FloatValue {
        let p = &self.parameters;
        0.5 * (1.0 + ((temperature_k - p.co_ch4_crossover_k) / p.crossover_width_k).tanh())
    }

    /// Adiabatic gradient for the local state.
    ///
    /// Ideal diatomic 2/7 below ~2000 K, relaxing smoothly as rotational
    /// and dissociation degrees of freedom unfreeze at higher temperature.
    pub fn adiabatic_gradient(&self, temperature_k: FloatValue) -> FloatValue {
        NABLA_DIATOMIC - 0.02 * ((temperature_k - 2000.0) / 1000.0).tanh().max(0.0)
    }
}

impl ChemistryEngine for AnalyticChemistry {
    fn equilibrium(
        &self,
        pressure_bar: FloatValue,
        temperature_k: FloatValue,
    ) -> Result<Composition, LookupError> {
        let (p_min, p_max) = self.parameters.pressure_range_bar;
        if pressure_bar < p_min || pressure_bar > p_max {
            return Err(LookupError::OutOfRange {
                quantity: "pressure".to_string(),
                value: pressure_bar,
                min: p_min,
                max: p_max,
            });
        }
        let z = self.parameters.metallicity;
        let carbon_total = 5e-4 * z * self.parameters.c_to_o;
        let co = carbon_total * self.co_fraction(temperature_k);
        let ch4 = carbon_total - co;
        let h2o = 1e-3 * z;

        let abundances = HashMap::from([
            ("H2".to_string(), 0.85),
            ("He".to_string(), 0.15 - h2o - carbon_total),
            ("H2O".to_string(), h2o),
            ("CO".to_string(), co),
            ("CH4".to_string(), ch4),
        ]);
        // Heavy species barely move the mean weight at these abundances.
        let mean_molecular_weight = 2.3 + 0.1 * (z - 1.0).max(0.0);

        Ok(Composition {
            abundances,
            mean_molecular_weight,
            adiabatic_gradient: self.adiabatic_gradient(temperature_k),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn carbon_is_conserved_across_the_crossover() {
        let chemistry = AnalyticChemistry::solar();
        for temperature in [500.0, 1100.0, 2000.0] {
            let composition = chemistry.equilibrium(1.0, temperature).unwrap();
            let total = composition.mixing_ratio("CO") + composition.mixing_ratio("CH4");
            assert_relative_eq!(total, 5e-4, max_relative = 1e-12);
        }
    }

    #[test]
    fn co_dominates_hot_and_ch4_cold() {
        let chemistry = AnalyticChemistry::solar();
        let cold = chemistry.equilibrium(1.0, 600.0).unwrap();
        assert!(cold.mixing_ratio("CH4") > cold.mixing_ratio("CO"));
        let hot = chemistry.equilibrium(1.0, 1800.0).unwrap();
        assert!(hot.mixing_ratio("CO") > hot.mixing_ratio("CH4"));
    }

    #[test]
    fn adiabatic_gradient_is_diatomic_when_cool() {
        let chemistry = AnalyticChemistry::solar();
        assert_relative_eq!(chemistry.adiabatic_gradient(800.0), 2.0 / 7.0);
        assert!(chemistry.adiabatic_gradient(3500.0) < 2.0 / 7.0);
    }

    #[test]
    fn out_of_range_pressure_fails() {
        let chemistry = AnalyticChemistry::solar();
        assert!(matches!(
            chemistry.equilibrium(1e6, 1000.0),
            Err(LookupError::OutOfRange { .. })
        ));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let chemistry = AnalyticChemistry::solar();
        let a = chemistry.equilibrium(0.5, 950.0).unwrap();
        let b = chemistry.equilibrium(0.5, 950.0).unwrap();
        assert_eq!(a, b);
    }
}
