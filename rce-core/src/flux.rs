//! Plane-parallel radiative flux solve.
//!
//! [`RadiativeFluxSolver::compute_heating`] is a pure function of the
//! profile, the per-level opacity spectra, and the boundary conditions. It
//! marches a two-stream solution down and back up through the layers, one
//! wavelength bin at a time, weighting each bin's thermal source by its
//! Planck fraction at the local temperature.
//!
//! Boundary conditions follow the standard substellar setup: the internal
//! flux $\sigma T_{int}^4$ enters at the bottom, and `rfacv`-weighted
//! irradiation $r \sigma T_{eq}^4$ enters at the top. In equilibrium the
//! net flux is $\sigma T_{int}^4$ at every level, so the per-level residual
//! against that target is both the convergence metric and the driver of the
//! temperature update.
//!
//! Layer optical depths are built from the hydrostatic column mass
//! $d\tau = D \, \kappa \, dP / g$ with a diffusivity factor $D$ folding the
//! angular integral into a single stream. Optical depth accumulates on the
//! log-spaced pressure grid, which keeps coarse (51 to 91 level) grids well
//! conditioned through the optically thick/thin transition.

use crate::config::SolverConfig;
use crate::errors::{RceError, RceResult};
use crate::profile::{FloatValue, Profile};
use crate::provider::{OpacitySpectrum, WavelengthGrid};
use crate::zones::ConvectiveZoneMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Stefan-Boltzmann constant (W m^-2 K^-4).
pub const STEFAN_BOLTZMANN: FloatValue = 5.670374419e-8;
/// Second radiation constant (um K).
pub const C2_UM_K: FloatValue = 14_387.77;
/// Pascals per bar.
pub const BAR_TO_PA: FloatValue = 1.0e5;
/// Two-stream diffusivity factor.
pub const DIFFUSIVITY: FloatValue = 1.66;

/// Fraction of blackbody power emitted below wavelength `lambda_um` at
/// temperature `temperature_k`.
///
/// Series expansion of the Planck integral,
/// $F(x) = \frac{15}{\pi^4} \sum_n e^{-nx} (x^3/n + 3x^2/n^2 + 6x/n^3 + 6/n^4)$
/// with $x = c_2 / (\lambda T)$. Converges in a handful of terms when the
/// bin sits blueward of the Planck peak and in a few hundred at worst.
pub fn planck_fraction_below(lambda_um: FloatValue, temperature_k: FloatValue) -> FloatValue {
    let x = C2_UM_K / (lambda_um * temperature_k);
    let norm = 15.0 / std::f64::consts::PI.powi(4);
    let mut sum = 0.0;
    for n in 1..=512u32 {
        let nf = n as FloatValue;
        let term = (-nf * x).exp()
            * (x.powi(3) / nf + 3.0 * x.powi(2) / (nf * nf) + 6.0 * x / nf.powi(3)
                + 6.0 / nf.powi(4));
        sum += term;
        if term < 1e-12 {
            break;
        }
    }
    (norm * sum).clamp(0.0, 1.0)
}

/// Planck fraction per bin at `temperature_k`, renormalized so the band set
/// carries the full blackbody integral (energy is conserved even when the
/// grid does not cover the whole spectrum).
pub fn planck_band_weights(grid: &WavelengthGrid, temperature_k: FloatValue) -> Vec<FloatValue> {
    let nb = grid.n_bins();
    let mut weights = Vec::with_capacity(nb);
    let mut total = 0.0;
    for k in 0..nb {
        let (lo, hi) = grid.bin(k);
        let w = (planck_fraction_below(hi, temperature_k)
            - planck_fraction_below(lo, temperature_k))
        .max(0.0);
        weights.push(w);
        total += w;
    }
    if total > 0.0 {
        for w in &mut weights {
            *w /= total;
        }
    } else {
        weights.fill(1.0 / nb as FloatValue);
    }
    weights
}

/// Blackbody temperature reproducing `flux_w_m2`, used as the consistency
/// diagnostic for shallow pressure grids.
pub fn brightness_temperature_k(flux_w_m2: FloatValue) -> FloatValue {
    (flux_w_m2.max(0.0) / STEFAN_BOLTZMANN).powf(0.25)
}

/// Flux boundary conditions derived once per solve from the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConditions {
    /// Internal flux entering from below, sigma T_int^4 (W/m^2).
    pub internal_flux_w_m2: FloatValue,
    /// rfacv-weighted irradiation entering from above (W/m^2).
    pub irradiation_flux_w_m2: FloatValue,
    /// Irradiation color temperature (K), used to distribute the incident
    /// flux over the wavelength bins. Zero when irradiation is gated off.
    pub irradiation_temperature_k: FloatValue,
    pub gravity_m_s2: FloatValue,
}

impl BoundaryConditions {
    pub fn from_config(config: &SolverConfig) -> Self {
        let tint = config.internal_temperature_k();
        let irradiated = config.rfacv > 0.0 && config.irradiation_temperature_k > 0.0;
        Self {
            internal_flux_w_m2: STEFAN_BOLTZMANN * tint.powi(4),
            irradiation_flux_w_m2: if irradiated {
                config.rfacv * STEFAN_BOLTZMANN * config.irradiation_temperature_k.powi(4)
            } else {
                0.0
            },
            irradiation_temperature_k: if irradiated {
                config.irradiation_temperature_k
            } else {
                0.0
            },
            gravity_m_s2: config.gravity_m_s2,
        }
    }

    /// The net flux every level must carry in equilibrium.
    pub fn target_net_flux(&self) -> FloatValue {
        self.internal_flux_w_m2
    }
}

/// Output of one flux solve.
#[derive(Debug, Clone)]
pub struct FluxProfile {
    pub flux_up: Array1<FloatValue>,
    pub flux_down: Array1<FloatValue>,
    pub net_flux: Array1<FloatValue>,
    /// Per-level deviation of the net flux from the equilibrium target.
    pub residual: Array1<FloatValue>,
    /// Flux-divergence heating rate per level (W/kg); positive heats.
    pub heating: Array1<FloatValue>,
    /// Band-weighted cumulative optical depth at each level, from the top.
    pub column_tau: Array1<FloatValue>,
    target_flux: FloatValue,
}

impl FluxProfile {
    pub fn toa_flux_up(&self) -> FloatValue {
        self.flux_up[0]
    }

    /// Largest relative residual over the radiative (non-convective)
    /// levels. Convective levels are excluded because their temperatures
    /// are set by the adjuster, not by radiative balance; the radiative
    /// residual there is a diagnostic, not an error to converge away.
    pub fn flux_imbalance(&self, zones: &ConvectiveZoneMap) -> FloatValue {
        let denominator = self.target_flux.max(1e-12);
        let mut worst = 0.0;
        let mut any_radiative = false;
        for (level, r) in self.residual.iter().enumerate() {
            if zones.level_is_convective(level) {
                continue;
            }
            any_radiative = true;
            worst = FloatValue::max(worst, r.abs() / denominator);
        }
        if !any_radiative {
            // Fully convective column: fall back to the top-of-atmosphere
            // residual, which convection cannot fix on its own.
            worst = self.residual[0].abs() / denominator;
        }
        worst
    }
}

/// Pure two-stream flux solver. Holds only numerical policy, no state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiativeFluxSolver {
    pub diffusivity: FloatValue,
}

impl Default for RadiativeFluxSolver {
    fn default() -> Self {
        Self {
            diffusivity: DIFFUSIVITY,
        }
    }
}

impl RadiativeFluxSolver {
    /// Compute up/down fluxes, the net-flux residual, and heating rates.
    ///
    /// `opacities` holds one spectrum per level, `grid.n_bins()` bins each.
    pub fn compute_heating(
        &self,
        profile: &Profile,
        zones: &ConvectiveZoneMap,
        opacities: &[OpacitySpectrum],
        grid: &WavelengthGrid,
        bc: &BoundaryConditions,
    ) -> RceResult<FluxProfile> {
        let n = profile.nlevel();
        let nb = grid.n_bins();
        if opacities.len() != n {
            return Err(RceError::Error(format!(
                "expected {} opacity spectra, got {}",
                n,
                opacities.len()
            )));
        }
        if let Some(bad) = opacities.iter().find(|s| s.len() != nb) {
            return Err(RceError::Error(format!(
                "opacity spectrum has {} bins, wavelength grid has {}",
                bad.len(),
                nb
            )));
        }
        zones.validate(n)?;

        let pressure = profile.pressure();
        let temperature = profile.temperature();

        // Layer quantities, one entry per interface between levels i and i+1.
        let mut dtau = vec![vec![0.0; nb]; n - 1];
        let mut source = vec![vec![0.0; nb]; n - 1];
        let mut dtau_mean = vec![0.0; n - 1];
        for i in 0..n - 1 {
            let dp_pa = (pressure[i + 1] - pressure[i]) * BAR_TO_PA;
            let t_mid = 0.5 * (temperature[i] + temperature[i + 1]);
            let weights = planck_band_weights(grid, t_mid);
            let emitted = STEFAN_BOLTZMANN * t_mid.powi(4);
            for k in 0..nb {
                let kappa = 0.5 * (opacities[i][k] + opacities[i + 1][k]);
                dtau[i][k] = self.diffusivity * kappa * dp_pa / bc.gravity_m_s2;
                source[i][k] = emitted * weights[k];
                dtau_mean[i] += weights[k] * dtau[i][k];
            }
        }

        // Downward march from the irradiation boundary.
        let mut fd = vec![vec![0.0; nb]; n];
        if bc.irradiation_flux_w_m2 > 0.0 {
            let weights = planck_band_weights(grid, bc.irradiation_temperature_k);
            for k in 0..nb {
                fd[0][k] = bc.irradiation_flux_w_m2 * weights[k];
            }
        }
        for i in 0..n - 1 {
            for k in 0..nb {
                let transmitted = (-dtau[i][k]).exp();
                fd[i + 1][k] = fd[i][k] * transmitted + source[i][k] * (1.0 - transmitted);
            }
        }

        // Upward march from the internal-flux boundary: the net flux into
        // the bottom level equals the internal flux.
        let mut fu = vec![vec![0.0; nb]; n];
        let bottom_weights = planck_band_weights(grid, temperature[n - 1]);
        for k in 0..nb {
            fu[n - 1][k] = fd[n - 1][k] + bc.internal_flux_w_m2 * bottom_weights[k];
        }
        for i in (0..n - 1).rev() {
            for k in 0..nb {
                let transmitted = (-dtau[i][k]).exp();
                fu[i][k] = fu[i + 1][k] * transmitted + source[i][k] * (1.0 - transmitted);
            }
        }

        let target = bc.target_net_flux();
        let flux_up = Array1::from_iter(fu.iter().map(|b| b.iter().sum::<FloatValue>()));
        let flux_down = Array1::from_iter(fd.iter().map(|b| b.iter().sum::<FloatValue>()));
        let net_flux = &flux_up - &flux_down;
        let residual = net_flux.mapv(|f| f - target);

        let mut heating = Array1::zeros(n);
        for i in 0..n - 1 {
            let dp_pa = (pressure[i + 1] - pressure[i]) * BAR_TO_PA;
            heating[i] = bc.gravity_m_s2 * (net_flux[i + 1] - net_flux[i]) / dp_pa;
        }
        if n > 1 {
            heating[n - 1] = heating[n - 2];
        }

        let mut column_tau = Array1::zeros(n);
        for i in 0..n - 1 {
            column_tau[i + 1] = column_tau[i] + dtau_mean[i];
        }

        Ok(FluxProfile {
            flux_up,
            flux_down,
            net_flux,
            residual,
            heating,
            column_tau,
            target_flux: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use is_close::is_close;
    use ndarray::Array1;

    fn uniform_profile(n: usize, temperature: FloatValue) -> Profile {
        let pressure = Profile::log_pressure_grid(1e-3, 100.0, n).unwrap();
        Profile::new(pressure, Array1::from_elem(n, temperature)).unwrap()
    }

    fn bc_for(teff: FloatValue) -> BoundaryConditions {
        BoundaryConditions::from_config(
            &SolverConfig::default().with_effective_temperature(teff),
        )
    }

    #[test]
    fn gray_grid_carries_unit_weight() {
        let weights = planck_band_weights(&WavelengthGrid::gray(), 1000.0);
        assert_eq!(weights.len(), 1);
        assert!(is_close!(weights[0], 1.0));
    }

    #[test]
    fn band_weights_are_normalized_and_peaked() {
        let grid = WavelengthGrid::new(vec![0.5, 2.0, 4.0, 300.0]).unwrap();
        let weights = planck_band_weights(&grid, 1000.0);
        assert!(is_close!(weights.iter().sum::<FloatValue>(), 1.0));
        assert!(weights.iter().all(|w| *w >= 0.0));
        // The Planck peak at 1000 K sits near 2.9 um, inside the second bin.
        assert!(weights[1] > weights[0]);
    }

    #[test]
    fn planck_fraction_is_monotone_in_wavelength() {
        let below_peak = planck_fraction_below(1.0, 1000.0);
        let above_peak = planck_fraction_below(30.0, 1000.0);
        assert!(below_peak < above_peak);
        assert!(planck_fraction_below(3000.0, 1000.0) > 0.999);
    }

    #[test]
    fn zero_opacity_transmits_the_internal_flux_unchanged() {
        let profile = uniform_profile(21, 700.0);
        let zones = ConvectiveZoneMap::empty(1);
        let grid = WavelengthGrid::gray();
        let bc = bc_for(1000.0);
        let opacities = vec![vec![0.0]; 21];

        let solver = RadiativeFluxSolver::default();
        let flux = solver
            .compute_heating(&profile, &zones, &opacities, &grid, &bc)
            .unwrap();

        let target = bc.target_net_flux();
        for f in flux.net_flux.iter() {
            assert!(is_close!(*f, target, rel_tol = 1e-12));
        }
        assert!(is_close!(flux.flux_imbalance(&zones), 0.0, abs_tol = 1e-12));
        assert!(flux.heating.iter().all(|h| h.abs() < 1e-9));
    }

    #[test]
    fn opaque_isothermal_column_carries_no_net_flux_at_depth() {
        let profile = uniform_profile(31, 900.0);
        let zones = ConvectiveZoneMap::empty(1);
        let grid = WavelengthGrid::gray();
        // Zero internal flux: an isothermal column should be in balance at
        // the bottom once it is optically thick.
        let bc = BoundaryConditions::from_config(
            &SolverConfig::default().with_effective_temperature(1.0),
        );
        let opacities = vec![vec![1e-2]; 31];

        let flux = RadiativeFluxSolver::default()
            .compute_heating(&profile, &zones, &opacities, &grid, &bc)
            .unwrap();

        let sigma_t4 = STEFAN_BOLTZMANN * 900.0_f64.powi(4);
        assert!(flux.net_flux[30].abs() < 1e-3 * sigma_t4);
        // The top of an isothermal column radiates freely to space.
        assert!(flux.net_flux[0] > 0.1 * sigma_t4);
        assert!(flux.column_tau[30] > 10.0);
    }

    #[test]
    fn mismatched_opacity_shape_is_rejected() {
        let profile = uniform_profile(5, 500.0);
        let zones = ConvectiveZoneMap::empty(1);
        let grid = WavelengthGrid::gray();
        let bc = bc_for(1000.0);

        let too_few = vec![vec![0.0]; 4];
        assert!(RadiativeFluxSolver::default()
            .compute_heating(&profile, &zones, &too_few, &grid, &bc)
            .is_err());

        let wrong_bins = vec![vec![0.0, 0.0]; 5];
        assert!(RadiativeFluxSolver::default()
            .compute_heating(&profile, &zones, &wrong_bins, &grid, &bc)
            .is_err());
    }

    #[test]
    fn rfacv_zero_produces_no_downward_flux_at_the_top() {
        let config = SolverConfig::default().with_irradiation(800.0, 0.0);
        let bc = BoundaryConditions::from_config(&config);
        assert_eq!(bc.irradiation_flux_w_m2, 0.0);

        let half = BoundaryConditions::from_config(
            &SolverConfig::default().with_irradiation(800.0, 0.5),
        );
        assert!(half.irradiation_flux_w_m2 > 0.0);
        assert!(is_close!(
            half.irradiation_flux_w_m2,
            0.5 * STEFAN_BOLTZMANN * 800.0_f64.powi(4)
        ));
    }
}
