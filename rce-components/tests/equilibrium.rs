//! End-to-end properties of the equilibrium solve with analytic providers.
//!
//! These tests exercise the solver invariants that must hold for any
//! provider pair:
//! - zone count and pressure ordering at every recorded iteration
//! - idempotence of a full solve
//! - irradiation fully gated off at rfacv = 0
//! - the deep-vs-shallow pressure grid acceptance scenario

use rce_components::{
    AnalyticChemistry, GrayOpacity, GrayOpacityParameters,
};
use rce_core::config::{SolverConfig, TemperatureGuess};
use rce_core::provider::WavelengthGrid;
use rce_core::solver::{EquilibriumSolver, SolverOutcome};

fn solver_for(config: SolverConfig) -> EquilibriumSolver {
    EquilibriumSolver::new(config, WavelengthGrid::gray()).unwrap()
}

mod invariants {
    use super::*;

    /// Zone count stays within nofczns and pressures stay strictly
    /// increasing at every recorded iteration, converged or not.
    #[test]
    fn zone_count_and_pressure_ordering_hold_every_iteration() {
        let config = SolverConfig::default()
            .with_effective_temperature(1000.0)
            .with_pressure_grid(1e-4, 500.0, 61)
            .with_convective_guess(1, 52, 60)
            .with_temperature_guess(TemperatureGuess::Scalar(900.0))
            .with_max_iterations(300)
            .with_history(true);
        let nofczns = config.nofczns;

        // Pressure-scaling opacity steepens the deep radiative gradient
        // past the adiabat, so convection is actually exercised.
        let opacity = GrayOpacity::from_parameters(GrayOpacityParameters {
            kappa_m2_kg: 1e-4,
            pressure_exponent: 1.0,
            temperature_range_k: (1.0, 30_000.0),
            ..GrayOpacityParameters::default()
        });
        let chemistry = AnalyticChemistry::solar();

        let result = solver_for(config).solve(&opacity, &chemistry).unwrap();
        let history = result.history.as_ref().unwrap();
        assert!(!history.is_empty());

        for record in history {
            assert!(record.zone_boundaries.len() / 2 <= nofczns);
            assert!(record
                .pressure_bar
                .windows(2)
                .all(|w| w[1] > w[0]));
            assert!(record.temperature_k.iter().all(|t| *t > 0.0));
        }
    }

    #[test]
    fn repeated_solves_are_identical() {
        let config = SolverConfig::default()
            .with_pressure_grid(1e-3, 100.0, 51)
            .with_convective_guess(1, 42, 50)
            .with_temperature_guess(TemperatureGuess::Scalar(800.0))
            .with_max_iterations(400);
        let opacity = GrayOpacity::constant(1e-5);
        let chemistry = AnalyticChemistry::solar();

        let first = solver_for(config.clone()).solve(&opacity, &chemistry).unwrap();
        let second = solver_for(config).solve(&opacity, &chemistry).unwrap();

        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.iterations, second.iterations);
        assert_eq!(first.profile, second.profile);
        assert_eq!(first.zones, second.zones);
    }

    /// rfacv = 0 with a nonzero irradiation temperature must match
    /// rfacv = 0 with no irradiation at all, bit for bit.
    #[test]
    fn rfacv_zero_fully_gates_off_irradiation() {
        let base = SolverConfig::default()
            .with_pressure_grid(1e-3, 100.0, 41)
            .with_convective_guess(0, 0, 0)
            .with_temperature_guess(TemperatureGuess::Scalar(700.0))
            .with_max_iterations(300);
        let gated = base.clone().with_irradiation(1500.0, 0.0);
        let unirradiated = base.with_irradiation(0.0, 0.0);

        let opacity = GrayOpacity::constant(1e-5);
        let chemistry = AnalyticChemistry::solar();

        let a = solver_for(gated).solve(&opacity, &chemistry).unwrap();
        let b = solver_for(unirradiated).solve(&opacity, &chemistry).unwrap();
        assert_eq!(a.profile, b.profile);
        assert_eq!(a.toa_flux_up_w_m2, b.toa_flux_up_w_m2);
        assert_eq!(a.iterations, b.iterations);
    }
}

mod grid_depth_scenario {
    use super::*;

    fn scenario_config(pressure_max_bar: f64) -> SolverConfig {
        SolverConfig::default()
            .with_effective_temperature(1000.0)
            .with_gravity(1000.0)
            .with_pressure_grid(1e-4, pressure_max_bar, 61)
            .with_convective_guess(1, 52, 60)
            .with_temperature_guess(TemperatureGuess::Scalar(400.0))
            .with_max_iterations(5000)
            .with_tolerances(0.5, 5e-3)
    }

    fn scenario_opacity() -> GrayOpacity {
        GrayOpacity::constant(1e-4)
    }

    /// A 500 bar grid is deep enough to carry the configured effective
    /// temperature: the solve converges and the emergent flux matches the
    /// profile it rests on.
    #[test]
    fn deep_grid_converges_to_a_consistent_profile() {
        let solver = solver_for(scenario_config(500.0));
        let result = solver
            .solve(&scenario_opacity(), &AnalyticChemistry::solar())
            .unwrap();

        assert!(result.is_converged(), "outcome was {:?}", result.outcome);
        // The column is optically thick, so the deep temperature must sit
        // well above the effective temperature.
        assert!(result.profile.max_temperature() > 1000.0);
        assert!(!result.brightness_temperature_exceeds_profile());
        // Temperatures decrease outward through the radiative zone.
        let t = result.profile.temperature();
        assert!(t[0] < t[60]);
    }

    /// Truncating the same setup at 3 bar leaves the column too shallow:
    /// either the solve fails to converge, or it "converges" to a profile
    /// whose emergent flux implies a brightness temperature hotter than any
    /// level in the profile. Both are the documented grid-too-shallow
    /// signatures.
    #[test]
    fn shallow_grid_is_flagged_as_inconsistent() {
        let solver = solver_for(scenario_config(3.0));
        let result = solver
            .solve(&scenario_opacity(), &AnalyticChemistry::solar())
            .unwrap();

        match result.outcome {
            SolverOutcome::Converged => assert!(
                result.brightness_temperature_exceeds_profile(),
                "shallow grid converged to brightness T {} K vs max profile T {} K",
                result.brightness_temperature_k(),
                result.profile.max_temperature()
            ),
            // Warming from the cold guess must never read as divergence;
            // genuine non-convergence exhausts the iteration budget instead.
            other => assert_eq!(other, SolverOutcome::MaxIterExceeded),
        }
    }
}

mod configuration_failures {
    use super::*;
    use rce_core::errors::RceError;

    #[test]
    fn non_positive_temperature_guess_fails_before_iterating() {
        let config = SolverConfig::default()
            .with_temperature_guess(TemperatureGuess::Scalar(0.0));
        let result = EquilibriumSolver::new(config, WavelengthGrid::gray());
        assert!(matches!(result, Err(RceError::Configuration(_))));
    }

    #[test]
    fn worker_pool_solves_match_the_global_pool() {
        let config = SolverConfig::default()
            .with_pressure_grid(1e-3, 100.0, 41)
            .with_convective_guess(0, 0, 0)
            .with_temperature_guess(TemperatureGuess::Scalar(700.0))
            .with_max_iterations(300);
        let pooled = config.clone().with_workers(2);

        let opacity = GrayOpacity::constant(1e-5);
        let chemistry = AnalyticChemistry::solar();
        let a = solver_for(config).solve(&opacity, &chemistry).unwrap();
        let b = solver_for(pooled).solve(&opacity, &chemistry).unwrap();
        assert_eq!(a.profile, b.profile);
    }
}
