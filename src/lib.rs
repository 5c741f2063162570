//! Radiative-convective equilibrium solver.
//!
//! This facade crate re-exports the solver engine from `rce-core` and the
//! analytic providers from `rce-components`. A minimal run looks like:
//!
//! ```
//! use rce::{AnalyticChemistry, GrayOpacity};
//! use rce::config::SolverConfig;
//! use rce::provider::WavelengthGrid;
//! use rce::solver::EquilibriumSolver;
//!
//! let config = SolverConfig::default()
//!     .with_effective_temperature(1000.0)
//!     .with_max_iterations(50);
//! let solver = EquilibriumSolver::new(config, WavelengthGrid::gray()).unwrap();
//! let result = solver
//!     .solve(&GrayOpacity::constant(0.0), &AnalyticChemistry::solar())
//!     .unwrap();
//! assert!(result.is_converged());
//! ```

pub use rce_core::{adjust, config, errors, flux, profile, provider, solver, store, zones};
pub use rce_core::FloatValue;

pub use rce_components::{
    AnalyticChemistry, AnalyticChemistryParameters, GrayOpacity, GrayOpacityParameters,
};
