//! Analytic providers for the RCE solver.
//!
//! This crate supplies simple closed-form implementations of the
//! `rce-core` provider traits:
//! - [`GrayOpacity`]: a gray or power-law absorption coefficient with
//!   optional per-bin contrast.
//! - [`AnalyticChemistry`]: H2/He-dominated equilibrium abundances with a
//!   temperature-dependent CO/CH4 balance and a composition-derived
//!   adiabatic gradient.
//!
//! They are useful for testing, for fast approximate runs, and as
//! reference implementations when wiring up table-backed providers.

pub mod components;

pub use components::analytic_chemistry::{AnalyticChemistry, AnalyticChemistryParameters};
pub use components::gray_opacity::{GrayOpacity, GrayOpacityParameters};
