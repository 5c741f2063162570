use crate::profile::Profile;
use crate::provider::LookupError;
use thiserror::Error;

/// Error type for invalid operations.
///
/// Terminal solver outcomes (diverged, iteration budget exhausted, cancelled)
/// are not errors; they are reported through
/// [`SolverOutcome`](crate::solver::SolverOutcome) so that callers always get
/// the last valid profile back. `RceError` covers the cases where no useful
/// result exists: a configuration rejected before the first iteration, or a
/// failed opacity/chemistry lookup mid-solve.
#[derive(Error, Debug)]
pub enum RceError {
    #[error("{0}")]
    Error(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("profile has {actual} levels, expected nlevel={expected}")]
    ProfileLengthMismatch { expected: usize, actual: usize },
    #[error("{provider} lookup failed at level {level} during iteration {iteration}: {source}")]
    Lookup {
        provider: &'static str,
        level: usize,
        iteration: usize,
        source: LookupError,
        /// Profile at the start of the failing iteration, for debugging.
        last_profile: Box<Profile>,
    },
}

/// Convenience type for `Result<T, RceError>`.
pub type RceResult<T> = Result<T, RceError>;
