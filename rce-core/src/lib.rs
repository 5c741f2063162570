pub mod adjust;
pub mod config;
pub mod flux;
pub mod profile;
pub mod provider;
pub mod solver;
pub mod store;
pub mod zones;

pub mod errors;

pub use profile::FloatValue;
