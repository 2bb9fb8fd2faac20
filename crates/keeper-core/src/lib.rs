//! keeper-core — shared types for Keepgrid.
//!
//! Upkeep keys and check results, the sampling math that sizes each
//! oracle's per-round share of checks, and `keeper.toml` configuration.

pub mod config;
pub mod error;
pub mod sampling;
pub mod types;

pub use config::KeeperConfig;
pub use error::{KeyParseError, SamplingError};
pub use sampling::{sample_size, SampleRatio};
pub use types::*;
