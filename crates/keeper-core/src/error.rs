//! Error types shared across Keepgrid crates.

use thiserror::Error;

/// Errors produced when parsing keys off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("upkeep key not parsable: missing data in upkeep key {0:?}")]
    MissingSeparator(String),

    #[error("upkeep key not parsable: invalid block number {0:?}")]
    InvalidBlock(String),

    #[error("upkeep key not parsable: id must be a decimal integer, got {0:?}")]
    InvalidId(String),

    #[error("block identifier not parsable: {0:?}")]
    InvalidBlockKey(String),
}

/// Errors produced by the sampling math.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplingError {
    #[error("invalid sampling parameter: {0}")]
    InvalidParameter(String),
}
