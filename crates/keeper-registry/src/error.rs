//! Registry client error types.

use thiserror::Error;

use keeper_core::KeyParseError;

/// Errors that can occur while talking to the registry.
///
/// `Clone` so a single settled outcome can be handed to every caller that
/// waited on the same check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Transport or RPC failure. Retryable by the caller; never retried here.
    #[error("registry chain call failure: {0}")]
    InfraFailure(String),

    #[error("block identifier not parsable: {0}")]
    BlockKeyNotParsable(String),

    #[error("upkeep key not parsable: {0}")]
    UpkeepKeyNotParsable(String),

    #[error("failed to initialize registry: {0}")]
    InitializationFailure(String),

    /// The caller's deadline passed before the operation settled.
    #[error("deadline exceeded: {0}")]
    Cancelled(String),
}

impl RegistryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RegistryError::Cancelled(_))
    }
}

impl From<KeyParseError> for RegistryError {
    fn from(e: KeyParseError) -> Self {
        match e {
            KeyParseError::InvalidBlockKey(raw) => RegistryError::BlockKeyNotParsable(raw),
            KeyParseError::MissingSeparator(raw)
            | KeyParseError::InvalidBlock(raw)
            | KeyParseError::InvalidId(raw) => RegistryError::UpkeepKeyNotParsable(raw),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
