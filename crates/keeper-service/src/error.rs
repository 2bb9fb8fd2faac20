//! Error types for the upkeep checking service.

use thiserror::Error;

use keeper_core::{SamplingError, UpkeepKey};
use keeper_registry::RegistryError;

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned to callers of the service.
///
/// `Clone` because one settled check is delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The work queue was full; the job was not accepted.
    #[error("work queue is full")]
    QueueFull,

    /// The caller's deadline passed first. Never cached.
    #[error("deadline exceeded before the check settled")]
    Cancelled,

    /// The service is shutting down.
    #[error("service stopped")]
    Stopped,

    /// The registry returned no result for this key.
    #[error("no result returned for upkeep {0}")]
    MissingResult(UpkeepKey),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Sampling(#[from] SamplingError),
}

impl ServiceError {
    /// Cancellation from either layer.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ServiceError::Cancelled => true,
            ServiceError::Registry(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
