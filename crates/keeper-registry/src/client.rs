//! Chain transport seam.
//!
//! The registry client only needs two things from a chain node: the latest
//! block number and a way to send many read-only calls in one round trip.
//! A batch either comes back whole, with one response per request, or fails
//! as a unit with a [`TransportError`].

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use thiserror::Error;

/// One read-only contract call pinned to a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub block: u64,
}

/// Per-call failure inside an otherwise successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The call executed and reverted. A normal outcome for `checkUpkeep`.
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// The node failed to execute the call.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl CallError {
    /// Classify a JSON-RPC error message. Nodes report reverts with a
    /// message containing "reverted".
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("reverted") {
            CallError::Reverted(message)
        } else {
            CallError::Rpc(message)
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, CallError::Reverted(_))
    }
}

pub type CallResponse = Result<Bytes, CallError>;

/// The whole batch failed in transit; no element can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Batched read access to a chain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of the latest block.
    async fn block_number(&self) -> Result<u64, TransportError>;

    /// Execute all calls in one round trip. On success the response vector
    /// has exactly one entry per request, in request order.
    async fn batch_call(&self, calls: Vec<CallRequest>)
        -> Result<Vec<CallResponse>, TransportError>;
}
