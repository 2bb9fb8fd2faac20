//! keeper-registry — talks to the upkeep registry contract.
//!
//! Enumerates active upkeeps and verifies eligibility in two batched round
//! trips: `checkUpkeep` for every key, then `simulatePerformUpkeep` for every
//! key the check found eligible. A key is eligible only when both phases pass.
//!
//! # Architecture
//!
//! ```text
//! Registry (trait)
//!   └── EvmRegistry
//!       ├── abi (sol! bindings for the 2.0 registry)
//!       └── ChainClient (trait) — batched eth_call transport
//! ```
//!
//! Transport below [`ChainClient::batch_call`] is supplied by the embedder.
//! Every call is bounded by a caller-supplied deadline; running past it
//! yields [`RegistryError::Cancelled`], never an infra failure.

pub mod abi;
pub mod client;
pub mod error;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{CallError, CallRequest, CallResponse, ChainClient, TransportError};
pub use error::{RegistryError, RegistryResult};
pub use registry::{key_from_wire, EvmRegistry, Registry, RegistryConfig, DEFAULT_PAGE_SIZE};
