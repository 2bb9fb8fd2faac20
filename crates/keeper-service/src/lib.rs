//! keeper-service — upkeep checking service for Keepgrid.
//!
//! Wraps a [`keeper_registry::Registry`] with a TTL result cache, a bounded
//! worker pool and single-flight deduplication, and samples a share of the
//! active upkeeps each round.
//!
//! # Architecture
//!
//! ```text
//! ReportingFactory ──► UpkeepService ──► WorkerPool ──► Registry
//!                          │
//!                          └── ResultCache ◄── sweeper task
//! ```
//!
//! Every call takes a deadline. A check that outlives it resolves to
//! [`ServiceError::Cancelled`] and its result, if any, is never cached.

pub mod cache;
pub mod error;
pub mod observation;
pub mod plugin;
pub mod pool;
pub mod service;

pub use cache::{CacheStats, ResultCache};
pub use error::{ServiceError, ServiceResult};
pub use observation::{decode_observation, encode_observation, merge_observations, ObservationError};
pub use plugin::{PluginConfig, PluginInfo, PluginLimits, ReportingFactory};
pub use pool::{SubmitError, WorkerPool};
pub use service::{ServiceConfig, UpkeepService};
