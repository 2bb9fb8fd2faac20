//! keeper-state — transmission ledger for Keepgrid.
//!
//! Backed by [redb](https://docs.rs/redb), records per-digest protocol state,
//! the current contract configuration and pending transmissions, on disk or
//! in memory.
//!
//! # Architecture
//!
//! ```text
//! states                 {digest_hex}                 -> PersistentState
//! config                 "current"                    -> ContractConfig
//! pending_transmissions  {digest_hex}:{epoch}:{round} -> PendingTransmission
//! digest_index           {digest_hex}                 -> [ReportTimestamp]
//! ```
//!
//! The digest index is append-only. Deleting a pending transmission leaves
//! its index entry behind, so every lookup through the index tolerates a
//! missing primary record.
//!
//! `LedgerStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use store::LedgerStore;
pub use types::*;
