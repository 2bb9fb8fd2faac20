//! redb table definitions for the transmission ledger.
//!
//! Every table uses `&str` keys and `&[u8]` values (JSON-serialized types).

use redb::TableDefinition;

/// Protocol state keyed by `{digest_hex}`.
pub const STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("states");

/// The single current contract config, keyed by [`CURRENT_CONFIG_KEY`].
pub const CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("config");

pub const CURRENT_CONFIG_KEY: &str = "current";

/// Pending transmissions keyed by `{digest_hex}:{epoch}:{round}`.
pub const PENDING_TRANSMISSIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("pending_transmissions");

/// Report timestamps ever stored per digest, keyed by `{digest_hex}`.
pub const DIGEST_INDEX: TableDefinition<&str, &[u8]> = TableDefinition::new("digest_index");
