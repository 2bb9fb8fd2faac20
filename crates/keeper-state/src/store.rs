//! LedgerStore — redb-backed transmission ledger.
//!
//! Typed operations over protocol state, the current contract config and
//! pending transmissions. All values are JSON-serialized into redb's `&[u8]`
//! value columns. On-disk and in-memory backends are supported.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `LedgerError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// Thread-safe transmission ledger backed by redb.
#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<Database>,
}

impl LedgerStore {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory ledger.
    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> LedgerResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(STATES).map_err(map_err!(Table))?;
        txn.open_table(CONFIG).map_err(map_err!(Table))?;
        txn.open_table(PENDING_TRANSMISSIONS).map_err(map_err!(Table))?;
        txn.open_table(DIGEST_INDEX).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Protocol state ─────────────────────────────────────────────

    /// Read the state recorded for `digest`.
    pub fn read_state(&self, digest: &ConfigDigest) -> LedgerResult<PersistentState> {
        let key = digest.to_hex();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize)),
            None => Err(LedgerError::NotFound(format!("state for digest {key}"))),
        }
    }

    pub fn write_state(&self, digest: &ConfigDigest, state: &PersistentState) -> LedgerResult<()> {
        let key = digest.to_hex();
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STATES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(digest = %key, epoch = state.epoch, "state stored");
        Ok(())
    }

    // ── Contract config ────────────────────────────────────────────

    pub fn read_config(&self) -> LedgerResult<ContractConfig> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
        match table.get(CURRENT_CONFIG_KEY).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize)),
            None => Err(LedgerError::NotFound("contract config".to_string())),
        }
    }

    /// Replace the current config.
    pub fn write_config(&self, config: &ContractConfig) -> LedgerResult<()> {
        let value = serde_json::to_vec(config).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONFIG).map_err(map_err!(Table))?;
            table
                .insert(CURRENT_CONFIG_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(digest = %config.config_digest, count = config.config_count, "config stored");
        Ok(())
    }

    // ── Pending transmissions ──────────────────────────────────────

    /// Store `tx` under `ts` and record `ts` in the digest index.
    pub fn store_pending_transmission(
        &self,
        ts: &ReportTimestamp,
        tx: &PendingTransmission,
    ) -> LedgerResult<()> {
        let key = ts.table_key();
        let digest = ts.config_digest.to_hex();
        let value = serde_json::to_vec(tx).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PENDING_TRANSMISSIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut index = txn.open_table(DIGEST_INDEX).map_err(map_err!(Table))?;
            let mut timestamps: Vec<ReportTimestamp> =
                match index.get(digest.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => {
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                    }
                    None => Vec::new(),
                };
            if !timestamps.contains(ts) {
                timestamps.push(*ts);
                let encoded = serde_json::to_vec(&timestamps).map_err(map_err!(Serialize))?;
                index
                    .insert(digest.as_str(), encoded.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "pending transmission stored");
        Ok(())
    }

    /// All pending transmissions recorded for `digest`.
    ///
    /// Index entries whose primary record is gone are skipped.
    pub fn pending_transmissions_with_config_digest(
        &self,
        digest: &ConfigDigest,
    ) -> LedgerResult<HashMap<ReportTimestamp, PendingTransmission>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(DIGEST_INDEX).map_err(map_err!(Table))?;
        let timestamps: Vec<ReportTimestamp> =
            match index.get(digest.to_hex().as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => return Ok(HashMap::new()),
            };

        let table = txn.open_table(PENDING_TRANSMISSIONS).map_err(map_err!(Table))?;
        let mut results = HashMap::with_capacity(timestamps.len());
        for ts in timestamps {
            if let Some(guard) = table.get(ts.table_key().as_str()).map_err(map_err!(Read))? {
                let tx: PendingTransmission =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                results.insert(ts, tx);
            }
        }
        Ok(results)
    }

    /// Delete the transmission stored under `ts`. Returns true if it existed.
    /// The digest index is left untouched.
    pub fn delete_pending_transmission(&self, ts: &ReportTimestamp) -> LedgerResult<bool> {
        let key = ts.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PENDING_TRANSMISSIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "pending transmission deleted");
        Ok(existed)
    }

    /// Delete every pending transmission whose time is strictly before
    /// `cutoff`. Returns the number removed.
    pub fn delete_pending_transmissions_older_than(&self, cutoff: SystemTime) -> LedgerResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(PENDING_TRANSMISSIONS).map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let tx: PendingTransmission =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if tx.time < cutoff {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            removed = expired.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if removed > 0 {
            debug!(removed, "expired pending transmissions deleted");
        }
        Ok(removed)
    }

    /// Spawn a background task that deletes pending transmissions older
    /// than `ttl` every `interval` until `shutdown` flips.
    pub fn spawn_expiry_sweeper(
        &self,
        ttl: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            info!(?ttl, ?interval, "pending transmission sweeper started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(cutoff) = SystemTime::now().checked_sub(ttl) else {
                            continue;
                        };
                        if let Err(e) = store.delete_pending_transmissions_older_than(cutoff) {
                            warn!(error = %e, "pending transmission sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("pending transmission sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}
