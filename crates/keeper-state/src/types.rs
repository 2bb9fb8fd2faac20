//! Domain types for the transmission ledger.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// 32-byte identifier of one contract configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigDigest(pub [u8; 32]);

impl ConfigDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 32]> for ConfigDigest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Identifies one report: config digest, epoch and round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportTimestamp {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
}

impl ReportTimestamp {
    pub fn new(config_digest: ConfigDigest, epoch: u32, round: u8) -> Self {
        Self {
            config_digest,
            epoch,
            round,
        }
    }

    /// Composite primary key: `{digest_hex}:{epoch}:{round}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}:{}", self.config_digest.to_hex(), self.epoch, self.round)
    }
}

// ── Protocol state ─────────────────────────────────────────────────

/// Per-digest protocol progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub epoch: u32,
    pub highest_sent_epoch: u32,
    /// Highest epoch received from each oracle, indexed by oracle id.
    pub highest_received_epoch: Vec<u32>,
}

/// Contract configuration currently in force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub config_digest: ConfigDigest,
    pub config_count: u64,
    pub signers: Vec<Vec<u8>>,
    pub transmitters: Vec<String>,
    pub f: u8,
    pub onchain_config: Vec<u8>,
    pub offchain_config_version: u64,
    pub offchain_config: Vec<u8>,
}

// ── Transmissions ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedSignature {
    pub signature: Vec<u8>,
    pub signer: u8,
}

/// A signed report waiting to be sent on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransmission {
    /// When the transmission was scheduled.
    pub time: SystemTime,
    pub extra_hash: [u8; 32],
    pub report: Vec<u8>,
    pub attributed_signatures: Vec<AttributedSignature>,
}
