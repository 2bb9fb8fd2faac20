//! Shared types used across Keepgrid crates.
//!
//! An [`UpkeepKey`] names one eligibility check: an upkeep id at a specific
//! block. On the wire it is the ASCII string `"<block>|<id>"` with both parts
//! in decimal, and [`fmt::Display`] / [`FromStr`] round-trip it exactly.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Bytes, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KeyParseError;

/// Separator between block number and upkeep id in the key wire format.
pub const KEY_SEPARATOR: char = '|';

/// Gas placeholder assigned to every checked result until the executor
/// supplies the real execute gas of the upkeep.
pub const DEFAULT_EXECUTE_GAS: u32 = 5_000_000;

// ── Keys ──────────────────────────────────────────────────────────

/// One checkable unit: an upkeep id at a specific block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpkeepKey {
    pub block: u64,
    pub id: U256,
}

impl UpkeepKey {
    pub fn new(block: u64, id: U256) -> Self {
        Self { block, id }
    }

    /// Stable identity of the upkeep, independent of the block.
    pub fn identifier(&self) -> UpkeepIdentifier {
        UpkeepIdentifier::from(self.id)
    }
}

impl fmt::Display for UpkeepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.block, self.id)
    }
}

impl FromStr for UpkeepKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(KEY_SEPARATOR);
        let (Some(block), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(KeyParseError::MissingSeparator(s.to_string()));
        };

        if !is_decimal(block) {
            return Err(KeyParseError::InvalidBlock(block.to_string()));
        }
        let block = block
            .parse::<u64>()
            .map_err(|_| KeyParseError::InvalidBlock(block.to_string()))?;

        if !is_decimal(id) {
            return Err(KeyParseError::InvalidId(id.to_string()));
        }
        let id = U256::from_str_radix(id, 10)
            .map_err(|_| KeyParseError::InvalidId(id.to_string()))?;

        Ok(Self { block, id })
    }
}

impl Serialize for UpkeepKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UpkeepKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Block selector for registry reads. `"0"` selects the latest block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey(pub String);

impl BlockKey {
    /// The "latest block" selector.
    pub fn latest() -> Self {
        Self("0".to_string())
    }

    /// Parse into a block number; `Ok(None)` means "latest".
    pub fn number(&self) -> Result<Option<u64>, KeyParseError> {
        if !is_decimal(&self.0) {
            return Err(KeyParseError::InvalidBlockKey(self.0.clone()));
        }
        let n = self
            .0
            .parse::<u64>()
            .map_err(|_| KeyParseError::InvalidBlockKey(self.0.clone()))?;
        Ok((n != 0).then_some(n))
    }
}

impl From<u64> for BlockKey {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of an upkeep: the minimal big-endian bytes of its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpkeepIdentifier(pub Bytes);

impl From<U256> for UpkeepIdentifier {
    fn from(id: U256) -> Self {
        Self(Bytes::from(id.to_be_bytes_trimmed_vec()))
    }
}

impl fmt::Display for UpkeepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

// ── Results ───────────────────────────────────────────────────────

/// Eligibility verdict for one checked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpkeepState {
    Eligible,
    NotEligible,
}

/// Outcome of checking one [`UpkeepKey`] against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepResult {
    pub key: UpkeepKey,
    pub state: UpkeepState,
    /// Registry failure reason code (0 when none).
    pub failure_reason: u8,
    pub gas_used: U256,
    /// Perform data to pass to `performUpkeep`, unwrapped from the check envelope.
    pub perform_data: Bytes,
    pub fast_gas_wei: U256,
    pub link_native: U256,
    pub check_block_number: u32,
    pub check_block_hash: B256,
    pub execute_gas: u32,
}

impl UpkeepResult {
    /// A result carrying no data other than "not eligible".
    pub fn not_eligible(key: UpkeepKey) -> Self {
        Self {
            key,
            state: UpkeepState::NotEligible,
            failure_reason: 0,
            gas_used: U256::ZERO,
            perform_data: Bytes::new(),
            fast_gas_wei: U256::ZERO,
            link_native: U256::ZERO,
            check_block_number: 0,
            check_block_hash: B256::ZERO,
            execute_gas: DEFAULT_EXECUTE_GAS,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.state == UpkeepState::Eligible
    }
}
