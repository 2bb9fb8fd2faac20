//! Observation encoding.
//!
//! An observation is a JSON array of eligible upkeep keys in wire form,
//! e.g. `["100|7","100|12"]`. Keys that would push it past the size limit
//! are dropped from the end.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use keeper_core::config::MIN_OBSERVATION_LENGTH;
use keeper_core::{UpkeepIdentifier, UpkeepKey, UpkeepResult};
use keeper_registry::key_from_wire;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("failed to encode observation: {0}")]
    Encode(String),
    #[error("failed to decode observation: {0}")]
    Decode(String),
}

/// Encode the eligible results as an observation of at most `max_len` bytes.
///
/// Fails if `max_len` cannot hold even an empty array.
pub fn encode_observation(
    results: &[UpkeepResult],
    max_len: usize,
) -> Result<Vec<u8>, ObservationError> {
    if max_len < MIN_OBSERVATION_LENGTH {
        return Err(ObservationError::Encode(format!(
            "limit of {max_len} bytes is below the {MIN_OBSERVATION_LENGTH}-byte empty observation"
        )));
    }
    let mut keys = Vec::new();
    // "[" + "]"
    let mut size = 2;
    for result in results.iter().filter(|r| r.is_eligible()) {
        let key = result.key.to_string();
        // Quotes, plus a comma after the first element.
        let added = key.len() + 2 + usize::from(!keys.is_empty());
        if size + added > max_len {
            warn!(
                kept = keys.len(),
                dropped_from = %result.key,
                max_len,
                "observation truncated"
            );
            break;
        }
        size += added;
        keys.push(key);
    }
    serde_json::to_vec(&keys).map_err(|e| ObservationError::Encode(e.to_string()))
}

/// Decode an observation. Entries that do not parse as keys are skipped.
pub fn decode_observation(data: &[u8]) -> Result<Vec<UpkeepKey>, ObservationError> {
    let raw: Vec<String> =
        serde_json::from_slice(data).map_err(|e| ObservationError::Decode(e.to_string()))?;
    let mut keys = Vec::with_capacity(raw.len());
    for entry in raw {
        match key_from_wire(&entry) {
            Ok(key) => keys.push(key),
            Err(e) => warn!(entry = %entry, error = %e, "skipping malformed key in observation"),
        }
    }
    Ok(keys)
}

/// Combine observations from many oracles into one list with a single key
/// per upkeep, keeping the highest block seen. Ordered by upkeep id.
pub fn merge_observations<I>(observations: I) -> Vec<UpkeepKey>
where
    I: IntoIterator<Item = Vec<UpkeepKey>>,
{
    let mut latest: HashMap<UpkeepIdentifier, UpkeepKey> = HashMap::new();
    for key in observations.into_iter().flatten() {
        latest
            .entry(key.identifier())
            .and_modify(|current| {
                if key.block > current.block {
                    *current = key;
                }
            })
            .or_insert(key);
    }
    let mut merged: Vec<_> = latest.into_values().collect();
    merged.sort_by_key(|key| key.id);
    merged
}
