//! Registry trait and the EVM-backed implementation.
//!
//! Enumeration pages through `getActiveUpkeepIDs` until the reported upkeep
//! count is covered or an empty page comes back. Checking is two-phase and
//! costs two batched round trips regardless of how many keys are passed.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use keeper_core::config::RegistrySection;
use keeper_core::{BlockKey, UpkeepIdentifier, UpkeepKey, UpkeepResult, UpkeepState};

use crate::abi;
use crate::client::{CallError, CallRequest, CallResponse, ChainClient};
use crate::error::{RegistryError, RegistryResult};

/// Page size used when paging through active upkeep ids.
pub const DEFAULT_PAGE_SIZE: u64 = 10_000;

/// Read access to the set of upkeeps and their eligibility.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Every active upkeep at `block`, keyed to the resolved block number.
    async fn get_active_upkeep_keys(
        &self,
        deadline: Instant,
        block: &BlockKey,
    ) -> RegistryResult<Vec<UpkeepKey>>;

    /// Check every key. The output holds at most one result per input key.
    /// A key whose return data could not be decoded is omitted.
    async fn check_upkeep(
        &self,
        deadline: Instant,
        keys: &[UpkeepKey],
    ) -> RegistryResult<Vec<UpkeepResult>>;

    fn identifier_from_key(&self, key: &UpkeepKey) -> UpkeepIdentifier {
        key.identifier()
    }
}

/// Parse an upkeep key received from a peer.
pub fn key_from_wire(raw: &str) -> RegistryResult<UpkeepKey> {
    Ok(UpkeepKey::from_str(raw)?)
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub address: Address,
    pub page_size: u64,
}

impl RegistryConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn from_section(section: &RegistrySection) -> RegistryResult<Self> {
        let raw = section.address.as_deref().ok_or_else(|| {
            RegistryError::InitializationFailure("registry.address is not set".to_string())
        })?;
        let address = Address::from_str(raw).map_err(|e| {
            RegistryError::InitializationFailure(format!("invalid registry address {raw:?}: {e}"))
        })?;
        Ok(Self {
            address,
            page_size: section.page_size,
        })
    }
}

/// Registry client for the 2.0 contract over a batched [`ChainClient`].
pub struct EvmRegistry {
    address: Address,
    page_size: u64,
    client: Arc<dyn ChainClient>,
}

impl EvmRegistry {
    pub fn new(config: RegistryConfig, client: Arc<dyn ChainClient>) -> RegistryResult<Self> {
        if config.page_size == 0 {
            return Err(RegistryError::InitializationFailure(
                "page size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            address: config.address,
            page_size: config.page_size,
            client,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Block to pin calls to; `None` resolves to the latest block.
    async fn resolve_block(&self, block: Option<u64>) -> RegistryResult<u64> {
        match block {
            Some(n) => Ok(n),
            None => self.client.block_number().await.map_err(|e| {
                RegistryError::InfraFailure(format!("failed to get latest block: {e}"))
            }),
        }
    }

    fn request(&self, block: u64, data: Bytes) -> CallRequest {
        CallRequest {
            to: self.address,
            data,
            block,
        }
    }

    /// Send a batch and require exactly one response per request.
    async fn batch(&self, calls: Vec<CallRequest>) -> RegistryResult<Vec<CallResponse>> {
        let expected = calls.len();
        let responses = self
            .client
            .batch_call(calls)
            .await
            .map_err(|e| RegistryError::InfraFailure(e.to_string()))?;
        if responses.len() != expected {
            return Err(RegistryError::InfraFailure(format!(
                "batch returned {} responses for {expected} calls",
                responses.len()
            )));
        }
        Ok(responses)
    }

    async fn single(&self, what: &str, request: CallRequest) -> RegistryResult<Bytes> {
        let mut responses = self.batch(vec![request]).await?;
        match responses.pop() {
            Some(Ok(data)) => Ok(data),
            Some(Err(e)) => Err(RegistryError::InfraFailure(format!("{what}: {e}"))),
            None => Err(RegistryError::InfraFailure(format!("{what}: empty response"))),
        }
    }

    async fn active_keys(&self, block: &BlockKey) -> RegistryResult<Vec<UpkeepKey>> {
        let block = self.resolve_block(block.number()?).await?;

        let data = self.single("getState", self.request(block, abi::encode_get_state())).await?;
        let total = abi::decode_num_upkeeps(&data)
            .map_err(|e| RegistryError::InfraFailure(format!("failed to decode getState: {e}")))?;
        let total = u64::try_from(total).unwrap_or(u64::MAX);

        let mut keys = Vec::new();
        let mut start = 0u64;
        while start < total {
            let count = self.page_size.min(total - start);
            let data = self
                .single(
                    "getActiveUpkeepIDs",
                    self.request(block, abi::encode_get_active_upkeep_ids(start, count)),
                )
                .await?;
            let ids = abi::decode_active_upkeep_ids(&data).map_err(|e| {
                RegistryError::InfraFailure(format!("failed to decode getActiveUpkeepIDs: {e}"))
            })?;
            debug!(start, count, fetched = ids.len(), "fetched active upkeep page");

            if ids.is_empty() {
                break;
            }
            keys.extend(ids.into_iter().map(|id| UpkeepKey::new(block, id)));
            start += count;
        }

        debug!(block, total, active = keys.len(), "enumerated active upkeeps");
        Ok(keys)
    }

    async fn check(&self, keys: &[UpkeepKey]) -> RegistryResult<Vec<UpkeepResult>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Keys carrying block 0 are pinned to the latest block, fetched once.
        let mut latest = None;
        let mut blocks = Vec::with_capacity(keys.len());
        for key in keys {
            let block = if key.block == 0 {
                match latest {
                    Some(n) => n,
                    None => {
                        let n = self.resolve_block(None).await?;
                        latest = Some(n);
                        n
                    }
                }
            } else {
                key.block
            };
            blocks.push(block);
        }

        // Phase 1: checkUpkeep for every key.
        let calls = keys
            .iter()
            .zip(&blocks)
            .map(|(key, &block)| self.request(block, abi::encode_check_upkeep(key.id)))
            .collect();
        let responses = self.batch(calls).await?;

        let mut checked: Vec<(UpkeepResult, u64)> = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();
        for ((key, &block), response) in keys.iter().zip(&blocks).zip(responses) {
            match response {
                Ok(data) => match abi::decode_check_result(*key, &data) {
                    Ok(result) => checked.push((result, block)),
                    Err(e) => warn!(key = %key, error = %e, "dropping undecodable check result"),
                },
                Err(CallError::Reverted(reason)) => {
                    debug!(key = %key, reason = %reason, "check reverted, upkeep not eligible");
                    checked.push((UpkeepResult::not_eligible(*key), block));
                }
                Err(e @ CallError::Rpc(_)) => failures.push(format!("{key}: {e}")),
            }
        }
        if !failures.is_empty() {
            return Err(RegistryError::InfraFailure(format!(
                "checkUpkeep failed for {} of {} keys: {}",
                failures.len(),
                keys.len(),
                failures.join("; ")
            )));
        }

        // Phase 2: simulatePerformUpkeep for every provisionally eligible key.
        let to_simulate: Vec<usize> = checked
            .iter()
            .enumerate()
            .filter(|(_, (result, _))| result.is_eligible())
            .map(|(i, _)| i)
            .collect();
        if to_simulate.is_empty() {
            return Ok(checked.into_iter().map(|(result, _)| result).collect());
        }

        let calls = to_simulate
            .iter()
            .map(|&i| {
                let (result, block) = &checked[i];
                self.request(
                    *block,
                    abi::encode_simulate_perform_upkeep(result.key.id, result.perform_data.clone()),
                )
            })
            .collect();
        let responses = self.batch(calls).await?;

        let mut dropped = Vec::new();
        for (&i, response) in to_simulate.iter().zip(responses) {
            let result = &mut checked[i].0;
            match response {
                Ok(data) => match abi::decode_simulate_success(&data) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(key = %result.key, "simulated perform failed, upkeep not eligible");
                        result.state = UpkeepState::NotEligible;
                    }
                    Err(e) => {
                        warn!(key = %result.key, error = %e, "dropping undecodable simulate result");
                        dropped.push(i);
                    }
                },
                Err(CallError::Reverted(reason)) => {
                    debug!(key = %result.key, reason = %reason, "simulated perform reverted");
                    result.state = UpkeepState::NotEligible;
                }
                Err(e @ CallError::Rpc(_)) => failures.push(format!("{}: {e}", result.key)),
            }
        }
        if !failures.is_empty() {
            return Err(RegistryError::InfraFailure(format!(
                "simulatePerformUpkeep failed for {} keys: {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        Ok(checked
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, (result, _))| result)
            .collect())
    }
}

/// Run `fut` under `deadline`. A deadline already in the past cancels
/// before any chain call is made.
async fn with_deadline<T>(
    deadline: Instant,
    what: &str,
    fut: impl std::future::Future<Output = RegistryResult<T>>,
) -> RegistryResult<T> {
    if Instant::now() >= deadline {
        return Err(RegistryError::Cancelled(format!("{what}: deadline already passed")));
    }
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Cancelled(format!("{what}: deadline exceeded"))),
    }
}

#[async_trait]
impl Registry for EvmRegistry {
    async fn get_active_upkeep_keys(
        &self,
        deadline: Instant,
        block: &BlockKey,
    ) -> RegistryResult<Vec<UpkeepKey>> {
        with_deadline(deadline, "get active upkeep keys", self.active_keys(block)).await
    }

    async fn check_upkeep(
        &self,
        deadline: Instant,
        keys: &[UpkeepKey],
    ) -> RegistryResult<Vec<UpkeepResult>> {
        with_deadline(deadline, "check upkeep", self.check(keys)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CheckOutcome, MockChain, SimulateOutcome};
    use alloy_primitives::U256;
    use std::time::Duration;

    fn registry_address() -> Address {
        Address::repeat_byte(0x11)
    }

    fn registry(chain: &Arc<MockChain>, page_size: u64) -> EvmRegistry {
        let config = RegistryConfig {
            address: registry_address(),
            page_size,
        };
        EvmRegistry::new(config, chain.clone()).unwrap()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn ids(range: std::ops::Range<u64>) -> Vec<U256> {
        range.map(U256::from).collect()
    }

    #[tokio::test]
    async fn test_enumerates_across_pages() {
        let chain = Arc::new(MockChain::new(100).with_active_ids(ids(1..5)));
        let registry = registry(&chain, 2);

        let keys = registry
            .get_active_upkeep_keys(deadline(), &BlockKey::from(90))
            .await
            .unwrap();

        assert_eq!(keys.len(), 4);
        assert!(keys.iter().all(|k| k.block == 90));
        assert_eq!(
            keys.iter().map(|k| k.id).collect::<Vec<_>>(),
            ids(1..5)
        );
        assert_eq!(chain.page_fetches(), 2);
    }

    #[tokio::test]
    async fn test_latest_block_resolves_from_header() {
        let chain = Arc::new(MockChain::new(321).with_active_ids(ids(1..3)));
        let registry = registry(&chain, 10);

        let keys = registry
            .get_active_upkeep_keys(deadline(), &BlockKey::latest())
            .await
            .unwrap();
        assert!(keys.iter().all(|k| k.block == 321));
    }

    #[tokio::test]
    async fn test_empty_page_stops_enumeration() {
        // State claims 6 upkeeps but only 2 are actually listed.
        let chain = Arc::new(
            MockChain::new(100)
                .with_active_ids(ids(1..3))
                .with_reported_count(6),
        );
        let registry = registry(&chain, 2);

        let keys = registry
            .get_active_upkeep_keys(deadline(), &BlockKey::from(100))
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(chain.page_fetches(), 2);
    }

    #[tokio::test]
    async fn test_bad_block_key_is_rejected() {
        let chain = Arc::new(MockChain::new(100));
        let registry = registry(&chain, 2);

        let err = registry
            .get_active_upkeep_keys(deadline(), &BlockKey("latest".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::BlockKeyNotParsable(_)));
        assert_eq!(chain.page_fetches(), 0);
    }

    #[test]
    fn test_zero_page_size_fails_initialization() {
        let chain = Arc::new(MockChain::new(100));
        let config = RegistryConfig {
            address: registry_address(),
            page_size: 0,
        };
        assert!(matches!(
            EvmRegistry::new(config, chain),
            Err(RegistryError::InitializationFailure(_))
        ));
    }

    #[test]
    fn test_config_from_section() {
        let mut section = RegistrySection::default();
        assert!(matches!(
            RegistryConfig::from_section(&section),
            Err(RegistryError::InitializationFailure(_))
        ));

        section.address = Some("0x1111111111111111111111111111111111111111".to_string());
        let config = RegistryConfig::from_section(&section).unwrap();
        assert_eq!(config.address, registry_address());
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);

        section.address = Some("0x12".to_string());
        assert!(RegistryConfig::from_section(&section).is_err());
    }

    #[tokio::test]
    async fn test_two_phase_check() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_check(U256::from(1u64), CheckOutcome::needed(b"one"))
                .with_check(U256::from(2u64), CheckOutcome::needed(b"two"))
                .with_simulate(U256::from(2u64), SimulateOutcome::Revert("out of gas".into()))
                .with_check(U256::from(3u64), CheckOutcome::NotNeeded)
                .with_check(U256::from(4u64), CheckOutcome::needed(b"four"))
                .with_simulate(U256::from(4u64), SimulateOutcome::Failure),
        );
        let registry = registry(&chain, 10);
        let keys: Vec<_> = (1..=4u64).map(|i| UpkeepKey::new(100, U256::from(i))).collect();

        let results = registry.check_upkeep(deadline(), &keys).await.unwrap();
        assert_eq!(results.len(), 4);

        let by_id = |i: u64| results.iter().find(|r| r.key.id == U256::from(i)).unwrap();
        assert!(by_id(1).is_eligible());
        assert_eq!(by_id(1).perform_data.as_ref(), b"one");
        assert!(!by_id(2).is_eligible());
        assert!(!by_id(3).is_eligible());
        assert!(!by_id(4).is_eligible());

        // One check batch, one simulate batch covering only eligible keys.
        assert_eq!(chain.check_batches(), 1);
        assert_eq!(chain.simulate_batches(), 1);
        assert_eq!(chain.simulate_calls(), 3);
    }

    #[tokio::test]
    async fn test_reverted_check_is_not_eligible() {
        let chain = Arc::new(MockChain::new(100).with_check(
            U256::from(7u64),
            CheckOutcome::Revert("execution reverted: UpkeepNotNeeded".into()),
        ));
        let registry = registry(&chain, 10);

        let key = UpkeepKey::new(100, U256::from(7u64));
        let results = registry.check_upkeep(deadline(), &[key]).await.unwrap();
        assert_eq!(results, vec![UpkeepResult::not_eligible(key)]);
        assert_eq!(chain.simulate_batches(), 0);
    }

    #[tokio::test]
    async fn test_rpc_error_fails_batch() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_check(U256::from(1u64), CheckOutcome::needed(b"ok"))
                .with_check(U256::from(2u64), CheckOutcome::RpcError("header not found".into())),
        );
        let registry = registry(&chain, 10);
        let keys = [
            UpkeepKey::new(100, U256::from(1u64)),
            UpkeepKey::new(100, U256::from(2u64)),
        ];

        let err = registry.check_upkeep(deadline(), &keys).await.unwrap_err();
        match err {
            RegistryError::InfraFailure(msg) => assert!(msg.contains("header not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_infra_failure() {
        let chain = Arc::new(MockChain::new(100).fail_transport("connection refused"));
        let registry = registry(&chain, 10);

        let err = registry
            .check_upkeep(deadline(), &[UpkeepKey::new(100, U256::from(1u64))])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InfraFailure(_)));
    }

    #[tokio::test]
    async fn test_malformed_element_is_omitted() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_check(U256::from(1u64), CheckOutcome::needed(b"ok"))
                .with_check(U256::from(2u64), CheckOutcome::Malformed),
        );
        let registry = registry(&chain, 10);
        let keys = [
            UpkeepKey::new(100, U256::from(1u64)),
            UpkeepKey::new(100, U256::from(2u64)),
        ];

        let results = registry.check_upkeep(deadline(), &keys).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, keys[0]);
        assert!(results[0].is_eligible());
    }

    #[tokio::test]
    async fn test_key_at_block_zero_uses_latest() {
        let chain = Arc::new(MockChain::new(555).with_check(U256::from(1u64), CheckOutcome::NotNeeded));
        let registry = registry(&chain, 10);

        let key = UpkeepKey::new(0, U256::from(1u64));
        registry.check_upkeep(deadline(), &[key]).await.unwrap();
        assert_eq!(chain.last_call_block(), Some(555));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_slow_chain() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_check(U256::from(1u64), CheckOutcome::needed(b"ok"))
                .with_latency(Duration::from_secs(10)),
        );
        let registry = registry(&chain, 10);
        let deadline = Instant::now() + Duration::from_millis(100);

        let err = registry
            .check_upkeep(deadline, &[UpkeepKey::new(100, U256::from(1u64))])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_past_deadline_makes_no_calls() {
        let chain = Arc::new(MockChain::new(100));
        let registry = registry(&chain, 10);

        let err = registry
            .check_upkeep(Instant::now(), &[UpkeepKey::new(100, U256::from(1u64))])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(chain.check_batches(), 0);
    }

    #[tokio::test]
    async fn test_empty_keys_make_no_calls() {
        let chain = Arc::new(MockChain::new(100));
        let registry = registry(&chain, 10);
        assert!(registry.check_upkeep(deadline(), &[]).await.unwrap().is_empty());
        assert_eq!(chain.check_batches(), 0);
    }

    #[test]
    fn test_key_from_wire() {
        assert_eq!(
            key_from_wire("12|34").unwrap(),
            UpkeepKey::new(12, U256::from(34u64))
        );
        assert!(matches!(
            key_from_wire("12-34"),
            Err(RegistryError::UpkeepKeyNotParsable(_))
        ));
    }
}
