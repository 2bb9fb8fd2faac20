//! Scripted in-memory chain for tests.
//!
//! Answers registry calls from a fixed script: an active upkeep list, a
//! per-id check outcome and a per-id simulate outcome. Counts batches and
//! calls per method so tests can assert on round trips.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::{Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolType, SolValue};
use async_trait::async_trait;

use crate::abi::{
    checkUpkeepCall, getActiveUpkeepIDsCall, getStateCall, simulatePerformUpkeepCall,
    CheckUpkeepReturn, GetStateReturn, OnchainConfig, State, WrappedPerformData,
};
use crate::client::{CallError, CallRequest, CallResponse, ChainClient, TransportError};

/// Scripted response to `checkUpkeep`.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Needed { perform_data: Bytes, check_block: u32 },
    NotNeeded,
    Revert(String),
    RpcError(String),
    /// Return data that does not decode.
    Malformed,
}

impl CheckOutcome {
    pub fn needed(perform_data: &[u8]) -> Self {
        CheckOutcome::Needed {
            perform_data: Bytes::copy_from_slice(perform_data),
            check_block: 1,
        }
    }
}

/// Scripted response to `simulatePerformUpkeep`.
#[derive(Debug, Clone)]
pub enum SimulateOutcome {
    Success,
    Failure,
    Revert(String),
    RpcError(String),
}

#[derive(Default)]
struct Counters {
    state_fetches: AtomicUsize,
    page_fetches: AtomicUsize,
    check_batches: AtomicUsize,
    check_calls: AtomicUsize,
    simulate_batches: AtomicUsize,
    simulate_calls: AtomicUsize,
}

pub struct MockChain {
    block_number: u64,
    active_ids: Vec<U256>,
    reported_count: Option<u64>,
    checks: HashMap<U256, CheckOutcome>,
    simulations: HashMap<U256, SimulateOutcome>,
    latency: Duration,
    transport_error: Option<String>,
    counters: Counters,
    last_block: AtomicU64,
    checked_ids: Mutex<Vec<U256>>,
}

impl MockChain {
    /// A chain whose latest block is `block_number`. Unscripted checks
    /// report "not needed"; unscripted simulations succeed.
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            active_ids: Vec::new(),
            reported_count: None,
            checks: HashMap::new(),
            simulations: HashMap::new(),
            latency: Duration::ZERO,
            transport_error: None,
            counters: Counters::default(),
            last_block: AtomicU64::new(0),
            checked_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn with_active_ids(mut self, ids: Vec<U256>) -> Self {
        self.active_ids = ids;
        self
    }

    /// Override the upkeep count reported by `getState`.
    pub fn with_reported_count(mut self, count: u64) -> Self {
        self.reported_count = Some(count);
        self
    }

    pub fn with_check(mut self, id: U256, outcome: CheckOutcome) -> Self {
        self.checks.insert(id, outcome);
        self
    }

    pub fn with_simulate(mut self, id: U256, outcome: SimulateOutcome) -> Self {
        self.simulations.insert(id, outcome);
        self
    }

    /// Delay every batch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every batch in transit.
    pub fn fail_transport(mut self, message: &str) -> Self {
        self.transport_error = Some(message.to_string());
        self
    }

    pub fn state_fetches(&self) -> usize {
        self.counters.state_fetches.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> usize {
        self.counters.page_fetches.load(Ordering::SeqCst)
    }

    pub fn check_batches(&self) -> usize {
        self.counters.check_batches.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> usize {
        self.counters.check_calls.load(Ordering::SeqCst)
    }

    pub fn simulate_batches(&self) -> usize {
        self.counters.simulate_batches.load(Ordering::SeqCst)
    }

    pub fn simulate_calls(&self) -> usize {
        self.counters.simulate_calls.load(Ordering::SeqCst)
    }

    /// Number of times `id` went through `checkUpkeep`.
    pub fn check_calls_for(&self, id: U256) -> usize {
        self.checked_ids
            .lock()
            .unwrap()
            .iter()
            .filter(|checked| **checked == id)
            .count()
    }

    /// Block of the most recent call, if any call was made.
    pub fn last_call_block(&self) -> Option<u64> {
        match self.last_block.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    fn answer(&self, call: &CallRequest) -> CallResponse {
        self.last_block.store(call.block, Ordering::SeqCst);
        let data = call.data.as_ref();
        let selector = data.get(..4).unwrap_or_default();

        if selector == getStateCall::SELECTOR {
            self.counters.state_fetches.fetch_add(1, Ordering::SeqCst);
            let state = State {
                numUpkeeps: U256::from(
                    self.reported_count.unwrap_or(self.active_ids.len() as u64),
                ),
                ..Default::default()
            };
            let encoded = <GetStateReturn as SolType>::abi_encode_params(&(
                state,
                OnchainConfig::default(),
                Vec::<alloy_primitives::Address>::new(),
                Vec::<alloy_primitives::Address>::new(),
                1u8,
            ));
            Ok(encoded.into())
        } else if selector == getActiveUpkeepIDsCall::SELECTOR {
            self.counters.page_fetches.fetch_add(1, Ordering::SeqCst);
            let args = <getActiveUpkeepIDsCall as SolCall>::abi_decode(data)
                .map_err(|e| CallError::Rpc(e.to_string()))?;
            let len = self.active_ids.len();
            let start = usize::try_from(args.startIndex).unwrap_or(len).min(len);
            let count = usize::try_from(args.maxCount).unwrap_or(len);
            let end = start.saturating_add(count).min(len);
            Ok((self.active_ids[start..end].to_vec(),).abi_encode_params().into())
        } else if selector == checkUpkeepCall::SELECTOR {
            self.counters.check_calls.fetch_add(1, Ordering::SeqCst);
            let args = <checkUpkeepCall as SolCall>::abi_decode(data)
                .map_err(|e| CallError::Rpc(e.to_string()))?;
            self.checked_ids.lock().unwrap().push(args.id);
            self.answer_check(args.id)
        } else if selector == simulatePerformUpkeepCall::SELECTOR {
            self.counters.simulate_calls.fetch_add(1, Ordering::SeqCst);
            let args = <simulatePerformUpkeepCall as SolCall>::abi_decode(data)
                .map_err(|e| CallError::Rpc(e.to_string()))?;
            let outcome = self
                .simulations
                .get(&args.id)
                .cloned()
                .unwrap_or(SimulateOutcome::Success);
            match outcome {
                SimulateOutcome::Success => Ok((true, U256::from(90_000u64)).abi_encode_params().into()),
                SimulateOutcome::Failure => Ok((false, U256::from(90_000u64)).abi_encode_params().into()),
                SimulateOutcome::Revert(reason) => Err(CallError::Reverted(reason)),
                SimulateOutcome::RpcError(msg) => Err(CallError::Rpc(msg)),
            }
        } else {
            Err(CallError::Rpc("method not found".to_string()))
        }
    }

    fn answer_check(&self, id: U256) -> CallResponse {
        let outcome = self.checks.get(&id).cloned().unwrap_or(CheckOutcome::NotNeeded);
        let (needed, perform_data) = match outcome {
            CheckOutcome::Needed {
                perform_data,
                check_block,
            } => {
                let wrapped = WrappedPerformData {
                    checkBlockNumber: check_block,
                    checkBlockhash: B256::repeat_byte(0xab),
                    performData: perform_data,
                };
                (true, Bytes::from(wrapped.abi_encode()))
            }
            CheckOutcome::NotNeeded => (false, Bytes::new()),
            CheckOutcome::Revert(reason) => return Err(CallError::Reverted(reason)),
            CheckOutcome::RpcError(msg) => return Err(CallError::Rpc(msg)),
            CheckOutcome::Malformed => return Ok(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])),
        };
        let encoded = <CheckUpkeepReturn as SolType>::abi_encode_params(&(
            needed,
            perform_data,
            0u8,
            U256::from(50_000u64),
            U256::from(25_000_000_000u64),
            U256::from(4_000_000_000_000_000u64),
        ));
        Ok(encoded.into())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, TransportError> {
        if let Some(msg) = &self.transport_error {
            return Err(TransportError(msg.clone()));
        }
        Ok(self.block_number)
    }

    async fn batch_call(&self, calls: Vec<CallRequest>) -> Result<Vec<CallResponse>, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(msg) = &self.transport_error {
            return Err(TransportError(msg.clone()));
        }

        let first = calls.first().and_then(|c| c.data.get(..4)).unwrap_or_default();
        if first == checkUpkeepCall::SELECTOR {
            self.counters.check_batches.fetch_add(1, Ordering::SeqCst);
        } else if first == simulatePerformUpkeepCall::SELECTOR {
            self.counters.simulate_batches.fetch_add(1, Ordering::SeqCst);
        }

        Ok(calls.iter().map(|call| self.answer(call)).collect())
    }
}
