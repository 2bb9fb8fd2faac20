//! UpkeepService — cached, single-flight eligibility checks.
//!
//! A check for a key is answered from the cache while fresh. Otherwise the
//! first caller registers the key as in flight and enqueues it on the worker
//! pool; concurrent callers for the same key attach to the in-flight entry
//! and receive the same outcome. Workers cache only successful results, so
//! a cancelled or failed check is retried by the next caller.
//!
//! ```text
//! check_upkeeps ──► cache hit? ──► done
//!        │
//!        └─► in-flight map ──► leader: WorkerPool ──► Registry::check_upkeep
//!                  ▲                                        │
//!                  └──── settle every waiter ◄── cache put ◄┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use keeper_core::{BlockKey, KeeperConfig, SampleRatio, UpkeepKey, UpkeepResult};
use keeper_registry::{Registry, RegistryError};

use crate::cache::ResultCache;
use crate::error::{ServiceError, ServiceResult};
use crate::pool::{SubmitError, WorkerPool};

/// Tuning for one [`UpkeepService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Share of active upkeeps checked per sampling round.
    pub sample_ratio: SampleRatio,
    pub cache_expiration: Duration,
    pub cache_eviction_interval: Duration,
    pub max_workers: usize,
    pub queue_length: usize,
    /// Keys per registry call.
    pub batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sample_ratio: SampleRatio::new(1.0),
            cache_expiration: Duration::from_secs(30),
            cache_eviction_interval: Duration::from_secs(5),
            max_workers: 10,
            queue_length: 1000,
            batch_size: 10,
        }
    }
}

impl ServiceConfig {
    /// Build from the `[service]` section, with the given sample ratio.
    pub fn from_keeper_config(
        config: &KeeperConfig,
        sample_ratio: SampleRatio,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            sample_ratio,
            cache_expiration: config.cache_expiration()?,
            cache_eviction_interval: config.cache_eviction_interval()?,
            max_workers: config.service.max_workers,
            queue_length: config.service.queue_length,
            batch_size: config.service.batch_size,
        })
    }
}

type Waiter = oneshot::Sender<ServiceResult<UpkeepResult>>;

/// One batch of keys for a worker, bounded by the leader's deadline.
struct CheckJob {
    keys: Vec<UpkeepKey>,
    deadline: Instant,
}

struct Shared {
    registry: Arc<dyn Registry>,
    cache: ResultCache<UpkeepKey, UpkeepResult>,
    in_flight: Mutex<HashMap<UpkeepKey, Vec<Waiter>>>,
}

impl Shared {
    /// Deliver `outcome` to every waiter on `key` and clear the entry.
    async fn settle(&self, key: &UpkeepKey, outcome: ServiceResult<UpkeepResult>) {
        let waiters = self.in_flight.lock().await.remove(key).unwrap_or_default();
        for waiter in waiters {
            // A waiter that gave up has dropped its receiver.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_job(&self, job: CheckJob) {
        let outcome = if Instant::now() >= job.deadline {
            debug!(keys = job.keys.len(), "abandoning job past its deadline");
            Err(ServiceError::Cancelled)
        } else {
            match tokio::time::timeout_at(
                job.deadline,
                self.registry.check_upkeep(job.deadline, &job.keys),
            )
            .await
            {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(e)) => Err(from_registry(e)),
                Err(_) => Err(ServiceError::Cancelled),
            }
        };

        match outcome {
            Ok(results) => {
                let mut by_key: HashMap<UpkeepKey, UpkeepResult> =
                    results.into_iter().map(|r| (r.key, r)).collect();
                for key in &job.keys {
                    match by_key.remove(key) {
                        Some(result) => {
                            // Cache before settling so a caller that misses the
                            // in-flight entry finds the result instead.
                            self.cache.put(*key, result.clone()).await;
                            self.settle(key, Ok(result)).await;
                        }
                        None => {
                            warn!(%key, "registry returned no result for key");
                            self.settle(key, Err(ServiceError::MissingResult(*key))).await;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(keys = job.keys.len(), error = %e, "check batch failed");
                for key in &job.keys {
                    self.settle(key, Err(e.clone())).await;
                }
            }
        }
    }
}

fn from_registry(e: RegistryError) -> ServiceError {
    if e.is_cancelled() {
        ServiceError::Cancelled
    } else {
        ServiceError::Registry(e)
    }
}

/// Eligibility checks over a [`Registry`] with caching, single-flight and
/// bounded concurrency.
pub struct UpkeepService {
    shared: Arc<Shared>,
    pool: WorkerPool<CheckJob>,
    sample_ratio: SampleRatio,
    batch_size: usize,
    shutdown_tx: watch::Sender<bool>,
    sweeper: JoinHandle<()>,
}

impl UpkeepService {
    /// Start the worker pool and cache sweeper. Must run inside a tokio
    /// runtime.
    pub fn new(registry: Arc<dyn Registry>, config: ServiceConfig) -> Self {
        let shared = Arc::new(Shared {
            registry,
            cache: ResultCache::new(config.cache_expiration),
            in_flight: Mutex::new(HashMap::new()),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = shared
            .cache
            .spawn_sweeper(config.cache_eviction_interval, shutdown_rx);

        let worker_shared = Arc::clone(&shared);
        let pool = WorkerPool::new(config.max_workers, config.queue_length, move |job: CheckJob| {
            let shared = Arc::clone(&worker_shared);
            async move { shared.run_job(job).await }
        });

        info!(
            ratio = config.sample_ratio.value(),
            workers = config.max_workers,
            queue = config.queue_length,
            batch = config.batch_size,
            "upkeep service started"
        );
        Self {
            shared,
            pool,
            sample_ratio: config.sample_ratio,
            batch_size: config.batch_size.max(1),
            shutdown_tx,
            sweeper,
        }
    }

    pub fn sample_ratio(&self) -> SampleRatio {
        self.sample_ratio
    }

    pub fn cache(&self) -> &ResultCache<UpkeepKey, UpkeepResult> {
        &self.shared.cache
    }

    /// Check a single key.
    pub async fn check_upkeep(
        &self,
        deadline: Instant,
        key: UpkeepKey,
    ) -> ServiceResult<UpkeepResult> {
        self.check_upkeeps(deadline, &[key])
            .await
            .remove(&key)
            .unwrap_or(Err(ServiceError::MissingResult(key)))
    }

    /// Check every key, returning one outcome per distinct key.
    pub async fn check_upkeeps(
        &self,
        deadline: Instant,
        keys: &[UpkeepKey],
    ) -> HashMap<UpkeepKey, ServiceResult<UpkeepResult>> {
        let mut outcomes = HashMap::with_capacity(keys.len());
        let mut seen = HashSet::with_capacity(keys.len());
        let mut pending = Vec::new();

        for key in keys {
            if !seen.insert(*key) {
                continue;
            }
            if Instant::now() >= deadline {
                outcomes.insert(*key, Err(ServiceError::Cancelled));
                continue;
            }
            match self.shared.cache.get_fresh(key).await {
                Some(result) => {
                    debug!(%key, "cache hit");
                    outcomes.insert(*key, Ok(result));
                }
                None => pending.push(*key),
            }
        }
        if pending.is_empty() {
            return outcomes;
        }

        // Join in-flight checks or lead new ones.
        let mut receivers = Vec::with_capacity(pending.len());
        let mut to_enqueue = Vec::new();
        {
            let mut in_flight = self.shared.in_flight.lock().await;
            for key in pending {
                if let Some(waiters) = in_flight.get_mut(&key) {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    receivers.push((key, rx));
                    continue;
                }
                // A worker may have cached the key since the first look.
                if let Some((result, true)) = self.shared.cache.get(&key).await {
                    outcomes.insert(key, Ok(result));
                    continue;
                }
                let (tx, rx) = oneshot::channel();
                in_flight.insert(key, vec![tx]);
                receivers.push((key, rx));
                to_enqueue.push(key);
            }
        }

        for chunk in to_enqueue.chunks(self.batch_size) {
            let job = CheckJob {
                keys: chunk.to_vec(),
                deadline,
            };
            if let Err(e) = self.pool.submit(job) {
                let error = match e {
                    SubmitError::QueueFull => ServiceError::QueueFull,
                    SubmitError::Stopped => ServiceError::Stopped,
                };
                warn!(keys = chunk.len(), error = %error, "check job rejected");
                for key in chunk {
                    self.shared.settle(key, Err(error.clone())).await;
                }
            }
        }

        for (key, rx) in receivers {
            let outcome = match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(ServiceError::Stopped),
                Err(_) => Err(ServiceError::Cancelled),
            };
            outcomes.insert(key, outcome);
        }
        outcomes
    }

    /// Sample active upkeeps at the latest block and return the eligible ones.
    ///
    /// Keys whose check failed are logged and left out. Fails with
    /// `Cancelled` if enumeration, or every sampled check, was cancelled.
    pub async fn sample_upkeeps(&self, deadline: Instant) -> ServiceResult<Vec<UpkeepResult>> {
        let mut keys = self
            .shared
            .registry
            .get_active_upkeep_keys(deadline, &BlockKey::latest())
            .await
            .map_err(from_registry)?;

        let total = keys.len();
        keys.shuffle(&mut rand::thread_rng());
        keys.truncate(self.sample_ratio.sample_count(total));
        debug!(total, sampled = keys.len(), "sampled active upkeeps");

        let outcomes = self.check_upkeeps(deadline, &keys).await;
        let mut eligible = Vec::new();
        let mut cancelled = 0usize;
        for (key, outcome) in outcomes {
            match outcome {
                Ok(result) if result.is_eligible() => eligible.push(result),
                Ok(_) => {}
                Err(e) => {
                    if e.is_cancelled() {
                        cancelled += 1;
                    }
                    warn!(%key, error = %e, "upkeep check failed");
                }
            }
        }
        if !keys.is_empty() && cancelled == keys.len() {
            return Err(ServiceError::Cancelled);
        }

        eligible.sort_by_key(|r| r.key);
        info!(sampled = keys.len(), eligible = eligible.len(), "sampling round complete");
        Ok(eligible)
    }

    /// Stop workers and the sweeper; settle every waiter with `Stopped`.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.sweeper.abort();
        self.pool.shutdown();

        let drained: Vec<_> = self.shared.in_flight.lock().await.drain().collect();
        for (_, waiters) in drained {
            for waiter in waiters {
                let _ = waiter.send(Err(ServiceError::Stopped));
            }
        }
        info!("upkeep service stopped");
    }
}

impl Drop for UpkeepService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use keeper_registry::testing::{CheckOutcome, MockChain};
    use keeper_registry::{EvmRegistry, RegistryConfig};

    fn key(id: u64) -> UpkeepKey {
        UpkeepKey::new(100, U256::from(id))
    }

    fn service(chain: &Arc<MockChain>, config: ServiceConfig) -> UpkeepService {
        let registry = EvmRegistry::new(
            RegistryConfig::new(Address::repeat_byte(0x22)),
            chain.clone(),
        )
        .unwrap();
        UpkeepService::new(Arc::new(registry), config)
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_remote_call() {
        let chain = Arc::new(MockChain::new(100).with_check(U256::from(1u64), CheckOutcome::needed(b"x")));
        let svc = service(&chain, ServiceConfig::default());

        let first = svc.check_upkeep(far(), key(1)).await.unwrap();
        assert!(first.is_eligible());
        assert_eq!(chain.check_calls(), 1);

        let second = svc.check_upkeep(far(), key(1)).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(chain.check_calls(), 1);
        svc.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_for_concurrent_callers() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_check(U256::from(1u64), CheckOutcome::needed(b"x"))
                .with_latency(Duration::from_millis(200)),
        );
        let svc = Arc::new(service(&chain, ServiceConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move { svc.check_upkeep(far(), key(1)).await }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(chain.check_calls_for(U256::from(1u64)), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        svc.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_and_caches_nothing() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_check(U256::from(1u64), CheckOutcome::needed(b"x"))
                .with_latency(Duration::from_secs(10)),
        );
        let svc = service(&chain, ServiceConfig::default());

        let deadline = Instant::now() + Duration::from_secs(1);
        let err = svc.check_upkeep(deadline, key(1)).await.unwrap_err();
        assert_eq!(err, ServiceError::Cancelled);

        // Let the worker observe its own deadline and settle.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(svc.cache().get(&key(1)).await.is_none());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_past_deadline_is_cancelled_without_work() {
        let chain = Arc::new(MockChain::new(100));
        let svc = service(&chain, ServiceConfig::default());

        let err = svc.check_upkeep(Instant::now(), key(1)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(chain.check_calls(), 0);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let chain = Arc::new(
            MockChain::new(100).with_check(U256::from(1u64), CheckOutcome::RpcError("boom".into())),
        );
        let svc = service(&chain, ServiceConfig::default());

        let err = svc.check_upkeep(far(), key(1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Registry(RegistryError::InfraFailure(_))));
        assert!(svc.cache().is_empty().await);

        svc.check_upkeep(far(), key(1)).await.unwrap_err();
        assert_eq!(chain.check_calls(), 2);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_batches_keys() {
        let chain = Arc::new(MockChain::new(100));
        let config = ServiceConfig {
            batch_size: 3,
            ..ServiceConfig::default()
        };
        let svc = service(&chain, config);

        let keys: Vec<_> = (1..=7).map(key).collect();
        let outcomes = svc.check_upkeeps(far(), &keys).await;
        assert_eq!(outcomes.len(), 7);
        assert!(outcomes.values().all(|o| matches!(o, Ok(r) if !r.is_eligible())));
        assert_eq!(chain.check_batches(), 3);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_with_error() {
        let chain = Arc::new(MockChain::new(100).with_latency(Duration::from_millis(300)));
        let config = ServiceConfig {
            max_workers: 1,
            queue_length: 1,
            batch_size: 1,
            ..ServiceConfig::default()
        };
        let svc = service(&chain, config);

        let keys: Vec<_> = (1..=5).map(key).collect();
        let outcomes = svc.check_upkeeps(far(), &keys).await;
        let rejected = outcomes
            .values()
            .filter(|o| matches!(o, Err(ServiceError::QueueFull)))
            .count();
        assert!(rejected >= 3, "expected at least 3 rejections, got {rejected}");
        assert!(outcomes.values().any(|o| o.is_ok()));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_sample_returns_only_eligible() {
        let chain = Arc::new(
            MockChain::new(100)
                .with_active_ids((1..=6).map(U256::from).collect())
                .with_check(U256::from(2u64), CheckOutcome::needed(b"a"))
                .with_check(U256::from(5u64), CheckOutcome::needed(b"b")),
        );
        let svc = service(&chain, ServiceConfig::default());

        let eligible = svc.sample_upkeeps(far()).await.unwrap();
        let ids: Vec<_> = eligible.iter().map(|r| r.key.id).collect();
        assert_eq!(ids, vec![U256::from(2u64), U256::from(5u64)]);
        assert!(eligible.iter().all(|r| r.key.block == 100));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_sample_ratio_limits_checks() {
        let chain = Arc::new(MockChain::new(100).with_active_ids((1..=10).map(U256::from).collect()));
        let config = ServiceConfig {
            sample_ratio: SampleRatio::new(0.3),
            ..ServiceConfig::default()
        };
        let svc = service(&chain, config);

        svc.sample_upkeeps(far()).await.unwrap();
        assert_eq!(chain.check_calls(), 3);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_sample_small_population_checks_at_least_one() {
        // 100 honest nodes give a ratio of 0.11, which rounds 4 keys down to 0.
        let ratio = SampleRatio::from_probability(1, 100, 0.99999).unwrap();
        let mut chain = MockChain::new(100).with_active_ids((1..=4).map(U256::from).collect());
        for id in 1..=4u64 {
            chain = chain.with_check(U256::from(id), CheckOutcome::needed(b"p"));
        }
        let chain = Arc::new(chain);
        let config = ServiceConfig {
            sample_ratio: ratio,
            ..ServiceConfig::default()
        };
        let svc = service(&chain, config);

        for _ in 0..5 {
            let eligible = svc.sample_upkeeps(far()).await.unwrap();
            assert_eq!(eligible.len(), 1);
        }
        assert!(chain.check_calls() >= 1);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let chain = Arc::new(MockChain::new(100));
        let svc = service(&chain, ServiceConfig::default());
        svc.shutdown().await;

        let err = svc.check_upkeep(far(), key(1)).await.unwrap_err();
        assert_eq!(err, ServiceError::Stopped);
    }
}
