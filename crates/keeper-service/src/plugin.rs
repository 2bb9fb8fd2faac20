//! Reporting plugin factory.
//!
//! Each new protocol configuration gets its own [`UpkeepService`], sized so
//! that the `n - f` honest oracles together cover every upkeep with high
//! probability in a single round.

use std::sync::Arc;

use tracing::info;

use keeper_core::config::PluginSection;
use keeper_core::{KeeperConfig, SampleRatio};
use keeper_registry::Registry;

use crate::error::ServiceResult;
use crate::service::{ServiceConfig, UpkeepService};

/// Size limits advertised to the reporting protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginLimits {
    pub max_query_length: usize,
    pub max_observation_length: usize,
    pub max_report_length: usize,
}

impl Default for PluginLimits {
    fn default() -> Self {
        Self {
            max_query_length: 0,
            max_observation_length: 1_000,
            max_report_length: 10_000,
        }
    }
}

impl From<&PluginSection> for PluginLimits {
    fn from(section: &PluginSection) -> Self {
        Self {
            max_query_length: 0,
            max_observation_length: section.max_observation_length,
            max_report_length: section.max_report_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub limits: PluginLimits,
    /// At most one report per round.
    pub unique_reports: bool,
}

/// Per-instance parameters handed over by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginConfig {
    pub config_digest: [u8; 32],
    pub oracle_id: u8,
    /// Number of oracles.
    pub n: usize,
    /// Maximum number of faulty oracles.
    pub f: usize,
}

pub struct ReportingFactory {
    registry: Arc<dyn Registry>,
    service: ServiceConfig,
    limits: PluginLimits,
    rounds: u32,
    target_probability: f64,
}

impl ReportingFactory {
    pub fn new(
        registry: Arc<dyn Registry>,
        service: ServiceConfig,
        limits: PluginLimits,
        rounds: u32,
        target_probability: f64,
    ) -> Self {
        Self {
            registry,
            service,
            limits,
            rounds,
            target_probability,
        }
    }

    pub fn from_keeper_config(
        registry: Arc<dyn Registry>,
        config: &KeeperConfig,
    ) -> anyhow::Result<Self> {
        // Replaced per plugin once `n` and `f` are known.
        let service = ServiceConfig::from_keeper_config(config, SampleRatio::new(1.0))?;
        Ok(Self::new(
            registry,
            service,
            PluginLimits::from(&config.plugin),
            config.sampling.rounds,
            config.sampling.target_probability,
        ))
    }

    /// Start a service for one protocol instance.
    pub fn new_plugin(&self, config: PluginConfig) -> ServiceResult<(UpkeepService, PluginInfo)> {
        let honest = config.n.saturating_sub(config.f);
        let ratio = SampleRatio::from_probability(self.rounds, honest, self.target_probability)?;

        let service = UpkeepService::new(
            Arc::clone(&self.registry),
            ServiceConfig {
                sample_ratio: ratio,
                ..self.service.clone()
            },
        );
        let info = PluginInfo {
            name: format!(
                "Oracle {}: Keepers Plugin Instance w/ Digest '{}'",
                config.oracle_id,
                hex::encode(config.config_digest)
            ),
            limits: self.limits,
            unique_reports: true,
        };
        info!(name = %info.name, ratio = ratio.value(), honest, "plugin instance created");
        Ok((service, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use alloy_primitives::Address;
    use keeper_registry::testing::MockChain;
    use keeper_registry::{EvmRegistry, RegistryConfig};

    fn factory() -> ReportingFactory {
        let chain = Arc::new(MockChain::new(1));
        let registry = EvmRegistry::new(RegistryConfig::new(Address::ZERO), chain).unwrap();
        ReportingFactory::from_keeper_config(Arc::new(registry), &KeeperConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_new_plugin_info_and_ratio() {
        let factory = factory();
        let (service, info) = factory
            .new_plugin(PluginConfig {
                config_digest: [0xab; 32],
                oracle_id: 2,
                n: 4,
                f: 1,
            })
            .unwrap();

        assert_eq!(
            info.name,
            format!("Oracle 2: Keepers Plugin Instance w/ Digest '{}'", "ab".repeat(32))
        );
        assert!(info.unique_reports);
        assert_eq!(info.limits, PluginLimits::default());
        // 3 honest oracles at p = 0.99999 -> 0.98
        assert!((service.sample_ratio().value() - 0.98).abs() < 1e-9);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_plugin_rejects_no_honest_oracles() {
        let factory = factory();
        let err = factory
            .new_plugin(PluginConfig {
                config_digest: [0; 32],
                oracle_id: 0,
                n: 3,
                f: 3,
            })
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::Sampling(_)));
    }

    #[test]
    fn test_limits_from_section() {
        let section = PluginSection {
            max_observation_length: 500,
            max_report_length: 2_000,
        };
        let limits = PluginLimits::from(&section);
        assert_eq!(limits.max_query_length, 0);
        assert_eq!(limits.max_observation_length, 500);
        assert_eq!(limits.max_report_length, 2_000);
    }
}
