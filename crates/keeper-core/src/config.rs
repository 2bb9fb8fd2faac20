//! keeper.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub service: ServiceSection,
    pub sampling: SamplingSection,
    pub registry: RegistrySection,
    pub ledger: LedgerSection,
    pub plugin: PluginSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// How long a checked result stays fresh (e.g. "30s").
    pub cache_expiration: String,
    /// How often stale cache entries are physically removed.
    pub cache_eviction_interval: String,
    pub max_workers: usize,
    pub queue_length: usize,
    /// Keys per batched registry call.
    pub batch_size: usize,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            cache_expiration: "30s".to_string(),
            cache_eviction_interval: "5s".to_string(),
            max_workers: 10,
            queue_length: 1000,
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    pub rounds: u32,
    pub target_probability: f64,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            rounds: 1,
            target_probability: 0.99999,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Registry contract address (0x-prefixed hex).
    pub address: Option<String>,
    pub page_size: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            address: None,
            page_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Database file; in-memory when unset.
    pub path: Option<String>,
    pub pending_transmission_ttl: String,
    pub sweep_interval: String,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: None,
            pending_transmission_ttl: "10m".to_string(),
            sweep_interval: "1m".to_string(),
        }
    }
}

/// Smallest observation limit that fits an empty key list (`[]`).
pub const MIN_OBSERVATION_LENGTH: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    /// Bytes, at least [`MIN_OBSERVATION_LENGTH`].
    pub max_observation_length: usize,
    pub max_report_length: usize,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            max_observation_length: 1_000,
            max_report_length: 10_000,
        }
    }
}

impl KeeperConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: KeeperConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.service.max_workers > 0, "service.max_workers must be > 0");
        anyhow::ensure!(self.service.queue_length > 0, "service.queue_length must be > 0");
        anyhow::ensure!(self.service.batch_size > 0, "service.batch_size must be > 0");
        anyhow::ensure!(self.registry.page_size > 0, "registry.page_size must be > 0");
        anyhow::ensure!(
            self.plugin.max_observation_length >= MIN_OBSERVATION_LENGTH,
            "plugin.max_observation_length must be >= {MIN_OBSERVATION_LENGTH}"
        );
        parse_duration(&self.service.cache_expiration)?;
        parse_duration(&self.service.cache_eviction_interval)?;
        parse_duration(&self.ledger.pending_transmission_ttl)?;
        parse_duration(&self.ledger.sweep_interval)?;
        Ok(())
    }

    pub fn cache_expiration(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.service.cache_expiration)
    }

    pub fn cache_eviction_interval(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.service.cache_eviction_interval)
    }

    pub fn pending_transmission_ttl(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.ledger.pending_transmission_ttl)
    }

    pub fn ledger_sweep_interval(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.ledger.sweep_interval)
    }
}

/// Parse a duration string like "500ms", "30s", "5m" or "1h".
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (digits, millis_per_unit) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        anyhow::bail!("duration {s:?} has no unit (expected ms, s, m or h)");
    };
    let n = digits
        .trim()
        .parse::<u64>()
        .map_err(|e| anyhow::anyhow!("invalid duration {s:?}: {e}"))?;
    Ok(Duration::from_millis(n.saturating_mul(millis_per_unit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = KeeperConfig::from_toml_str("").unwrap();
        assert_eq!(config.service.max_workers, 10);
        assert_eq!(config.service.queue_length, 1000);
        assert_eq!(config.registry.page_size, 10_000);
        assert_eq!(config.plugin.max_report_length, 10_000);
        assert_eq!(config.cache_expiration().unwrap(), Duration::from_secs(30));
        assert!(config.ledger.path.is_none());
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[service]
max_workers = 4
cache_expiration = "2m"

[sampling]
target_probability = 0.95

[ledger]
path = "/var/lib/keepgrid/ledger.redb"
"#;
        let config = KeeperConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.service.max_workers, 4);
        assert_eq!(config.service.batch_size, 10);
        assert_eq!(config.cache_expiration().unwrap(), Duration::from_secs(120));
        assert_eq!(config.sampling.target_probability, 0.95);
        assert_eq!(config.sampling.rounds, 1);
        assert_eq!(
            config.ledger.path.as_deref(),
            Some("/var/lib/keepgrid/ledger.redb")
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(KeeperConfig::from_toml_str("[service]\nmax_workers = 0\n").is_err());
        assert!(KeeperConfig::from_toml_str("[service]\ncache_expiration = \"soon\"\n").is_err());
        assert!(KeeperConfig::from_toml_str("[registry]\npage_size = 0\n").is_err());
        assert!(KeeperConfig::from_toml_str("[plugin]\nmax_observation_length = 1\n").is_err());
        assert!(KeeperConfig::from_toml_str("[plugin]\nmax_observation_length = 2\n").is_ok());
    }

    #[test]
    fn test_round_trip_toml() {
        let config = KeeperConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("cache_expiration"));
        let back = KeeperConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back.service.queue_length, config.service.queue_length);
    }

    #[test]
    fn test_parse_duration_values() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("12").is_err());
        assert!(parse_duration("abcs").is_err());
    }
}
