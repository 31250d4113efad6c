//! Tiered store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::policy::{AllocatorKind, EvictorKind};

/// Default configuration constants
///
/// All defaults used by the store live here so that deployments only have to
/// spell out what they change.
pub mod defaults {

    // Policy defaults
    /// Demote eviction victims into slower tiers instead of dropping them
    pub const DEMOTE: bool = true;

    /// Plan/execute attempts before an allocation gives up
    pub const MAX_EVICTION_RETRIES: u32 = 3;

    /// Internal lock wait: 5 seconds
    pub const LOCK_TIMEOUT_MS: u64 = 5_000;

    // Metrics defaults
    pub const METRICS_ENABLED: bool = true;

    pub const METRICS_REPORT_INTERVAL_SECS: u64 = 10;

    pub const fn default_metrics_instance() -> &'static str {
        "worker"
    }

    // Log level
    /// Default log level
    pub const fn default_log_level() -> &'static str {
        "info"
    }

    // Default layout used by `StoreConfig::default()`
    /// Memory tier: one 64 MiB dir
    pub const MEM_DIR_CAPACITY: u64 = 64 * 1024 * 1024;

    /// SSD tier: two 256 MiB dirs
    pub const SSD_DIR_CAPACITY: u64 = 256 * 1024 * 1024;
}

/// Tiered store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Worker node configuration
    pub node: NodeConfig,

    /// Tiers, fastest first
    pub tiers: Vec<TierConfig>,

    /// Allocation, eviction and locking policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    defaults::default_log_level().to_string()
}

/// One storage tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Human readable tier name ("MEM", "SSD", ...)
    pub alias: String,

    /// Dirs of this tier, in index order
    pub dirs: Vec<DirConfig>,
}

/// One storage dir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirConfig {
    /// Root path of the dir
    pub path: PathBuf,

    /// Capacity in bytes
    pub capacity_bytes: u64,
}

/// Policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub allocator: AllocatorKind,

    #[serde(default)]
    pub evictor: EvictorKind,

    /// Move victims to a slower tier when it has room
    #[serde(default = "default_demote")]
    pub demote: bool,

    #[serde(default = "default_max_eviction_retries")]
    pub max_eviction_retries: u32,

    /// Upper bound on internal lock waits, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_demote() -> bool {
    defaults::DEMOTE
}

fn default_max_eviction_retries() -> u32 {
    defaults::MAX_EVICTION_RETRIES
}

fn default_lock_timeout_ms() -> u64 {
    defaults::LOCK_TIMEOUT_MS
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorKind::default(),
            evictor: EvictorKind::default(),
            demote: default_demote(),
            max_eviction_retries: default_max_eviction_retries(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl PolicyConfig {
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Instance name attached to reported metrics
    #[serde(default = "default_metrics_instance")]
    pub instance: String,

    /// Seconds between periodic reports (0 = report only on demand)
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_metrics_enabled() -> bool {
    defaults::METRICS_ENABLED
}

fn default_metrics_instance() -> String {
    defaults::default_metrics_instance().to_string()
}

fn default_report_interval_secs() -> u64 {
    defaults::METRICS_REPORT_INTERVAL_SECS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            instance: default_metrics_instance(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                node_id: "node1".to_string(),
                log_level: default_log_level(),
            },
            tiers: vec![
                TierConfig {
                    alias: "MEM".to_string(),
                    dirs: vec![DirConfig {
                        path: PathBuf::from("/tmp/tierstore/mem0"),
                        capacity_bytes: defaults::MEM_DIR_CAPACITY,
                    }],
                },
                TierConfig {
                    alias: "SSD".to_string(),
                    dirs: vec![
                        DirConfig {
                            path: PathBuf::from("/tmp/tierstore/ssd0"),
                            capacity_bytes: defaults::SSD_DIR_CAPACITY,
                        },
                        DirConfig {
                            path: PathBuf::from("/tmp/tierstore/ssd1"),
                            capacity_bytes: defaults::SSD_DIR_CAPACITY,
                        },
                    ],
                },
            ],
            policy: PolicyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializeError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| ConfigError::WriteError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "Node ID cannot be empty".to_string(),
            ));
        }

        if self.tiers.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one tier is required".to_string(),
            ));
        }

        for (ordinal, tier) in self.tiers.iter().enumerate() {
            if tier.dirs.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Tier {} ({}) has no dirs",
                    ordinal, tier.alias
                )));
            }
            for (index, dir) in tier.dirs.iter().enumerate() {
                if dir.capacity_bytes == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "Dir {} of tier {} ({}) has zero capacity",
                        index, ordinal, tier.alias
                    )));
                }
            }
        }

        if self.policy.max_eviction_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_eviction_retries must be at least 1".to_string(),
            ));
        }

        match self.node.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.node.log_level
                )));
            }
        }

        Ok(())
    }

    /// Sum of all dir capacities
    pub fn total_capacity(&self) -> u64 {
        self.tiers
            .iter()
            .flat_map(|t| t.dirs.iter())
            .map(|d| d.capacity_bytes)
            .sum()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.node.node_id, "node1");
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[0].alias, "MEM");
        assert_eq!(config.policy.allocator, AllocatorKind::MaxFree);
        assert_eq!(config.policy.evictor, EvictorKind::Lru);
        assert!(config.policy.demote);
        assert_eq!(
            config.total_capacity(),
            defaults::MEM_DIR_CAPACITY + 2 * defaults::SSD_DIR_CAPACITY
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::default();

        config.node.node_id = "".to_string();
        assert!(config.validate().is_err());
        config.node.node_id = "node1".to_string();

        config.tiers[1].dirs[0].capacity_bytes = 0;
        assert!(config.validate().is_err());
        config.tiers[1].dirs[0].capacity_bytes = 1024;

        config.tiers[0].dirs.clear();
        assert!(config.validate().is_err());

        config.tiers.clear();
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.policy.max_eviction_retries = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.node.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_defaults_from_partial_toml() {
        let config = StoreConfig::from_toml(
            r#"
            [node]
            node_id = "w7"

            [[tiers]]
            alias = "MEM"
            dirs = [{ path = "/mnt/ramdisk", capacity_bytes = 1024 }]

            [policy]
            allocator = "round_robin"
            evictor = "greedy"
            "#,
        )
        .unwrap();

        assert_eq!(config.node.log_level, "info");
        assert_eq!(config.policy.allocator, AllocatorKind::RoundRobin);
        assert_eq!(config.policy.evictor, EvictorKind::Greedy);
        assert_eq!(config.policy.max_eviction_retries, defaults::MAX_EVICTION_RETRIES);
        assert_eq!(config.metrics.instance, "worker");
        assert_eq!(config.tiers[0].dirs[0].path, PathBuf::from("/mnt/ramdisk"));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = StoreConfig::from_toml("[node]\nnode_id = \"w\"\ntiers = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)), "{}", err);

        let err = StoreConfig::from_toml("not toml at all [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)), "{}", err);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");

        let mut config = StoreConfig::default();
        config.policy.lock_timeout_ms = 250;
        config.to_file(&path).unwrap();

        let loaded = StoreConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.policy.lock_timeout(), std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file() {
        let err = StoreConfig::from_file("/nonexistent/tierstore.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
