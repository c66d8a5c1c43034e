//! Configuration for the indexer daemon.
//!
//! TOML config file; on first run a default config is generated in the data
//! directory. `max_cache_items` is the only performance-critical tunable: it
//! bounds worst-case resident memory of the outpoint cache.

use crate::error::AppError;
use crate::types::NetworkType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Platform-specific base data directory.
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("indexd")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".indexd")
    }
}

/// Network-specific subdirectory (mainnet uses the base directory).
pub fn get_network_data_dir(network: &NetworkType) -> PathBuf {
    let base = get_data_dir();
    match network {
        NetworkType::Mainnet => base,
        NetworkType::Testnet => base.join("testnet"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub indexer: IndexerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_network() -> String {
    "testnet".to_string()
}

impl NodeConfig {
    pub fn network_type(&self) -> NetworkType {
        match self.network.to_lowercase().as_str() {
            "mainnet" => NetworkType::Mainnet,
            _ => NetworkType::Testnet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override for the data directory; defaults to the platform directory.
    pub data_dir: Option<PathBuf>,
    /// Upper bound on resident outpoint cache entries.
    #[serde(default = "default_max_cache_items")]
    pub max_cache_items: usize,
    /// Seconds between periodic dirty-cache flushes.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_max_cache_items() -> usize {
    60_000
}

fn default_flush_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Blocks below `tip - max_reorg_depth` are considered final; their
    /// rewind entries become eligible for purging.
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u64,
    /// Checkpoint (flush + purge) every this many connected blocks.
    #[serde(default = "default_checkpoint_interval_blocks")]
    pub checkpoint_interval_blocks: u64,
}

fn default_max_reorg_depth() -> u64 {
    1_000
}

fn default_checkpoint_interval_blocks() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                name: "indexd".to_string(),
                network: default_network(),
            },
            storage: StorageConfig {
                data_dir: None,
                max_cache_items: default_max_cache_items(),
                flush_interval_secs: default_flush_interval_secs(),
            },
            indexer: IndexerConfig {
                max_reorg_depth: default_max_reorg_depth(),
                checkpoint_interval_blocks: default_checkpoint_interval_blocks(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {}: {}", path, e)))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), AppError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = PathBuf::from(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Load the config, writing a default one on first run.
    pub fn load_or_create(path: &str) -> Result<Self, AppError> {
        if PathBuf::from(path).exists() {
            Self::load_from_file(path)
        } else {
            let config = Config::default();
            config.save_to_file(path)?;
            tracing::info!("📝 Generated default config at {}", path);
            Ok(config)
        }
    }

    /// Fail fast on misconfiguration; surfaced as a startup failure.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.storage.max_cache_items == 0 {
            return Err(AppError::Config(
                "storage.max_cache_items must be greater than zero".to_string(),
            ));
        }
        if self.storage.flush_interval_secs == 0 {
            return Err(AppError::Config(
                "storage.flush_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.indexer.checkpoint_interval_blocks == 0 {
            return Err(AppError::Config(
                "indexer.checkpoint_interval_blocks must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| get_network_data_dir(&self.node.network_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.max_cache_items, 60_000);
        assert_eq!(config.node.network_type(), NetworkType::Testnet);
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        let mut config = Config::default();
        config.storage.max_cache_items = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed.indexer.max_reorg_depth,
            config.indexer.max_reorg_depth
        );
    }
}
