//! Settlement configuration
//!
//! Loaded from an optional JSON file; every field has a default so a
//! partial file is enough.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::crypto::MAINNET_MAGIC;
use crate::storage::StorageConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine and reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SettlementConfig {
    /// Network magic mixed into every signed message
    pub network_magic: u32,
    pub rpc_url: String,
    /// Upper bound for any single chain call
    pub rpc_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Blocks added to the current count for a proposal's deadline
    pub valid_block_window: u32,
    /// Re-send an unconfirmed transaction after this long
    pub rebroadcast_after_secs: u64,
    pub data_dir: PathBuf,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            network_magic: MAINNET_MAGIC,
            rpc_url: "http://seed1.neo.org:10332".to_string(),
            rpc_timeout_secs: 10,
            reconcile_interval_secs: 15,
            valid_block_window: 5760,
            rebroadcast_after_secs: 60,
            data_dir: PathBuf::from(".settlement_data"),
        }
    }
}

impl SettlementConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "rpc_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.valid_block_window == 0 {
            return Err(ConfigError::Invalid {
                field: "valid_block_window",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "rpc_url",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn rebroadcast_after(&self) -> Duration {
        Duration::from_secs(self.rebroadcast_after_secs)
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig::in_dir(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TESTNET_MAGIC;

    #[test]
    fn test_defaults() {
        let config = SettlementConfig::default();
        assert_eq!(config.network_magic, 0x334F454E);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(15));
        assert_eq!(config.valid_block_window, 5760);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settlement.json");
        fs::write(
            &path,
            format!(
                r#"{{"network_magic": {}, "rpc_url": "http://localhost:20332"}}"#,
                TESTNET_MAGIC
            ),
        )
        .unwrap();

        let config = SettlementConfig::load(&path).unwrap();
        assert_eq!(config.network_magic, TESTNET_MAGIC);
        assert_eq!(config.rpc_url, "http://localhost:20332");
        assert_eq!(config.rpc_timeout_secs, 10);
        assert_eq!(config.storage().data_dir, PathBuf::from(".settlement_data"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settlement.json");
        fs::write(&path, r#"{"reconcile_interval_secs": 0}"#).unwrap();
        assert!(matches!(
            SettlementConfig::load(&path),
            Err(ConfigError::Invalid {
                field: "reconcile_interval_secs",
                ..
            })
        ));

        let config = SettlementConfig {
            rpc_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settlement.json");
        fs::write(&path, "rpc_url = nope").unwrap();
        assert!(matches!(
            SettlementConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
