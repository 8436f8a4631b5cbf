//! Ledger configuration

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::account::DEFAULT_INITIAL_BALANCE;
use super::block::HashTarget;
use super::crypto::DEFAULT_KEY_BITS;
use super::pow::MiningLimits;

const DEFAULT_MAX_ATTEMPTS: u64 = 10_000_000;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub hash_target: HashTarget,
    pub default_balance: u64,
    pub key_bits: usize,
    pub mining: MiningConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub max_attempts: Option<u64>,
    pub max_duration_ms: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            hash_target: HashTarget::default(),
            default_balance: DEFAULT_INITIAL_BALANCE,
            key_bits: DEFAULT_KEY_BITS,
            mining: MiningConfig::default(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            max_duration_ms: None,
        }
    }
}

impl MiningConfig {
    pub fn limits(&self) -> MiningLimits {
        MiningLimits {
            max_attempts: self.max_attempts,
            max_duration: self.max_duration_ms.map(Duration::from_millis),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::DEFAULT_HASH_TARGET;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();

        assert_eq!(config.hash_target.as_str(), DEFAULT_HASH_TARGET);
        assert_eq!(config.default_balance, 100);
        assert_eq!(config.key_bits, 2048);
        assert_eq!(config.mining.limits().max_attempts, Some(DEFAULT_MAX_ATTEMPTS));
        assert_eq!(config.mining.limits().max_duration, None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            default_balance = 250

            [mining]
            max_duration_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.default_balance, 250);
        assert_eq!(config.hash_target.as_str(), DEFAULT_HASH_TARGET);
        assert_eq!(config.mining.limits().max_duration, Some(Duration::from_millis(1500)));
        assert_eq!(config.mining.max_attempts, Some(DEFAULT_MAX_ATTEMPTS));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let result = LedgerConfig::from_toml_str(r#"hash_target = "00ff""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hash_target = \"{}\"", "0".repeat(4) + &"f".repeat(60)).unwrap();
        writeln!(file, "key_bits = 1024").unwrap();

        let config = LedgerConfig::load(file.path()).unwrap();
        assert_eq!(config.key_bits, 1024);
        assert!(config.hash_target.as_str().starts_with("0000f"));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            LedgerConfig::load("/nonexistent/sim_ledger.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
