//! Daemon configuration (TOML).
//!
//! ```toml
//! [daemon]
//! socket = "/run/teller/teller.sock"
//! store_file = "/var/lib/teller/actions.json"
//! metrics_addr = "127.0.0.1:9464"
//! sweep_interval_secs = 60
//! ledger_timeout_ms = 5000
//! fraud_threshold = "300.00"
//!
//! [[account]]
//! owner_key = "guardian-1"
//! card_number = "1111222233"
//! display_name = "Alice"
//! opening_balance = "500.00"
//! approved_recipients = ["9876-5432-10"]
//! ```
//!
//! The `[[account]]` entries seed the demo in-memory ledger; a deployment
//! backed by a real ledger omits them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teller_core::Amount;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Structurally valid TOML with nonsense values.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TellerConfig {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Demo ledger account seeds.
    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountConfig>,
}

impl TellerConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects nonsense values fail-closed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.daemon.ledger_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.ledger_timeout_ms must be at least 1".to_string(),
            ));
        }
        if !self.daemon.fraud_threshold.is_positive() {
            return Err(ConfigError::Validation(
                "daemon.fraud_threshold must be greater than zero".to_string(),
            ));
        }
        for account in &self.accounts {
            if account.owner_key.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "account.owner_key must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// `[daemon]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the JSON protocol is served on.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Action snapshot file.
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,

    /// Prometheus scrape address.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on a single ledger call, in milliseconds.
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,

    /// Transfer amount above which the approved-recipient gate applies.
    #[serde(default = "default_fraud_threshold")]
    pub fraud_threshold: Amount,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            store_file: default_store_file(),
            metrics_addr: default_metrics_addr(),
            sweep_interval_secs: default_sweep_interval_secs(),
            ledger_timeout_ms: default_ledger_timeout_ms(),
            fraud_threshold: default_fraud_threshold(),
        }
    }
}

impl DaemonConfig {
    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Ledger timeout as a [`Duration`].
    #[must_use]
    pub const fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

/// One demo ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Identity string actions resolve against.
    pub owner_key: String,
    /// Account number shown to recipients.
    pub card_number: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Opening balance.
    pub opening_balance: Amount,
    /// Pre-registered approved recipients.
    #[serde(default)]
    pub approved_recipients: Vec<String>,
}

fn default_socket() -> PathBuf {
    PathBuf::from("teller.sock")
}

fn default_store_file() -> PathBuf {
    PathBuf::from("actions.json")
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9464".to_string()
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_ledger_timeout_ms() -> u64 {
    5000
}

fn default_fraud_threshold() -> Amount {
    Amount::from_major(300)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TellerConfig::from_toml("").unwrap();
        assert_eq!(config.daemon.sweep_interval_secs, 60);
        assert_eq!(config.daemon.ledger_timeout_ms, 5000);
        assert_eq!(config.daemon.fraud_threshold, Amount::from_major(300));
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_full_config_round_trip() {
        let config = TellerConfig::from_toml(
            r#"
            [daemon]
            socket = "/tmp/t.sock"
            store_file = "/tmp/actions.json"
            sweep_interval_secs = 5
            fraud_threshold = "250.50"

            [[account]]
            owner_key = "guardian-1"
            card_number = "1111222233"
            display_name = "Alice"
            opening_balance = "500.00"
            approved_recipients = ["9876-5432-10"]
            "#,
        )
        .unwrap();
        assert_eq!(config.daemon.fraud_threshold, Amount::from_cents(25050));
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].opening_balance, Amount::from_major(500));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let err = TellerConfig::from_toml("[daemon]\nsweep_interval_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_fraud_threshold_rejected() {
        let err =
            TellerConfig::from_toml("[daemon]\nfraud_threshold = \"0.00\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
