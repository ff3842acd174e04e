//! Platform configuration.
//!
//! Loaded from a TOML file (every field has a default), then overridden by
//! `MTP_DATABASE_URL` and `MTP_LOG`. The resulting struct is passed into
//! constructors explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mtp_core::{Ledger, LedgerId, default_ledgers};
use mtp_ledgers::{ElementsSettings, IrohaSettings};

pub const ENV_DATABASE_URL: &str = "MTP_DATABASE_URL";
pub const ENV_LOG: &str = "MTP_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLx SQLite URL, e.g. `sqlite://mtp.db` or `sqlite::memory:`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mtp.db".to_string(),
            max_connections: 4,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound on a single ledger adapter call.
    pub adapter_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: 30_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSeed {
    pub id: u64,
    pub name: String,
}

impl From<&LedgerSeed> for Ledger {
    fn from(seed: &LedgerSeed) -> Self {
        Ledger::new(LedgerId::new(seed.id), seed.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub database: DatabaseConfig,
    pub coordinator: CoordinatorConfig,
    pub ledgers: Vec<LedgerSeed>,
    pub iroha: IrohaSettings,
    pub elements: ElementsSettings,
    pub logging: LoggingConfig,
    /// JSON-lines file for parked bookings; in memory when unset.
    pub out_of_sync_log: Option<PathBuf>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            coordinator: CoordinatorConfig::default(),
            ledgers: default_ledgers()
                .into_iter()
                .map(|l| LedgerSeed {
                    id: l.ledger_id.get(),
                    name: l.name,
                })
                .collect(),
            iroha: IrohaSettings::default(),
            elements: ElementsSettings::default(),
            logging: LoggingConfig::default(),
            out_of_sync_log: None,
        }
    }
}

impl PlatformConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// File (if given) plus process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.merge_with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn merge_with_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            self.database.url = url;
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.logging.filter = filter;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledgers.is_empty() {
            return Err(ConfigError::Invalid("at least one ledger must be configured".to_string()));
        }
        let mut ids: Vec<u64> = self.ledgers.iter().map(|l| l.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.ledgers.len() {
            return Err(ConfigError::Invalid("ledger ids must be unique".to_string()));
        }
        if self.ledgers.iter().any(|l| l.id == 0 || l.id > i64::MAX as u64) {
            return Err(ConfigError::Invalid("ledger ids must be positive 63-bit integers".to_string()));
        }
        if self.coordinator.adapter_timeout_ms == 0 {
            return Err(ConfigError::Invalid("coordinator.adapter_timeout_ms must be positive".to_string()));
        }
        if self.iroha.precision < mtp_core::Amount::SCALE {
            return Err(ConfigError::Invalid(format!(
                "iroha.precision must be at least {}",
                mtp_core::Amount::SCALE
            )));
        }
        Ok(())
    }

    pub fn ledgers(&self) -> Vec<Ledger> {
        self.ledgers.iter().map(Ledger::from).collect()
    }
}
