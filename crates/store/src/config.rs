use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Tunables for a store
///
/// Every field has a default, so an empty `config.toml` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Idle time before a cached item accessor is evicted
    pub accessor_cache_idle_ms: u64,
    /// Idle time before an unwatched document is evicted
    pub document_cache_idle_ms: u64,
    /// Idle time before decoded file contents are evicted
    pub decoded_cache_idle_ms: u64,
    /// Maximum number of decoded file contents kept
    pub decoded_cache_capacity: u64,
    /// Window in which repeated `save_soon` calls collapse into one save
    pub save_debounce_ms: u64,
    /// Time a watched document may spend applying deltas before yielding
    pub delta_tick_budget_ms: u64,
    /// How long folder creation waits for the store's creation lock
    pub lock_timeout_ms: u64,
    /// Pull/push rounds before sync gives up on converging
    pub max_sync_rounds: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            accessor_cache_idle_ms: 5_000,
            document_cache_idle_ms: 5_000,
            decoded_cache_idle_ms: 5_000,
            decoded_cache_capacity: 1_000,
            save_debounce_ms: 250,
            delta_tick_budget_ms: 10,
            lock_timeout_ms: 10_000,
            max_sync_rounds: 8,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_toml_str(&source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn delta_tick_budget(&self) -> Duration {
        Duration::from_millis(self.delta_tick_budget_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
