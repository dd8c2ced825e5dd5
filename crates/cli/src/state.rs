use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use syncable::prelude::*;

pub const APP_NAME: &str = "syncable";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "key.pem";
pub const ITEMS_DIR_NAME: &str = "items";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage root id shared by every replica of the store
    pub storage_root_id: String,
    /// Hex public key whose trusted time signatures are accepted
    #[serde(default)]
    pub time_authority: Option<String>,
    /// Tunables handed to the store
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn new(storage_root_id: impl Into<String>) -> Self {
        Self {
            storage_root_id: storage_root_id.into(),
            time_authority: None,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.syncable)
    pub state_dir: PathBuf,
    /// Path to the user key PEM file
    pub key_path: PathBuf,
    /// Root of the on-disk backing store
    pub items_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.syncable)
    pub fn state_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory with a fresh key
    pub fn init(custom_path: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;
        if state_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&state_dir)?;

        let items_path = state_dir.join(ITEMS_DIR_NAME);
        fs::create_dir_all(&items_path)?;

        let key = SecretKey::generate();
        let key_path = state_dir.join(KEY_FILE_NAME);
        fs::write(&key_path, key.to_pem())?;

        let config_path = state_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            state_dir,
            key_path,
            items_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;
        if !state_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = state_dir.join(KEY_FILE_NAME);
        let items_path = state_dir.join(ITEMS_DIR_NAME);
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !items_path.exists() {
            return Err(StateError::MissingFile(format!("{ITEMS_DIR_NAME}/")));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        Ok(Self {
            state_dir,
            key_path,
            items_path,
            config_path,
            config,
        })
    }

    pub fn load_key(&self) -> Result<SecretKey, StateError> {
        let pem = fs::read_to_string(&self.key_path)?;
        SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))
    }

    /// Store options over this directory's items, signed with its key
    pub async fn store_options(&self) -> Result<StoreOptions, StateError> {
        let key = self.load_key()?;
        let backing = FsBackingStore::new(&self.items_path)
            .await
            .map_err(|e| StateError::Store(e.into()))?;
        let options = StoreOptions::new(
            self.config.storage_root_id.clone(),
            backing,
            InMemoryUserKeys::new(key.clone()),
        )
        .with_config(self.config.store.clone());
        Ok(match self.time_source(key)? {
            Some(source) => options.with_trusted_time(source),
            None => options,
        })
    }

    /// Open the store, which may not have a root yet
    pub async fn open_store(&self) -> Result<SyncableStore, StateError> {
        Ok(SyncableStore::open(self.store_options().await?).await?)
    }

    fn time_source(&self, key: SecretKey) -> Result<Option<KeyedTrustedTimeSource>, StateError> {
        let Some(authority) = &self.config.time_authority else {
            return Ok(None);
        };
        let authority =
            PublicKey::from_hex(authority).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        let source = if authority == key.public() {
            KeyedTrustedTimeSource::issuing(key)
        } else {
            KeyedTrustedTimeSource::verifying(authority)
        };
        tracing::debug!("trusted time authority {}", source.authority());
        Ok(Some(source))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state directory not initialized. Run 'syncable init' first")]
    NotInitialized,

    #[error("state directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let mut config = AppConfig::new("shared");
        config.store.save_debounce_ms = 50;

        let state = AppState::init(Some(state_dir.clone()), config).unwrap();
        assert!(state.items_path.is_dir());

        let loaded = AppState::load(Some(state_dir.clone())).unwrap();
        assert_eq!(loaded.config.storage_root_id, "shared");
        assert_eq!(loaded.config.store.save_debounce_ms, 50);
        assert_eq!(loaded.config.time_authority, None);
        assert_eq!(
            loaded.load_key().unwrap().public(),
            state.load_key().unwrap().public()
        );

        assert!(matches!(
            AppState::init(Some(state_dir), AppConfig::new("shared")),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));

        std::fs::create_dir_all(dir.path().join("partial")).unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("partial"))),
            Err(StateError::MissingFile(_))
        ));
    }

    #[tokio::test]
    async fn test_open_store_with_time_authority() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let state = AppState::init(Some(state_dir.clone()), AppConfig::new("timed")).unwrap();

        // point the authority at our own key so we issue trusted time
        let mut config = state.config.clone();
        config.time_authority = Some(state.load_key().unwrap().public().to_hex());
        std::fs::write(&state.config_path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let state = AppState::load(Some(state_dir)).unwrap();
        let store = SyncableStore::initialize(state.store_options().await.unwrap())
            .await
            .unwrap();
        assert!(store.root().await.is_ok());
    }
}
