use clap::Args;
use syncable::prelude::*;

use crate::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Storage root id of the store (random if not given)
    #[arg(long)]
    pub storage_root_id: Option<String>,

    /// Join an existing store: skip creating the root and wait for a sync
    #[arg(long, requires = "storage_root_id")]
    pub join: bool,

    /// Hex public key of the trusted time authority
    #[arg(long)]
    pub time_authority: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Failed to initialize state: {0}")]
    StateFailed(#[from] StateError),
    #[error("Failed to create store: {0}")]
    StoreFailed(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let storage_root_id = self
            .storage_root_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let mut config = AppConfig::new(storage_root_id);
        config.time_authority = self.time_authority.clone();

        let state = AppState::init(ctx.state_path.clone(), config)?;
        let public_key = state.load_key()?.public();
        let options = state.store_options().await?;
        if self.join {
            SyncableStore::open(options).await?;
        } else {
            SyncableStore::initialize(options).await?;
        }

        Ok(format!(
            "Initialized {} at {}\nStore: {}\nPublic key: {}",
            if self.join { "replica" } else { "store" },
            state.state_dir.display(),
            state.config.storage_root_id,
            public_key
        ))
    }
}
