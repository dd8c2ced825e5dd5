use std::path::PathBuf;

use clap::Args;
use syncable::prelude::*;
use syncable::sync::SyncError;

use crate::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct SyncOp {
    /// State directory of the other replica
    #[arg(long)]
    pub with: PathBuf,

    /// Ship whole subtrees in one reply instead of walking them level by level
    #[arg(long)]
    pub batch: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncOpError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error("Replica holds store {remote}, not {local}")]
    DifferentStore { local: String, remote: String },
    #[error("Sync failed: {0}")]
    SyncFailed(#[from] SyncError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for SyncOp {
    type Error = SyncOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let local = ctx.state()?.open_store().await?;
        let remote = AppState::load(Some(self.with.clone()))?.open_store().await?;
        if local.storage_root_id() != remote.storage_root_id() {
            return Err(SyncOpError::DifferentStore {
                local: local.storage_root_id().to_string(),
                remote: remote.storage_root_id().to_string(),
            });
        }

        let strategy = if self.batch {
            PullStrategy::Batch
        } else {
            PullStrategy::Default
        };
        let driver = SyncDriver::new(local, LocalRemote::new(remote)).with_strategy(strategy);
        let pulled = driver.pull_from_remote().await?;
        let pushed = driver.push_to_remote().await?;
        Ok(format!(
            "Pulled {} items in {} rounds\nPushed {} items in {} rounds",
            pulled.replicated, pulled.rounds, pushed.replicated, pushed.rounds
        ))
    }
}
