use clap::Args;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Rm {
    /// Folder or file to delete
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RmError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error("Cannot delete the root folder")]
    Root,
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rm {
    type Error = RmError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let item = names::resolve(&store, &self.name).await?;
        if item.path().is_root() {
            return Err(RmError::Root);
        }
        store.delete_item(item.path()).await?;
        Ok(format!("Deleted {}", self.name))
    }
}
