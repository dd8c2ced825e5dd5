use clap::Args;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Hash {
    /// Item to hash (defaults to the root)
    #[arg(default_value = "/")]
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Hash {
    type Error = HashError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let item = names::resolve(&store, &self.name).await?;
        Ok(item.get_hash().await?.to_hex())
    }
}
