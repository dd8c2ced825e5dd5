use clap::Args;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Mkdir {
    /// Folder to create, with any missing parents
    pub name: String,

    /// Use plain instead of encrypted ids and names
    #[arg(long)]
    pub plain: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MkdirError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error(transparent)]
    Name(#[from] NameError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mkdir {
    type Error = MkdirError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let folder = names::ensure_folder(&store, &names::segments(&self.name), !self.plain).await?;
        Ok(format!("Created {}", folder.path()))
    }
}
