use clap::Args;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Folder to list (defaults to the root)
    #[arg(default_value = "/")]
    pub name: String,

    /// Only show entries whose relative name matches this glob
    #[arg(long)]
    pub pattern: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = LsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let folder = names::resolve_folder(&store, &names::segments(&self.name)).await?;
        let Some(pattern) = &self.pattern else {
            return Ok(folder.ls_formatted(&|entry| entry.default_format()).await?);
        };
        Ok(folder
            .find(pattern)
            .await?
            .iter()
            .map(|entry| entry.relative_name.clone())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
