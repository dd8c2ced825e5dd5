use std::path::PathBuf;

use clap::Args;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Name of the new file; missing parent folders are created
    pub name: String,

    /// Local file to upload
    pub source: PathBuf,

    /// Use plain instead of encrypted ids and names
    #[arg(long)]
    pub plain: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error("Failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("Missing file name")]
    MissingName,
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Put {
    type Error = PutError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (parents, file_name) = names::split_last(&self.name).ok_or(PutError::MissingName)?;
        let data = tokio::fs::read(&self.source)
            .await
            .map_err(|e| PutError::ReadFailed(self.source.clone(), e))?;

        let store = ctx.store().await?;
        let folder = names::ensure_folder(&store, &parents, !self.plain).await?;
        if names::lookup(&folder, file_name).await?.is_some() {
            return Err(NameError::Exists(self.name.clone()).into());
        }
        let id = names::child_id(&folder, SyncableItemType::File, !self.plain, file_name).await?;
        let size = data.len();
        let file = folder
            .create_binary_file(id, CreateMode::local(file_name), data)
            .await?;
        Ok(format!("Wrote {} bytes to {}", size, file.path()))
    }
}
