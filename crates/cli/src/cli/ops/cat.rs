use clap::Args;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// File to print
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Cat {
    type Error = CatError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let file = names::resolve(&store, &self.name).await?.into_file()?;
        let bytes = file.get_binary().await?;

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                let bytes = e.into_bytes();
                let hex = bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(format!("Binary content ({} bytes): {}", bytes.len(), hex))
            }
        }
    }
}
