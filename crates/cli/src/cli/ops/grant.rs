use clap::Args;
use syncable::crypto::KeyError;
use syncable::prelude::*;

use crate::cli::names::{self, NameError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Grant {
    /// Folder to share (`/` for the root)
    pub name: String,

    /// Hex public key of the user to add
    pub public_key: String,

    /// owner, admin, editor, viewer or appender
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("Failed to open store: {0}")]
    StateFailed(#[from] StateError),
    #[error("Invalid public key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Grant {
    type Error = GrantError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let public_key = PublicKey::from_hex(&self.public_key)?;
        let store = ctx.store().await?;
        let folder = names::resolve_folder(&store, &names::segments(&self.name)).await?;
        folder.grant_access(public_key, self.role).await?;
        Ok(format!("Granted {} on {} to {}", self.role, self.name, public_key))
    }
}
