use clap::Args;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Key;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Failed to load key: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Key {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        Ok(ctx.state()?.load_key()?.public().to_hex())
    }
}
