//! # Sync
//!
//! Two replicas converge by comparing hashes top down:
//!
//! - **Pull**: "here is my hash for `path`". The replica answers in sync, or
//!   out of sync with the item's metadata, the hash of each direct child, the
//!   payload for files and, for [`PullStrategy::Batch`], the whole subtree.
//! - **Push**: "store this item as I have it". Items already present are
//!   left alone; a missing parent is reported as [`PushResponse::NotFound`].
//!
//! Nothing received is trusted on arrival. Replicated items keep the origin
//! and acceptance signatures they were written with and pass the usual
//! provenance checks when first read.

mod driver;
mod messages;
mod pull;
mod push;
mod remote;

use crate::backing::BackingStoreError;
use crate::linked_data::CodecError;
use crate::store::{ErrorCode, StoreError};

pub use driver::{SyncDriver, SyncReport};
pub use messages::{
    BatchContents, BatchItem, Message, PullOutcome, PullPayload, PullRequest, PullResponse,
    PullStrategy, PushRequest, PushResponse, Reply,
};
pub use remote::{LocalRemote, SyncRemote};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote failed ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("not in sync after {rounds} rounds")]
    NotConverged { rounds: usize },
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Remote { code, .. } => *code,
            SyncError::Store(e) => e.code(),
            SyncError::Codec(_) => ErrorCode::FormatError,
            SyncError::UnexpectedReply(_) | SyncError::NotConverged { .. } => ErrorCode::Internal,
        }
    }

    /// Missing data on either side is expected mid-sync and can be retried
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

impl From<BackingStoreError> for SyncError {
    fn from(error: BackingStoreError) -> Self {
        SyncError::Store(error.into())
    }
}
