use serde::{Deserialize, Serialize};

use crate::access::AccessControlError;
use crate::backing::BackingStoreError;
use crate::changes::StoreChangesError;
use crate::crdt::DocumentError;
use crate::crypto::{SharedKeyError, SignedError};
use crate::linked_data::CodecError;
use crate::path::{IdError, SyncableItemType, SyncablePath};
use crate::trusted_time::TrustedTimeError;

/// The failure classes callers are expected to match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    WrongType,
    Conflict,
    Deleted,
    Untrusted,
    FormatError,
    LockTimeout,
    /// Broken internal state (e.g. the store was released), not retryable
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no item at {0}")]
    NotFound(SyncablePath),
    #[error("item at {path} is a {actual}, expected a {expected}")]
    WrongType {
        path: SyncablePath,
        expected: SyncableItemType,
        actual: SyncableItemType,
    },
    #[error("an item already exists at {0}")]
    Conflict(SyncablePath),
    #[error("item at {0} was deleted")]
    Deleted(SyncablePath),
    #[error("untrusted item at {path}: {reason}")]
    Untrusted { path: SyncablePath, reason: String },
    #[error("format error: {0}")]
    Format(String),
    #[error("timed out waiting for the store lock")]
    LockTimeout,
    #[error("the store was released")]
    StoreReleased,
    #[error("access control error: {0}")]
    AccessControl(#[from] AccessControlError),
    #[error("store changes error: {0}")]
    StoreChanges(#[from] StoreChangesError),
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    #[error("shared key error: {0}")]
    SharedKey(#[from] SharedKeyError),
    #[error("signature error: {0}")]
    Signed(#[from] SignedError),
    #[error("trusted time error: {0}")]
    TrustedTime(#[from] TrustedTimeError),
    #[error("backing store error: {0}")]
    Backing(BackingStoreError),
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
}

impl StoreError {
    pub(crate) fn untrusted(path: &SyncablePath, reason: impl Into<String>) -> Self {
        StoreError::Untrusted {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::WrongType { .. } => ErrorCode::WrongType,
            StoreError::Conflict(_) => ErrorCode::Conflict,
            StoreError::Deleted(_) => ErrorCode::Deleted,
            StoreError::Untrusted { .. }
            | StoreError::AccessControl(_)
            | StoreError::StoreChanges(_)
            | StoreError::SharedKey(_)
            | StoreError::Signed(_) => ErrorCode::Untrusted,
            StoreError::Format(_) | StoreError::Document(DocumentError::Codec(_)) => {
                ErrorCode::FormatError
            }
            StoreError::LockTimeout => ErrorCode::LockTimeout,
            StoreError::Backing(BackingStoreError::Codec(_)) => ErrorCode::FormatError,
            StoreError::StoreReleased
            | StoreError::Document(_)
            | StoreError::TrustedTime(_)
            | StoreError::Backing(_)
            | StoreError::Default(_) => ErrorCode::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

impl From<BackingStoreError> for StoreError {
    fn from(error: BackingStoreError) -> Self {
        match error {
            BackingStoreError::NotFound(path) => StoreError::NotFound(path),
            BackingStoreError::WrongType {
                path,
                expected,
                actual,
            } => StoreError::WrongType {
                path,
                expected,
                actual,
            },
            BackingStoreError::Conflict(path) => StoreError::Conflict(path),
            other => StoreError::Backing(other),
        }
    }
}

impl From<CodecError> for StoreError {
    fn from(error: CodecError) -> Self {
        StoreError::Format(error.to_string())
    }
}

impl From<IdError> for StoreError {
    fn from(error: IdError) -> Self {
        StoreError::Format(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backing_errors_keep_their_code() {
        let path = SyncablePath::root("store");
        let error: StoreError = BackingStoreError::Conflict(path.clone()).into();
        assert_eq!(error.code(), ErrorCode::Conflict);
        let error: StoreError = BackingStoreError::NotFound(path).into();
        assert!(error.is_not_found());
        let error: StoreError = CodecError::InvalidHash("zz".into()).into();
        assert_eq!(error.code(), ErrorCode::FormatError);
        assert_eq!(StoreError::StoreReleased.code(), ErrorCode::Internal);
    }
}
