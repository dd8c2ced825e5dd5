//! # Access control
//!
//! Every folder owns an access control document, stored in its reserved
//! `access-control` bundle. The document maps key set ids to [`Role`]s and
//! carries the folder's shared key grants.
//!
//! ## Roles
//!
//! - **Creator**: wrote the folder. One per folder, fixed at creation.
//! - **Owner**: may accept other writers' items and manage owners and below.
//! - **Admin**: may manage editors and viewers and record deletions.
//! - **Editor**: reads and writes.
//! - **Viewer**: reads only.
//! - **Appender**: writes only. Appenders can encrypt for the folder but hold
//!   no share of its keys.
//!
//! ## Trust model
//!
//! Changes are signed by whoever made them. Replicas accept a foreign delta
//! only when its signer is admin or above and every change in it stays within
//! the roles that signer may manage (see [`Role::manageable_roles`]), judged
//! by the roles its targets actually held when the change was made. A delta
//! may only introduce a new shared key set alongside a revoked reader.

mod change;
mod document;
mod role;

use async_trait::async_trait;

use crate::crdt::{DocumentError, DocumentFile, DocumentKind};
use crate::crypto::{CryptoKeySetId, SharedKeyError, SignedError};
use crate::linked_data::CodecError;
use crate::path::{SyncablePath, TimeId};
use crate::store::SyncableStore;

pub use change::{AccessChange, AccessChangeExtras, AccessChangeKind, SignedAccessChange};
pub use document::{AccessControlDelta, AccessControlDocument, AccessControlInitial};
pub use role::Role;

#[derive(Debug, thiserror::Error)]
pub enum AccessControlError {
    #[error("{signer} is not allowed to do this: {reason}")]
    Forbidden {
        signer: CryptoKeySetId,
        reason: String,
    },
    #[error("{0} already has access")]
    AlreadyGranted(CryptoKeySetId),
    #[error("{0} has no access")]
    NoAccess(CryptoKeySetId),
    #[error("shared keys {0} are not available to this user")]
    MissingSharedKeys(TimeId),
    #[error("shared key error: {0}")]
    SharedKey(#[from] SharedKeyError),
    #[error("signature error: {0}")]
    Signed(#[from] SignedError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid delta: {0}")]
    InvalidDelta(String),
}

/// Validity rules for a folder's access control document
#[derive(Debug, Clone)]
pub struct AccessControlKind {
    folder: SyncablePath,
}

impl AccessControlKind {
    pub fn new(folder: SyncablePath) -> Self {
        Self { folder }
    }

    pub fn folder(&self) -> &SyncablePath {
        &self.folder
    }
}

#[async_trait]
impl DocumentKind for AccessControlKind {
    type Document = AccessControlDocument;

    fn name(&self) -> &'static str {
        "access-control"
    }

    fn load_document(&self, snapshot: &[u8]) -> Result<AccessControlDocument, DocumentError> {
        AccessControlDocument::from_snapshot(snapshot)
    }

    /// Only the folder's creator may author a snapshot
    async fn is_snapshot_valid(&self, store: &SyncableStore, snapshot: &DocumentFile) -> bool {
        let Some(signer) = snapshot.verified_signer() else {
            return false;
        };
        let Ok(document) = AccessControlDocument::from_snapshot(&snapshot.data) else {
            return false;
        };
        if document.folder_path() != &self.folder || document.creator() != signer {
            return false;
        }
        match store.folder_creator(&self.folder).await {
            Ok(creator) => creator == signer,
            Err(e) => {
                tracing::debug!("no creator for {}: {}", self.folder, e);
                false
            }
        }
    }

    async fn is_delta_valid_for_document(
        &self,
        _store: &SyncableStore,
        document: &AccessControlDocument,
        delta: &DocumentFile,
    ) -> bool {
        let Some(signer) = delta.verified_signer() else {
            return false;
        };
        match document.validate_delta(&signer, &delta.data) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("rejecting access control delta {}: {}", delta.path, e);
                false
            }
        }
    }

    fn on_remote_change(&self, store: &SyncableStore) {
        store.trust_marks().clear_under(&self.folder);
    }

    /// Roles changed here, so items checked under the old roles are rechecked
    fn on_local_change(&self, store: &SyncableStore) {
        store.trust_marks().clear_under(&self.folder);
    }
}
