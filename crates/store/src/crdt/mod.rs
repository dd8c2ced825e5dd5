//! Conflict-free documents
//!
//! A document lives in a bundle:
//!
//! ```text
//! <document bundle>/
//!   snapshots/            one file per snapshot, named by time id
//!   deltas/
//!     <snapshot time id>/ one file per saved delta, named by time id
//! ```
//!
//! Loading picks the newest snapshot that its [`DocumentKind`] accepts and
//! merges, in id order, every delta the kind accepts for the document as it
//! stands. Rejected deltas are skipped, so a partially synced or hostile
//! history never stops a document from loading.
//!
//! The engine ([`SyncableDocument`]) is generic; each document type plugs in
//! its own decoding and validity rules through [`DocumentKind`].

mod engine;

use async_trait::async_trait;

use crate::crypto::PublicKey;
use crate::linked_data::{CodecError, Hash};
use crate::metadata::{OriginExtras, StoredItemMetadata};
use crate::path::{SyncableItemType, SyncablePath};
use crate::store::SyncableStore;

pub use engine::{SyncableDocument, WatchedDocument};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid document: {0}")]
    Invalid(String),
    #[error("no valid snapshot in {0}")]
    NoValidSnapshot(SyncablePath),
}

/// A replicated value made of a snapshot plus mergeable deltas
pub trait ConflictFreeDocument: Clone + Send + Sync + 'static {
    /// Full state, used to start a new snapshot
    fn encode_snapshot(&self) -> Result<Vec<u8>, CodecError>;

    /// Local changes not yet saved, `None` if there are none
    fn encode_delta(&self) -> Result<Option<Vec<u8>>, CodecError>;

    /// Merge a delta written by any replica
    fn apply_delta(&mut self, delta: &[u8]) -> Result<(), DocumentError>;

    /// Forget local changes once they were written out
    fn clear_pending(&mut self);
}

/// A snapshot or delta file as read from the backing store
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub path: SyncablePath,
    pub metadata: StoredItemMetadata,
    pub data: Vec<u8>,
}

impl DocumentFile {
    /// Check the file's origin and return who signed it
    ///
    /// The origin must hash the stored payload and carry a valid signature
    /// bound to the file's path and name.
    pub fn verified_signer(&self) -> Option<PublicKey> {
        let origin = self.metadata.origin();
        if origin.value.content_hash != Hash::of(&self.data) {
            return None;
        }
        let extras = OriginExtras {
            path: &self.path,
            item_type: SyncableItemType::File,
            name: &self.metadata.item.name,
        };
        origin.verify(&extras).ok().map(|_| origin.signer)
    }
}

/// Strategy plugged into the engine for one type of document
#[async_trait]
pub trait DocumentKind: Clone + Send + Sync + 'static {
    type Document: ConflictFreeDocument;

    /// Short name for logs
    fn name(&self) -> &'static str;

    fn load_document(&self, snapshot: &[u8]) -> Result<Self::Document, DocumentError>;

    async fn is_snapshot_valid(&self, store: &SyncableStore, snapshot: &DocumentFile) -> bool;

    async fn is_delta_valid_for_document(
        &self,
        store: &SyncableStore,
        document: &Self::Document,
        delta: &DocumentFile,
    ) -> bool;

    /// Called after deltas from other replicas were merged
    fn on_remote_change(&self, _store: &SyncableStore) {}

    /// Called after a local delta was written
    fn on_local_change(&self, _store: &SyncableStore) {}
}

/// Whether `before` appears within `after` in the same relative order
pub fn is_ordered_subsequence<T: PartialEq>(before: &[T], after: &[T]) -> bool {
    let mut remaining = after.iter();
    before
        .iter()
        .all(|item| remaining.by_ref().any(|candidate| candidate == item))
}
