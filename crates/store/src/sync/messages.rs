use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::linked_data::Hash;
use crate::metadata::SyncableItemMetadata;
use crate::path::{SyncableId, SyncableItemType, SyncablePath};

/// How much of an out of sync subtree a pull returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullStrategy {
    /// Only the item itself; children need their own pulls
    #[default]
    Default,
    /// The item plus every descendant, inlined
    Batch,
}

/// Ask a replica whether its item at `path` matches `hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub path: SyncablePath,
    /// The caller's hash, `None` if the caller does not have the item
    pub hash: Option<Hash>,
    pub strategy: PullStrategy,
}

impl PullRequest {
    pub fn new(path: SyncablePath, hash: Option<Hash>, strategy: PullStrategy) -> Self {
        Self {
            path,
            hash,
            strategy,
        }
    }
}

/// Pull response, tagged by the type of the pulled item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullResponse {
    Folder(PullOutcome),
    Bundle(PullOutcome),
    File(PullOutcome),
}

impl PullResponse {
    pub fn new(item_type: SyncableItemType, outcome: PullOutcome) -> Self {
        match item_type {
            SyncableItemType::Folder => PullResponse::Folder(outcome),
            SyncableItemType::Bundle => PullResponse::Bundle(outcome),
            SyncableItemType::File => PullResponse::File(outcome),
        }
    }

    pub fn item_type(&self) -> SyncableItemType {
        match self {
            PullResponse::Folder(_) => SyncableItemType::Folder,
            PullResponse::Bundle(_) => SyncableItemType::Bundle,
            PullResponse::File(_) => SyncableItemType::File,
        }
    }

    pub fn outcome(&self) -> &PullOutcome {
        match self {
            PullResponse::Folder(outcome)
            | PullResponse::Bundle(outcome)
            | PullResponse::File(outcome) => outcome,
        }
    }

    pub fn into_outcome(self) -> PullOutcome {
        match self {
            PullResponse::Folder(outcome)
            | PullResponse::Bundle(outcome)
            | PullResponse::File(outcome) => outcome,
        }
    }

    pub fn is_in_sync(&self) -> bool {
        matches!(self.outcome(), PullOutcome::InSync)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullOutcome {
    InSync,
    OutOfSync(PullPayload),
}

/// Everything needed to replicate an out of sync item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullPayload {
    pub metadata: SyncableItemMetadata,
    /// Hash of every direct child, empty for files
    pub hashes_by_id: BTreeMap<SyncableId, Hash>,
    /// The whole subtree, for [`PullStrategy::Batch`] pulls of containers
    pub batch_contents: Option<BatchContents>,
    /// Encoded payload, for files
    pub data: Option<Vec<u8>>,
}

/// One item of an inlined subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub path: SyncablePath,
    pub metadata: SyncableItemMetadata,
    pub data: Option<Vec<u8>>,
}

/// An inlined subtree, grouped by item type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContents {
    pub folders: Vec<BatchItem>,
    pub bundles: Vec<BatchItem>,
    pub files: Vec<BatchItem>,
}

impl BatchContents {
    pub fn len(&self) -> usize {
        self.folders.len() + self.bundles.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&mut self, item_type: SyncableItemType, item: BatchItem) {
        match item_type {
            SyncableItemType::Folder => self.folders.push(item),
            SyncableItemType::Bundle => self.bundles.push(item),
            SyncableItemType::File => self.files.push(item),
        }
    }
}

/// Replicate one item (and optionally its subtree) onto a replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub item_type: SyncableItemType,
    pub path: SyncablePath,
    pub metadata: SyncableItemMetadata,
    pub data: Option<Vec<u8>>,
    pub batch_contents: Option<BatchContents>,
}

impl PushRequest {
    /// Turn an out of sync pull into the push that replicates it
    pub fn from_pull(path: SyncablePath, item_type: SyncableItemType, payload: PullPayload) -> Self {
        Self {
            item_type,
            path,
            metadata: payload.metadata,
            data: payload.data,
            batch_contents: payload.batch_contents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushResponse {
    Ok,
    /// The parent of the pushed item does not exist yet
    NotFound,
}

/// Top level request of the sync wire protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Pull(PullRequest),
    Push(PushRequest),
}

/// Top level reply of the sync wire protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Pull(PullResponse),
    Push(PushResponse),
    /// The request failed on the replica
    Error {
        code: crate::store::ErrorCode,
        message: String,
    },
}
