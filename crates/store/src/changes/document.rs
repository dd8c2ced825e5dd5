use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::crdt::{is_ordered_subsequence, ConflictFreeDocument, DocumentError};
use crate::crypto::{PublicKey, Signed, SignedError, UserKeys};
use crate::linked_data::{BlockEncoded, CodecError};
use crate::path::{SyncableItemType, SyncablePath, TimeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreChangeKind {
    /// Tombstone files and bundles
    Delete { paths: Vec<SyncablePath> },
    /// Tombstone folders, only recorded by a creator
    DeleteFolders { paths: Vec<SyncablePath> },
}

impl StoreChangeKind {
    pub fn paths(&self) -> &[SyncablePath] {
        match self {
            StoreChangeKind::Delete { paths } | StoreChangeKind::DeleteFolders { paths } => paths,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    pub time_id: TimeId,
    pub kind: StoreChangeKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreChangeExtras<'a> {
    pub folder: &'a SyncablePath,
}

pub type SignedStoreChange = Signed<StoreChange>;

/// What the signer of a delta is allowed to record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionRights {
    /// Admin or above in the folder
    pub delete_items: bool,
    /// Creator of the folder or of the store
    pub delete_folders: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreChangesError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("signature error: {0}")]
    Signed(#[from] SignedError),
    #[error("signer may not record this change: {0}")]
    Forbidden(String),
    #[error("invalid delta: {0}")]
    InvalidDelta(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreChangesDelta {
    changes: Vec<SignedStoreChange>,
}

impl BlockEncoded for StoreChangesDelta {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreChangesSnapshot {
    folder_path: SyncablePath,
    changes: Vec<SignedStoreChange>,
}

impl BlockEncoded for StoreChangesSnapshot {}

/// Per-folder log of deletions
///
/// The set of deleted paths is derived from the change log and rebuilt
/// whenever changes are merged.
#[derive(Debug, Clone)]
pub struct StoreChangesDocument {
    folder_path: SyncablePath,
    changes: Vec<SignedStoreChange>,
    pending: Vec<SignedStoreChange>,
    deleted: BTreeSet<SyncablePath>,
}

impl StoreChangesDocument {
    pub fn new(folder_path: SyncablePath) -> Self {
        Self {
            folder_path,
            changes: Vec::new(),
            pending: Vec::new(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn from_snapshot(data: &[u8]) -> Result<Self, DocumentError> {
        let snapshot = StoreChangesSnapshot::decode(data)?;
        let mut document = Self::new(snapshot.folder_path);
        document.changes = snapshot.changes;
        document.rebuild();
        Ok(document)
    }

    pub fn folder_path(&self) -> &SyncablePath {
        &self.folder_path
    }

    pub fn changes(&self) -> &[SignedStoreChange] {
        &self.changes
    }

    pub fn deleted_paths(&self) -> &BTreeSet<SyncablePath> {
        &self.deleted
    }

    /// Whether `path`, or an ancestor of it inside this folder, was deleted
    pub fn is_deleted_path(&self, path: &SyncablePath) -> bool {
        if path.relative_to(&self.folder_path).is_none() || path == &self.folder_path {
            return false;
        }
        std::iter::once(path.clone())
            .chain(path.ancestors())
            .take_while(|candidate| candidate != &self.folder_path)
            .any(|candidate| self.deleted.contains(&candidate))
    }

    pub fn delete(
        &mut self,
        user_keys: &dyn UserKeys,
        paths: Vec<SyncablePath>,
    ) -> Result<(), StoreChangesError> {
        let kind = if paths
            .iter()
            .all(|path| path.item_type() == SyncableItemType::Folder)
        {
            StoreChangeKind::DeleteFolders { paths }
        } else if paths
            .iter()
            .all(|path| path.item_type() != SyncableItemType::Folder)
        {
            StoreChangeKind::Delete { paths }
        } else {
            return Err(StoreChangesError::InvalidDelta(
                "folders and items must be deleted separately".to_string(),
            ));
        };
        self.check_paths(&kind)?;

        let change = StoreChange {
            time_id: self.next_time_id(),
            kind,
        };
        let signed = Signed::sign(
            change,
            &StoreChangeExtras {
                folder: &self.folder_path,
            },
            &user_keys.signing_key_set(),
        )?;
        self.pending.push(signed.clone());
        self.changes.push(signed);
        self.rebuild();
        Ok(())
    }

    /// Check a delta written by `signer`, who holds `rights` in this folder
    pub fn validate_delta(
        &self,
        signer: &PublicKey,
        rights: DeletionRights,
        data: &[u8],
    ) -> Result<(), StoreChangesError> {
        if !rights.delete_items {
            return Err(StoreChangesError::Forbidden(
                "delta signer is not an admin".to_string(),
            ));
        }
        let delta = StoreChangesDelta::decode(data)?;
        let mut after = self.clone();
        after.merge(&delta.changes);
        if !is_ordered_subsequence(&self.changes, &after.changes) {
            return Err(StoreChangesError::InvalidDelta(
                "existing history was reordered or dropped".to_string(),
            ));
        }

        let new_changes: Vec<&SignedStoreChange> = delta
            .changes
            .iter()
            .filter(|change| !self.changes.contains(change))
            .collect();
        if new_changes.is_empty() {
            return Err(StoreChangesError::InvalidDelta(
                "delta adds no changes".to_string(),
            ));
        }

        let extras = StoreChangeExtras {
            folder: &self.folder_path,
        };
        for change in new_changes {
            if &change.signer != signer {
                return Err(StoreChangesError::InvalidDelta(
                    "change signed by another key".to_string(),
                ));
            }
            change.verify(&extras)?;
            self.check_paths(&change.value.kind)?;
            if matches!(change.value.kind, StoreChangeKind::DeleteFolders { .. })
                && !rights.delete_folders
            {
                return Err(StoreChangesError::Forbidden(
                    "only a creator may delete folders".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_paths(&self, kind: &StoreChangeKind) -> Result<(), StoreChangesError> {
        if kind.paths().is_empty() {
            return Err(StoreChangesError::InvalidDelta(
                "change deletes nothing".to_string(),
            ));
        }
        for path in kind.paths() {
            if path.is_root() || path.owning_folder() != self.folder_path {
                return Err(StoreChangesError::InvalidDelta(format!(
                    "{path} is not governed by {}",
                    self.folder_path
                )));
            }
            let relative = path.relative_to(&self.folder_path).unwrap_or_default();
            if relative.iter().any(|id| id.is_reserved()) {
                return Err(StoreChangesError::InvalidDelta(format!(
                    "{path} is a system item"
                )));
            }
            let is_folder = path.item_type() == SyncableItemType::Folder;
            let wants_folder = matches!(kind, StoreChangeKind::DeleteFolders { .. });
            if is_folder != wants_folder {
                return Err(StoreChangesError::InvalidDelta(format!(
                    "{path} has the wrong type for this change"
                )));
            }
        }
        Ok(())
    }

    fn next_time_id(&self) -> TimeId {
        let now = TimeId::now();
        match self.changes.iter().map(|c| &c.value.time_id).max() {
            Some(last) if last.millis() >= now.millis() => TimeId::from_millis(last.millis() + 1),
            _ => now,
        }
    }

    fn merge(&mut self, changes: &[SignedStoreChange]) {
        for change in changes {
            if !self.changes.contains(change) {
                self.changes.push(change.clone());
            }
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.changes.sort_by(|a, b| {
            a.value
                .time_id
                .cmp(&b.value.time_id)
                .then_with(|| a.signature().cmp(b.signature()))
        });
        self.deleted = self
            .changes
            .iter()
            .flat_map(|change| change.value.kind.paths().iter().cloned())
            .collect();
    }
}

impl ConflictFreeDocument for StoreChangesDocument {
    fn encode_snapshot(&self) -> Result<Vec<u8>, CodecError> {
        StoreChangesSnapshot {
            folder_path: self.folder_path.clone(),
            changes: self.changes.clone(),
        }
        .encode()
    }

    fn encode_delta(&self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        StoreChangesDelta {
            changes: self.pending.clone(),
        }
        .encode()
        .map(Some)
    }

    fn apply_delta(&mut self, delta: &[u8]) -> Result<(), DocumentError> {
        let delta = StoreChangesDelta::decode(delta)?;
        self.merge(&delta.changes);
        Ok(())
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
    }
}
