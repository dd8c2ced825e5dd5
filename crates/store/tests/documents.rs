//! Integration tests for the generic document engine, using a small
//! grow-only set of notes as the document type

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use syncable::crdt::{ConflictFreeDocument, DocumentError, DocumentFile, DocumentKind};
use syncable::linked_data::CodecError;
use syncable::prelude::*;

#[derive(Debug, Clone, Default)]
struct Notes {
    notes: BTreeSet<String>,
    pending: Vec<String>,
}

impl Notes {
    fn add(&mut self, note: &str) {
        if self.notes.insert(note.to_string()) {
            self.pending.push(note.to_string());
        }
    }
}

impl ConflictFreeDocument for Notes {
    fn encode_snapshot(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.notes)?)
    }

    fn encode_delta(&self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_vec(&self.pending)?))
    }

    fn apply_delta(&mut self, delta: &[u8]) -> Result<(), DocumentError> {
        let notes: Vec<String> =
            serde_json::from_slice(delta).map_err(|e| DocumentError::Codec(e.into()))?;
        self.notes.extend(notes);
        Ok(())
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

/// Accepts anything signed, except notes that say "forbidden"
#[derive(Debug, Clone)]
struct NotesKind;

#[async_trait]
impl DocumentKind for NotesKind {
    type Document = Notes;

    fn name(&self) -> &'static str {
        "notes"
    }

    fn load_document(&self, snapshot: &[u8]) -> Result<Notes, DocumentError> {
        let notes = serde_json::from_slice(snapshot).map_err(|e| DocumentError::Codec(e.into()))?;
        Ok(Notes {
            notes,
            pending: Vec::new(),
        })
    }

    async fn is_snapshot_valid(&self, _store: &SyncableStore, snapshot: &DocumentFile) -> bool {
        snapshot.verified_signer().is_some()
    }

    async fn is_delta_valid_for_document(
        &self,
        _store: &SyncableStore,
        _document: &Notes,
        delta: &DocumentFile,
    ) -> bool {
        if delta.verified_signer().is_none() {
            return false;
        }
        match serde_json::from_slice::<Vec<String>>(&delta.data) {
            Ok(notes) => !notes.iter().any(|note| note == "forbidden"),
            Err(_) => false,
        }
    }
}

async fn notes_of(document: &syncable::crdt::SyncableDocument<NotesKind>) -> Vec<String> {
    document
        .with(|notes| notes.notes.iter().cloned().collect())
        .await
}

async fn setup_notes() -> (
    SyncableStore,
    MemoryBackingStore,
    SecretKey,
    syncable::crdt::SyncableDocument<NotesKind>,
) {
    let (store, backing, key) = common::setup_store().await;
    let root = store.root_path();
    let mut initial = Notes::default();
    initial.notes.insert("first".to_string());
    let document = store
        .create_document(
            NotesKind,
            &root,
            SyncableId::new_uuid(SyncableItemType::Bundle, false),
            "notes",
            &initial,
        )
        .await
        .unwrap();
    (store, backing, key, document)
}

#[tokio::test]
async fn test_saved_deltas_reach_other_views() {
    let (_store, backing, key, document) = setup_notes().await;

    document.update(|notes| notes.add("second")).await;
    assert!(document.save().await.unwrap());
    // nothing left to save
    assert!(!document.save().await.unwrap());

    let other = common::open_as(&backing, &key).await;
    let loaded = other
        .open_document(NotesKind, document.path())
        .await
        .unwrap();
    assert_eq!(notes_of(&loaded).await, vec!["first", "second"]);

    loaded.update(|notes| notes.add("third")).await;
    loaded.save().await.unwrap();

    assert!(document.refresh().await.unwrap());
    assert_eq!(notes_of(&document).await, vec!["first", "second", "third"]);
    // already merged
    assert!(!document.refresh().await.unwrap());
}

#[tokio::test]
async fn test_rejected_deltas_are_skipped() {
    let (_store, backing, key, document) = setup_notes().await;

    document.update(|notes| notes.add("forbidden")).await;
    document.update(|notes| notes.add("fine")).await;
    document.save().await.unwrap();

    let other = common::open_as(&backing, &key).await;
    let loaded = other
        .open_document(NotesKind, document.path())
        .await
        .unwrap();
    // the whole delta is dropped, not just the bad note
    assert_eq!(notes_of(&loaded).await, vec!["first"]);
}

#[tokio::test]
async fn test_compact_moves_to_new_snapshot() {
    let (_store, backing, key, document) = setup_notes().await;
    document.update(|notes| notes.add("second")).await;
    document.save().await.unwrap();

    let other = common::open_as(&backing, &key).await;
    let loaded = other
        .open_document(NotesKind, document.path())
        .await
        .unwrap();

    document.update(|notes| notes.add("third")).await;
    document.compact().await.unwrap();
    assert_eq!(notes_of(&document).await, vec!["first", "second", "third"]);

    let mut reloads = loaded.subscribe_needs_reload();
    loaded.refresh().await.unwrap();
    assert!(loaded.needs_reload());
    assert!(*reloads.borrow_and_update());

    loaded.reload().await.unwrap();
    assert!(!loaded.needs_reload());
    assert_eq!(notes_of(&loaded).await, vec!["first", "second", "third"]);

    // deltas written after compaction land on the new snapshot
    loaded.update(|notes| notes.add("fourth")).await;
    loaded.save().await.unwrap();
    document.refresh().await.unwrap();
    assert_eq!(
        notes_of(&document).await,
        vec!["first", "fourth", "second", "third"]
    );
}

#[tokio::test]
async fn test_compaction_keeps_concurrent_deltas() {
    let (_store, backing, key, document) = setup_notes().await;
    let other = common::open_as(&backing, &key).await;
    let concurrent = other
        .open_document(NotesKind, document.path())
        .await
        .unwrap();

    // written under the old snapshot, never merged before compacting
    concurrent.update(|notes| notes.add("concurrent")).await;
    concurrent.save().await.unwrap();
    document.update(|notes| notes.add("local")).await;
    document.compact().await.unwrap();
    assert_eq!(
        notes_of(&document).await,
        vec!["concurrent", "first", "local"]
    );

    let fresh = common::open_as(&backing, &key).await;
    let loaded = fresh
        .open_document(NotesKind, document.path())
        .await
        .unwrap();
    assert_eq!(notes_of(&loaded).await, vec!["concurrent", "first", "local"]);
}

#[tokio::test]
async fn test_watched_document_follows_writes() {
    let (store, backing, key, document) = setup_notes().await;
    let watched = store
        .watch_document(NotesKind, document.path())
        .await
        .unwrap();

    let other = common::open_as(&backing, &key).await;
    let writer = other
        .open_document(NotesKind, document.path())
        .await
        .unwrap();
    writer.update(|notes| notes.add("live")).await;
    writer.save().await.unwrap();

    let mut seen = false;
    for _ in 0..200 {
        if notes_of(&watched).await.contains(&"live".to_string()) {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen, "watched document never saw the remote write");
    watched.release();
}

#[tokio::test]
async fn test_save_soon_debounces() {
    common::init_tracing();
    let backing = MemoryBackingStore::new();
    let key = SecretKey::generate();
    let config = StoreConfig {
        save_debounce_ms: 20,
        ..Default::default()
    };
    let store = SyncableStore::initialize(common::options(&backing, &key).with_config(config))
        .await
        .unwrap();
    let document = store
        .create_document(
            NotesKind,
            &store.root_path(),
            SyncableId::new_uuid(SyncableItemType::Bundle, false),
            "notes",
            &Notes::default(),
        )
        .await
        .unwrap();

    for note in ["a", "b", "c"] {
        document.update(|notes| notes.add(note)).await;
        document.save_soon();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let other = common::open_as(&backing, &key).await;
    let loaded = other
        .open_document(NotesKind, document.path())
        .await
        .unwrap();
    assert_eq!(notes_of(&loaded).await, vec!["a", "b", "c"]);
    // one delta for all three updates
    let deltas = document
        .path()
        .append(SyncableId::deltas());
    let buckets = backing.get_ids_in_path(&deltas, None).await.unwrap();
    assert_eq!(buckets.len(), 1);
    let files = backing
        .get_ids_in_path(&deltas.append(buckets[0].clone()), None)
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_documents_are_not_listed() {
    let (store, _, _, _document) = setup_notes().await;
    let root = store.root().await.unwrap();
    let names: Vec<_> = root
        .ls()
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.relative_name)
        .collect();
    // the bundle shows up, its snapshots and deltas do not
    assert_eq!(names, vec!["notes"]);
}
