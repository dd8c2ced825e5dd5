use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use super::{ConflictFreeDocument, DocumentError, DocumentFile, DocumentKind};
use crate::path::{SyncableId, SyncableItemType, SyncablePath, TimeId};
use crate::store::{CreateMode, StoreCaches, StoreError, StoreHandle, SyncableStore};

type CacheKey = (uuid::Uuid, SyncablePath);

struct DocumentInner<K: DocumentKind> {
    store: StoreHandle,
    kind: K,
    path: SyncablePath,
    state: tokio::sync::RwLock<K::Document>,
    /// time id of the snapshot the state was loaded from
    snapshot: RwLock<TimeId>,
    /// deltas of the current snapshot already merged into the state
    applied: Mutex<BTreeSet<SyncableId>>,
    refresh_lock: tokio::sync::Mutex<()>,
    save_lock: tokio::sync::Mutex<()>,
    needs_reload: watch::Sender<bool>,
    watching: AtomicBool,
    save_scheduled: AtomicBool,
}

/// A conflict-free document bound to its bundle in a store
///
/// Clones share state. The document only holds a weak handle to its store.
pub struct SyncableDocument<K: DocumentKind> {
    inner: Arc<DocumentInner<K>>,
}

impl<K: DocumentKind> Clone for SyncableDocument<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: DocumentKind> std::fmt::Debug for SyncableDocument<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncableDocument")
            .field("kind", &self.inner.kind.name())
            .field("path", &self.inner.path)
            .field("snapshot", &*self.inner.snapshot.read())
            .finish()
    }
}

impl<K: DocumentKind> SyncableDocument<K> {
    /// Write a new document bundle holding `document` as its first snapshot
    pub(crate) async fn create_bundle(
        store: &SyncableStore,
        parent: &SyncablePath,
        id: SyncableId,
        name: &str,
        document: &K::Document,
    ) -> Result<SyncablePath, StoreError> {
        let path = store
            .create_item(parent, id, CreateMode::local(name), None)
            .await?;
        store
            .create_item(&path, SyncableId::snapshots(), CreateMode::local("snapshots"), None)
            .await?;
        store
            .create_item(&path, SyncableId::deltas(), CreateMode::local("deltas"), None)
            .await?;
        let (time_id, snapshot) = prepare_snapshot(store, &path, document.encode_snapshot()?).await?;
        commit_snapshot(store, &path, &time_id, snapshot).await?;
        Ok(path)
    }

    pub(crate) async fn load(
        store: &SyncableStore,
        kind: K,
        path: SyncablePath,
    ) -> Result<Self, StoreError> {
        store
            .backing()
            .get_at_path(&path, Some(SyncableItemType::Bundle))
            .await?;
        let (snapshot, document) = newest_valid_snapshot(store, &kind, &path, None)
            .await?
            .ok_or_else(|| DocumentError::NoValidSnapshot(path.clone()))?;

        let (needs_reload, _) = watch::channel(false);
        let loaded = Self {
            inner: Arc::new(DocumentInner {
                store: store.handle(),
                kind,
                path,
                state: tokio::sync::RwLock::new(document),
                snapshot: RwLock::new(snapshot),
                applied: Mutex::new(BTreeSet::new()),
                refresh_lock: tokio::sync::Mutex::new(()),
                save_lock: tokio::sync::Mutex::new(()),
                needs_reload,
                watching: AtomicBool::new(false),
                save_scheduled: AtomicBool::new(false),
            }),
        };
        {
            let _refresh = loaded.inner.refresh_lock.lock().await;
            loaded.apply_new_deltas(store).await?;
        }
        tracing::debug!(
            "loaded {} document {}",
            loaded.inner.kind.name(),
            loaded.inner.path
        );
        Ok(loaded)
    }

    pub fn path(&self) -> &SyncablePath {
        &self.inner.path
    }

    pub fn kind(&self) -> &K {
        &self.inner.kind
    }

    fn store(&self) -> Result<SyncableStore, StoreError> {
        self.inner.store.upgrade()
    }

    fn deltas_path(&self) -> SyncablePath {
        deltas_path(&self.inner.path, &self.inner.snapshot.read())
    }

    /// Read the current state
    pub async fn with<R>(&self, f: impl FnOnce(&K::Document) -> R) -> R {
        let state = self.inner.state.read().await;
        f(&state)
    }

    /// Change the state locally; the change is written by the next save
    pub async fn update<R>(&self, f: impl FnOnce(&mut K::Document) -> R) -> R {
        let mut state = self.inner.state.write().await;
        f(&mut state)
    }

    /// Merge deltas written since the last refresh
    ///
    /// Also flags the document for reload when a newer valid snapshot
    /// appeared. Returns whether anything was merged.
    pub async fn refresh(&self) -> Result<bool, StoreError> {
        let store = self.store()?;
        let _refresh = self.inner.refresh_lock.lock().await;

        let current = self.inner.snapshot.read().clone();
        if !self.needs_reload()
            && newest_valid_snapshot(&store, &self.inner.kind, &self.inner.path, Some(&current))
                .await?
                .is_some()
        {
            tracing::debug!("newer snapshot of {} available", self.inner.path);
            self.inner.needs_reload.send_replace(true);
        }

        let applied = self.apply_new_deltas(&store).await?;
        if applied > 0 {
            self.inner.kind.on_remote_change(&store);
        }
        Ok(applied > 0)
    }

    /// Merge every unapplied delta of the current snapshot the kind accepts
    ///
    /// Rejected deltas stay unapplied and are checked again on the next
    /// refresh, since they may become valid once more history arrives.
    async fn apply_new_deltas(&self, store: &SyncableStore) -> Result<usize, StoreError> {
        let deltas = self.deltas_path();
        let ids = ids_in(store, &deltas, SyncableItemType::File).await?;
        let pending: Vec<SyncableId> = {
            let applied = self.inner.applied.lock();
            ids.into_iter().filter(|id| !applied.contains(id)).collect()
        };

        let budget = store.config().delta_tick_budget();
        let mut tick = Instant::now();
        let mut count = 0;
        for id in pending {
            let file = read_document_file(store, deltas.append(id.clone())).await?;
            let valid = {
                let state = self.inner.state.read().await;
                self.inner
                    .kind
                    .is_delta_valid_for_document(store, &state, &file)
                    .await
            };
            if !valid {
                tracing::debug!("skipping invalid delta {}", file.path);
                continue;
            }
            match self.inner.state.write().await.apply_delta(&file.data) {
                Ok(()) => {
                    self.inner.applied.lock().insert(id);
                    count += 1;
                }
                Err(e) => tracing::warn!("failed to apply delta {}: {}", file.path, e),
            }
            if tick.elapsed() >= budget {
                tokio::task::yield_now().await;
                tick = Instant::now();
            }
        }
        Ok(count)
    }

    pub fn needs_reload(&self) -> bool {
        *self.inner.needs_reload.borrow()
    }

    /// Notified whenever a newer snapshot is found
    pub fn subscribe_needs_reload(&self) -> watch::Receiver<bool> {
        self.inner.needs_reload.subscribe()
    }

    /// Switch to the newest valid snapshot
    ///
    /// Local changes are saved against the old snapshot first.
    pub async fn reload(&self) -> Result<(), StoreError> {
        self.save().await?;
        let store = self.store()?;
        let _refresh = self.inner.refresh_lock.lock().await;
        let (snapshot, document) =
            newest_valid_snapshot(&store, &self.inner.kind, &self.inner.path, None)
                .await?
                .ok_or_else(|| DocumentError::NoValidSnapshot(self.inner.path.clone()))?;

        {
            let mut state = self.inner.state.write().await;
            *state = document;
            *self.inner.snapshot.write() = snapshot;
            self.inner.applied.lock().clear();
        }
        self.apply_new_deltas(&store).await?;
        self.inner.needs_reload.send_replace(false);
        self.inner.kind.on_remote_change(&store);
        tracing::debug!("reloaded {}", self.inner.path);
        Ok(())
    }

    /// Write pending local changes as a new delta
    ///
    /// Returns `false` if there was nothing to save.
    pub async fn save(&self) -> Result<bool, StoreError> {
        let _save = self.inner.save_lock.lock().await;
        let store = self.store()?;
        // held until written, so no change made meanwhile is lost by clear_pending
        let mut state = self.inner.state.write().await;
        let Some(delta) = state.encode_delta()? else {
            return Ok(false);
        };

        let snapshot = self.inner.snapshot.read().clone();
        let deltas = deltas_path(&self.inner.path, &snapshot);
        if !store.backing().exists_at_path(&deltas).await? {
            // a replica may have synced the snapshot without its deltas bundle
            match store
                .create_item(
                    &self.inner.path.append(SyncableId::deltas()),
                    SyncableId::from_time_id(SyncableItemType::Bundle, false, &snapshot),
                    CreateMode::local(snapshot.as_str()),
                    None,
                )
                .await
            {
                Ok(_) | Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let time_id = next_time_id(&store, &deltas, SyncableItemType::File).await?;
        let id = SyncableId::from_time_id(SyncableItemType::File, false, &time_id);
        store
            .create_item(&deltas, id.clone(), CreateMode::local("delta"), Some(delta))
            .await?;
        self.inner.applied.lock().insert(id);
        state.clear_pending();
        self.inner.kind.on_local_change(&store);
        tracing::debug!("saved delta of {}", self.inner.path);
        Ok(true)
    }

    /// Save after a short quiet period, collapsing repeated calls
    pub fn save_soon(&self) {
        if self.inner.save_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.save_scheduled.store(false, Ordering::SeqCst);
            tracing::warn!("no runtime to save {} on", self.inner.path);
            return;
        };
        let debounce = match self.store() {
            Ok(store) => store.config().save_debounce(),
            Err(_) => {
                self.inner.save_scheduled.store(false, Ordering::SeqCst);
                return;
            }
        };
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.save_scheduled.store(false, Ordering::SeqCst);
            let document = SyncableDocument { inner };
            if let Err(e) = document.save().await {
                tracing::warn!("debounced save of {} failed: {}", document.path(), e);
            }
        });
    }

    /// Write the current state as a new snapshot and switch to it
    ///
    /// Fails without writing anything if the kind would not accept a
    /// snapshot from this user.
    pub async fn compact(&self) -> Result<(), StoreError> {
        self.save().await?;
        let store = self.store()?;
        let encoded = self.with(|document| document.encode_snapshot()).await?;
        let (time_id, snapshot) = prepare_snapshot(&store, &self.inner.path, encoded).await?;
        if !self.inner.kind.is_snapshot_valid(&store, &snapshot).await {
            return Err(DocumentError::Invalid(format!(
                "snapshot {} would not be accepted",
                snapshot.path
            ))
            .into());
        }
        commit_snapshot(&store, &self.inner.path, &time_id, snapshot).await?;
        self.reload().await?;
        tracing::info!("compacted {}", self.inner.path);
        Ok(())
    }

    /// Refresh in the background whenever something is written under the document
    ///
    /// Events are coalesced: at most one refresh is queued while another runs.
    /// The worker stops once every clone of the document is dropped.
    pub fn watch(&self) -> Result<(), StoreError> {
        if self.inner.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            self.inner.watching.store(false, Ordering::SeqCst);
            StoreError::Default(anyhow::anyhow!("cannot watch without a runtime: {e}"))
        })?;
        let store = self.store()?;
        let mut events = store.backing().subscribe();
        let (tx, rx) = flume::bounded::<()>(1);
        let path = self.inner.path.clone();

        let listener_inner = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if !event.path().starts_with(&path) => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if listener_inner.strong_count() == 0 {
                    break;
                }
                match tx.try_send(()) {
                    Ok(()) | Err(flume::TrySendError::Full(_)) => {}
                    Err(flume::TrySendError::Disconnected(_)) => break,
                }
            }
        });

        let worker_inner: Weak<DocumentInner<K>> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            while rx.recv_async().await.is_ok() {
                let Some(inner) = worker_inner.upgrade() else {
                    break;
                };
                let document = SyncableDocument { inner };
                match document.refresh().await {
                    Ok(true) => tracing::debug!("refreshed {}", document.path()),
                    Ok(false) => {}
                    Err(StoreError::StoreReleased) => break,
                    Err(e) => tracing::warn!("refreshing {} failed: {}", document.path(), e),
                }
            }
        });
        Ok(())
    }
}

/// A document kept in the store's caches while this guard lives
pub struct WatchedDocument<K: DocumentKind> {
    document: SyncableDocument<K>,
    caches: Arc<StoreCaches>,
    key: CacheKey,
}

impl<K: DocumentKind> WatchedDocument<K> {
    pub(crate) fn new(document: SyncableDocument<K>, caches: Arc<StoreCaches>, key: CacheKey) -> Self {
        Self {
            document,
            caches,
            key,
        }
    }

    pub fn release(self) {}
}

impl<K: DocumentKind> Deref for WatchedDocument<K> {
    type Target = SyncableDocument<K>;

    fn deref(&self) -> &Self::Target {
        &self.document
    }
}

impl<K: DocumentKind> Drop for WatchedDocument<K> {
    fn drop(&mut self) {
        self.caches.release(&self.key);
    }
}

fn deltas_path(document: &SyncablePath, snapshot: &TimeId) -> SyncablePath {
    document.append_all([
        SyncableId::deltas(),
        SyncableId::from_time_id(SyncableItemType::Bundle, false, snapshot),
    ])
}

/// Sign a snapshot file as it would be written, without writing it
async fn prepare_snapshot(
    store: &SyncableStore,
    document: &SyncablePath,
    encoded: Vec<u8>,
) -> Result<(TimeId, DocumentFile), StoreError> {
    let snapshots = document.append(SyncableId::snapshots());
    let time_id = next_time_id(store, &snapshots, SyncableItemType::File).await?;
    let path = snapshots.append(SyncableId::from_time_id(
        SyncableItemType::File,
        false,
        &time_id,
    ));
    let (metadata, data) = store
        .prepare_local(&path, "snapshot".to_string(), Some(encoded))
        .await?;
    let data =
        data.ok_or_else(|| DocumentError::Invalid(format!("snapshot {path} has no payload")))?;
    Ok((
        time_id,
        DocumentFile {
            path,
            metadata,
            data,
        },
    ))
}

/// Write a prepared snapshot and the bundle for its deltas
async fn commit_snapshot(
    store: &SyncableStore,
    document: &SyncablePath,
    time_id: &TimeId,
    snapshot: DocumentFile,
) -> Result<(), StoreError> {
    Box::pin(store.commit_local(&snapshot.path, snapshot.metadata, Some(snapshot.data))).await?;
    store
        .create_item(
            &document.append(SyncableId::deltas()),
            SyncableId::from_time_id(SyncableItemType::Bundle, false, time_id),
            CreateMode::local(time_id.as_str()),
            None,
        )
        .await?;
    Ok(())
}

/// A time id later than now and than every time id already in `container`
async fn next_time_id(
    store: &SyncableStore,
    container: &SyncablePath,
    item_type: SyncableItemType,
) -> Result<TimeId, StoreError> {
    let now = TimeId::now();
    let last = ids_in(store, container, item_type)
        .await?
        .iter()
        .filter_map(SyncableId::time_id)
        .max();
    Ok(match last {
        Some(last) if last.millis() >= now.millis() => TimeId::from_millis(last.millis() + 1),
        _ => now,
    })
}

/// The newest snapshot the kind accepts, optionally only those after `after`
///
/// The deltas known under the snapshot before it are replayed onto it, so
/// deltas written while another replica compacted are not lost. A snapshot
/// one of those accepted deltas cannot merge into is skipped.
async fn newest_valid_snapshot<K: DocumentKind>(
    store: &SyncableStore,
    kind: &K,
    document: &SyncablePath,
    after: Option<&TimeId>,
) -> Result<Option<(TimeId, K::Document)>, StoreError> {
    let snapshots = document.append(SyncableId::snapshots());
    let ids: Vec<(SyncableId, TimeId)> = ids_in(store, &snapshots, SyncableItemType::File)
        .await?
        .into_iter()
        .filter_map(|id| id.time_id().map(|time_id| (id, time_id)))
        .collect();
    for (index, (id, time_id)) in ids.iter().enumerate().rev() {
        if after.is_some_and(|after| time_id <= after) {
            break;
        }
        let file = read_document_file(store, snapshots.append(id.clone())).await?;
        if !kind.is_snapshot_valid(store, &file).await {
            tracing::debug!("skipping invalid {} snapshot {}", kind.name(), file.path);
            continue;
        }
        let mut loaded = match kind.load_document(&file.data) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("cannot decode snapshot {}: {}", file.path, e);
                continue;
            }
        };
        if let Some((_, prior)) = index.checked_sub(1).and_then(|prior| ids.get(prior)) {
            if !replay_deltas(store, kind, document, prior, &mut loaded).await? {
                tracing::warn!("skipping snapshot {}: earlier deltas do not merge", file.path);
                continue;
            }
        }
        return Ok(Some((time_id.clone(), loaded)));
    }
    Ok(None)
}

/// Merge the deltas of `snapshot` that the kind accepts into `state`
///
/// Returns `false` if an accepted delta could not be merged.
async fn replay_deltas<K: DocumentKind>(
    store: &SyncableStore,
    kind: &K,
    document: &SyncablePath,
    snapshot: &TimeId,
    state: &mut K::Document,
) -> Result<bool, StoreError> {
    let deltas = deltas_path(document, snapshot);
    for id in ids_in(store, &deltas, SyncableItemType::File).await? {
        let file = read_document_file(store, deltas.append(id)).await?;
        if !kind.is_delta_valid_for_document(store, state, &file).await {
            continue;
        }
        if let Err(e) = state.apply_delta(&file.data) {
            tracing::debug!("delta {} does not merge: {}", file.path, e);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Sorted ids of a container, empty if it does not exist yet
async fn ids_in(
    store: &SyncableStore,
    path: &SyncablePath,
    item_type: SyncableItemType,
) -> Result<Vec<SyncableId>, StoreError> {
    match store.backing().get_ids_in_path(path, Some(item_type)).await {
        Ok(mut ids) => {
            ids.sort();
            Ok(ids)
        }
        Err(e) => match StoreError::from(e) {
            StoreError::NotFound(_) => Ok(Vec::new()),
            e => Err(e),
        },
    }
}

async fn read_document_file(
    store: &SyncableStore,
    path: SyncablePath,
) -> Result<DocumentFile, StoreError> {
    let metadata = store
        .backing()
        .get_at_path(&path, Some(SyncableItemType::File))
        .await?;
    let data = store.backing().get_data_at_path(&path).await?;
    Ok(DocumentFile {
        path,
        metadata,
        data,
    })
}
