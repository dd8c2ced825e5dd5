//! # Store
//!
//! [`SyncableStore`] is the entry point: it ties a backing store, the user's
//! keys and a trusted time source together and hands out typed accessors for
//! the items in the tree.
//!
//! ```text
//! root (folder)
//!   bpr_access-control/     access control document of the folder
//!   bpr_store-changes/      deletion tombstones of the folder
//!   dpu_.../                child folder, same layout
//!   bpu_.../                bundle, may hold bundles and files
//!   fpu_...                 file
//! ```
//!
//! Every read walks the path from the root, checking at each level that the
//! item exists, has the expected type, was not deleted and has trusted
//! provenance. Results of the trust check are memoized per store in local
//! trust marks.
//!
//! Cloning a store is cheap and shares all state. Accessors and documents
//! hold a [`StoreHandle`] instead, so dropping the last clone releases the
//! store even while accessors are still cached.

mod cache;
mod create;
mod delete;
mod error;
mod handle;
mod hash;
mod item;
mod read;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::access::{AccessControlKind, Role};
use crate::backing::BackingStore;
use crate::changes::StoreChangesKind;
use crate::config::StoreConfig;
use crate::crdt::{DocumentError, DocumentKind, SyncableDocument, WatchedDocument};
use crate::crypto::{CryptoKeySetId, PublicKey, UserKeys};
use crate::folder_ops::FolderOperationsHandler;
use crate::path::{SyncableId, SyncableItemType, SyncablePath};
use crate::trust::TrustMarks;
use crate::trusted_time::{NoTrustedTimeSource, TrustedTimeSource};

pub use cache::{CacheStats, StoreCaches};
pub use create::CreateMode;
pub use error::{ErrorCode, StoreError};
pub use handle::{ItemHandle, StoreHandle};
pub use item::{
    ChildEnumerable, Encodable, Hashable, ItemAccessor, LsEntry, SyncableBundle, SyncableFile,
    SyncableFolder, SyncableItem,
};

/// Name given to every store's root folder
pub const ROOT_NAME: &str = "root";

/// Everything needed to open a store
pub struct StoreOptions {
    storage_root_id: String,
    backing: Arc<dyn BackingStore>,
    user_keys: Arc<dyn UserKeys>,
    trusted_time: Arc<dyn TrustedTimeSource>,
    config: StoreConfig,
    caches: Option<Arc<StoreCaches>>,
    expected_creator: Option<PublicKey>,
}

impl StoreOptions {
    pub fn new(
        storage_root_id: impl Into<String>,
        backing: impl BackingStore,
        user_keys: impl UserKeys + 'static,
    ) -> Self {
        Self {
            storage_root_id: storage_root_id.into(),
            backing: Arc::new(backing),
            user_keys: Arc::new(user_keys),
            trusted_time: Arc::new(NoTrustedTimeSource),
            config: StoreConfig::default(),
            caches: None,
            expected_creator: None,
        }
    }

    pub fn with_trusted_time(mut self, trusted_time: impl TrustedTimeSource + 'static) -> Self {
        self.trusted_time = Arc::new(trusted_time);
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Share caches with other stores instead of building private ones
    pub fn with_caches(mut self, caches: Arc<StoreCaches>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Only trust a root folder created by this key
    pub fn with_expected_creator(mut self, creator: PublicKey) -> Self {
        self.expected_creator = Some(creator);
        self
    }
}

pub(crate) struct StoreInner {
    uid: Uuid,
    storage_root_id: String,
    config: StoreConfig,
    backing: Arc<dyn BackingStore>,
    user_keys: Arc<dyn UserKeys>,
    trusted_time: Arc<dyn TrustedTimeSource>,
    caches: Arc<StoreCaches>,
    trust_marks: TrustMarks,
    expected_creator: Option<PublicKey>,
    creator: RwLock<Option<PublicKey>>,
    /// path -> needs-recompute counter, while its local metadata is recomputed
    recompute: Mutex<std::collections::HashMap<SyncablePath, hash::RecomputeState>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        tracing::debug!("releasing store {} ({})", self.storage_root_id, self.uid);
        self.caches.invalidate_store(self.uid);
    }
}

#[derive(Clone)]
pub struct SyncableStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SyncableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncableStore")
            .field("uid", &self.inner.uid)
            .field("storage_root_id", &self.inner.storage_root_id)
            .finish()
    }
}

impl SyncableStore {
    /// Create a new store, writing its root folder and the root's documents
    ///
    /// The user's signing key becomes the store creator. Fails with
    /// [`StoreError::Conflict`] if the backing store already has a root.
    pub async fn initialize(options: StoreOptions) -> Result<Self, StoreError> {
        let store = Self::from_options(options);
        store.create_root().await?;
        tracing::info!(
            "initialized store {} with creator {}",
            store.storage_root_id(),
            store.user_keys().signing_key_set().id()
        );
        Ok(store)
    }

    /// Open a store over an existing backing store
    ///
    /// The root may be missing, e.g. before the first pull from a replica.
    pub async fn open(options: StoreOptions) -> Result<Self, StoreError> {
        let store = Self::from_options(options);
        if store.backing().exists_at_path(&store.root_path()).await? {
            store.creator().await?;
        } else {
            tracing::debug!("opened store {} without a root", store.storage_root_id());
        }
        Ok(store)
    }

    fn from_options(options: StoreOptions) -> Self {
        let caches = options
            .caches
            .unwrap_or_else(|| Arc::new(StoreCaches::new(&options.config)));
        Self::from_inner(Arc::new(StoreInner {
            uid: Uuid::new_v4(),
            storage_root_id: options.storage_root_id,
            config: options.config,
            backing: options.backing,
            user_keys: options.user_keys,
            trusted_time: options.trusted_time,
            caches,
            trust_marks: TrustMarks::default(),
            expected_creator: options.expected_creator,
            creator: RwLock::new(None),
            recompute: Mutex::new(Default::default()),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub fn uid(&self) -> Uuid {
        self.inner.uid
    }

    pub fn storage_root_id(&self) -> &str {
        &self.inner.storage_root_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.inner.backing
    }

    pub fn user_keys(&self) -> &Arc<dyn UserKeys> {
        &self.inner.user_keys
    }

    pub fn trusted_time(&self) -> &Arc<dyn TrustedTimeSource> {
        &self.inner.trusted_time
    }

    pub fn caches(&self) -> &Arc<StoreCaches> {
        &self.inner.caches
    }

    pub fn trust_marks(&self) -> &TrustMarks {
        &self.inner.trust_marks
    }

    pub fn handle(&self) -> StoreHandle {
        StoreHandle::new(&self.inner)
    }

    pub fn root_path(&self) -> SyncablePath {
        SyncablePath::root(self.inner.storage_root_id.clone())
    }

    pub(crate) fn cache_key(&self, path: &SyncablePath) -> cache::CacheKey {
        (self.inner.uid, path.clone())
    }

    pub async fn root(&self) -> Result<SyncableFolder, StoreError> {
        self.get_at_path(&self.root_path(), Some(SyncableItemType::Folder))
            .await?
            .into_folder()
    }

    /// The key that created the root folder
    pub async fn creator(&self) -> Result<PublicKey, StoreError> {
        let cached = *self.inner.creator.read();
        if let Some(creator) = cached {
            return Ok(creator);
        }
        let root = self.root_path();
        let stored = self
            .backing()
            .get_at_path(&root, Some(SyncableItemType::Folder))
            .await?;
        let signer = stored.origin().signer;
        if let Some(expected) = self.inner.expected_creator {
            if expected != signer {
                return Err(StoreError::untrusted(
                    &root,
                    format!("root was created by {signer}, expected {expected}"),
                ));
            }
        }
        *self.inner.creator.write() = Some(signer);
        Ok(signer)
    }

    /// The key that created `folder`
    pub async fn folder_creator(&self, folder: &SyncablePath) -> Result<PublicKey, StoreError> {
        if folder.is_root() {
            return self.creator().await;
        }
        let stored = self
            .backing()
            .get_at_path(folder, Some(SyncableItemType::Folder))
            .await?;
        Ok(stored.origin().signer)
    }

    /// Resolve a path from the root, checking every level on the way
    pub async fn get_at_path(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
    ) -> Result<SyncableItem, StoreError> {
        self.resolve(path, expected_type, true).await
    }

    pub(crate) async fn resolve(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
        check_deleted: bool,
    ) -> Result<SyncableItem, StoreError> {
        if path.storage_root_id() != self.storage_root_id() {
            return Err(StoreError::NotFound(path.clone()));
        }
        let root = self.root_path();
        let stored = self.backing().get_at_path(&root, None).await?;
        if path.is_root() {
            if let Some(expected) = expected_type {
                if expected != SyncableItemType::Folder {
                    return Err(StoreError::WrongType {
                        path: root,
                        expected,
                        actual: SyncableItemType::Folder,
                    });
                }
            }
        }
        self.check_trusted(&root, &stored).await?;

        let mut current = root;
        let last = path.ids().len().saturating_sub(1);
        for (index, id) in path.ids().iter().enumerate() {
            current = current.append(id.clone());
            let expected = if index == last { expected_type } else { None };
            self.check_child(&current, expected, check_deleted).await?;
        }
        Ok(self.accessor(path))
    }

    /// Existence, type, tombstone and trust checks for one item, in that order
    pub(crate) async fn check_child(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
        check_deleted: bool,
    ) -> Result<(), StoreError> {
        let stored = self.backing().get_at_path(path, None).await?;
        if let Some(expected) = expected_type {
            if expected != stored.item_type {
                return Err(StoreError::WrongType {
                    path: path.clone(),
                    expected,
                    actual: stored.item_type,
                });
            }
        }
        if check_deleted && self.is_deleted_path(path).await? {
            return Err(StoreError::Deleted(path.clone()));
        }
        self.check_trusted(path, &stored).await
    }

    /// The cached accessor for a path, without any checks
    pub(crate) fn accessor(&self, path: &SyncablePath) -> SyncableItem {
        let handle = self.handle();
        self.inner
            .caches
            .accessor(self.cache_key(path), || SyncableItem::new(handle, path.clone()))
    }

    pub fn folder_operations(&self, folder: &SyncablePath) -> FolderOperationsHandler {
        FolderOperationsHandler::new(self.handle(), folder.nearest_folder())
    }

    /// The strongest role any of the user's key sets holds in `folder`
    pub async fn user_role(&self, folder: &SyncablePath) -> Result<Option<Role>, StoreError> {
        let access = self.access_control_document(folder).await?;
        let ids: Vec<CryptoKeySetId> = self
            .user_keys()
            .get_private_crypto_key_sets()
            .iter()
            .map(|key_set| key_set.id().clone())
            .collect();
        Ok(access
            .with(|access| Role::strongest(ids.iter().filter_map(|id| access.role_of(id))))
            .await)
    }

    pub(crate) async fn require_role(
        &self,
        path: &SyncablePath,
        allowed: impl Fn(&Role) -> bool,
        what: &str,
    ) -> Result<Role, StoreError> {
        let folder = path.owning_folder();
        match self.user_role(&folder).await? {
            Some(role) if allowed(&role) => Ok(role),
            Some(role) => Err(StoreError::untrusted(
                path,
                format!("{role} may not {what} in {folder}"),
            )),
            None => Err(StoreError::untrusted(
                path,
                format!("no access to {folder}"),
            )),
        }
    }

    /// The access control document of a folder, brought up to date
    pub async fn access_control_document(
        &self,
        folder: &SyncablePath,
    ) -> Result<SyncableDocument<AccessControlKind>, StoreError> {
        let path = folder.append(SyncableId::access_control());
        let document = self
            .open_document(AccessControlKind::new(folder.clone()), &path)
            .await?;
        document.refresh().await?;
        if document.needs_reload() {
            document.reload().await?;
        }
        Ok(document)
    }

    /// The store changes document of a folder, `None` if it has none yet
    pub async fn store_changes_document(
        &self,
        folder: &SyncablePath,
    ) -> Result<Option<SyncableDocument<StoreChangesKind>>, StoreError> {
        let path = folder.append(SyncableId::store_changes());
        let document = match self
            .open_document(StoreChangesKind::new(folder.clone()), &path)
            .await
        {
            Ok(document) => document,
            Err(StoreError::NotFound(_))
            | Err(StoreError::Document(DocumentError::NoValidSnapshot(_))) => return Ok(None),
            Err(e) => return Err(e),
        };
        document.refresh().await?;
        if document.needs_reload() {
            document.reload().await?;
        }
        Ok(Some(document))
    }

    /// Whether `path` is tombstoned in its owning folder
    ///
    /// Only the owning folder is consulted: a deleted folder hides its
    /// contents because resolving them has to pass through it.
    pub async fn is_deleted_path(&self, path: &SyncablePath) -> Result<bool, StoreError> {
        if path.is_root() || is_structural(path) {
            return Ok(false);
        }
        let folder = path.owning_folder();
        match self.store_changes_document(&folder).await? {
            Some(changes) => Ok(changes.with(|changes| changes.is_deleted_path(path)).await),
            None => Ok(false),
        }
    }

    /// Open a conflict-free document, sharing it through the document cache
    pub async fn open_document<K: DocumentKind>(
        &self,
        kind: K,
        path: &SyncablePath,
    ) -> Result<SyncableDocument<K>, StoreError> {
        let key = self.cache_key(path);
        if let Some(cached) = self.inner.caches.document(&key) {
            if let Some(document) = cached.downcast_ref::<SyncableDocument<K>>() {
                return Ok(document.clone());
            }
        }
        let document = SyncableDocument::load(self, kind, path.clone()).await?;
        self.inner
            .caches
            .insert_document(key, Arc::new(document.clone()));
        Ok(document)
    }

    /// Open a document and keep it live until the returned guard is dropped
    pub async fn watch_document<K: DocumentKind>(
        &self,
        kind: K,
        path: &SyncablePath,
    ) -> Result<WatchedDocument<K>, StoreError> {
        let document = self.open_document(kind, path).await?;
        document.watch()?;
        let key = self.cache_key(path);
        self.inner
            .caches
            .retain(key.clone(), Arc::new(document.clone()));
        Ok(WatchedDocument::new(document, self.inner.caches.clone(), key))
    }

    /// Write a new document bundle at `parent/id` and open it
    pub async fn create_document<K: DocumentKind>(
        &self,
        kind: K,
        parent: &SyncablePath,
        id: SyncableId,
        name: &str,
        document: &K::Document,
    ) -> Result<SyncableDocument<K>, StoreError> {
        let path = SyncableDocument::<K>::create_bundle(self, parent, id, name, document).await?;
        self.open_document(kind, &path).await
    }
}

/// Whether the path is inside a folder's access control or store changes bundle
pub(crate) fn is_structural(path: &SyncablePath) -> bool {
    path.ids().iter().any(|id| id.is_folder_system_bundle())
}
