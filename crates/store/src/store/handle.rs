use std::sync::{Arc, Weak};

use super::{StoreError, StoreInner, SyncableStore};
use crate::path::SyncablePath;

/// Non-owning reference to a store
///
/// Accessors, documents and handlers keep one of these instead of the store
/// itself, so dropping the last [`SyncableStore`] tears everything down.
/// Every use upgrades first and fails with [`StoreError::StoreReleased`]
/// once the store is gone.
#[derive(Debug, Clone)]
pub struct StoreHandle(Weak<StoreInner>);

impl StoreHandle {
    pub(crate) fn new(inner: &Arc<StoreInner>) -> Self {
        Self(Arc::downgrade(inner))
    }

    pub fn upgrade(&self) -> Result<SyncableStore, StoreError> {
        self.0
            .upgrade()
            .map(SyncableStore::from_inner)
            .ok_or(StoreError::StoreReleased)
    }

    pub fn is_released(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// A path within a store, as held by an item accessor
#[derive(Debug, Clone)]
pub struct ItemHandle {
    store: StoreHandle,
    path: SyncablePath,
}

impl ItemHandle {
    pub(crate) fn new(store: StoreHandle, path: SyncablePath) -> Self {
        Self { store, path }
    }

    pub fn path(&self) -> &SyncablePath {
        &self.path
    }

    pub fn store(&self) -> Result<SyncableStore, StoreError> {
        self.store.upgrade()
    }
}
