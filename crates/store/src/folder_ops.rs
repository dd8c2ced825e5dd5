//! Per-folder encryption gateway
//!
//! Encrypted names and payloads are sealed to the folder's current shared
//! key set. Sealing only needs the public half, so appenders can write
//! encrypted items they cannot read back. Opening needs a share of the key
//! set the item was sealed with.

use crate::access::{AccessControlDocument, Role};
use crate::crypto::{SealedPayload, SharedKeySet};
use crate::path::SyncablePath;
use crate::store::{StoreError, StoreHandle, SyncableStore};

#[derive(Debug, Clone)]
pub struct FolderOperationsHandler {
    store: StoreHandle,
    folder: SyncablePath,
}

impl FolderOperationsHandler {
    pub(crate) fn new(store: StoreHandle, folder: SyncablePath) -> Self {
        Self { store, folder }
    }

    pub fn folder(&self) -> &SyncablePath {
        &self.folder
    }

    fn store(&self) -> Result<SyncableStore, StoreError> {
        self.store.upgrade()
    }

    pub async fn user_role(&self) -> Result<Option<Role>, StoreError> {
        self.store()?.user_role(&self.folder).await
    }

    /// Hex encoded sealed name
    pub async fn encrypt_name(&self, name: &str) -> Result<String, StoreError> {
        let sealed = self.encrypt_payload(name.as_bytes()).await?;
        Ok(hex::encode(sealed))
    }

    pub async fn decrypt_name(&self, encrypted: &str) -> Result<String, StoreError> {
        let sealed = hex::decode(encrypted)
            .map_err(|e| StoreError::Format(format!("encrypted name is not hex: {e}")))?;
        let name = self.decrypt_payload(&sealed).await?;
        String::from_utf8(name).map_err(|e| StoreError::Format(format!("name is not utf-8: {e}")))
    }

    pub async fn encrypt_payload(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let store = self.store()?;
        let access = store.access_control_document(&self.folder).await?;
        let (keys_id, public_key) = access
            .with(|access| access.current_shared_key())
            .await
            .ok_or_else(|| StoreError::untrusted(&self.folder, "folder has no shared keys"))?;
        Ok(SealedPayload::seal(&keys_id, &public_key, data)?.to_bytes()?)
    }

    pub async fn decrypt_payload(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let sealed = SealedPayload::from_bytes(data)?;
        let keys = self.shared_keys(|store, access| {
            access.recover_shared_keys(&sealed.keys_id, store.user_keys().as_ref())
        })
        .await?;
        Ok(keys.open(&sealed)?)
    }

    /// Salt for deterministic ids of encrypted items
    ///
    /// Derived from the folder's first shared key set, so it stays the same
    /// across key rotations.
    pub async fn deterministic_id_salt(&self) -> Result<[u8; 32], StoreError> {
        let keys = self
            .shared_keys(|store, access| {
                access.recover_first_shared_keys(store.user_keys().as_ref())
            })
            .await?;
        Ok(keys.deterministic_id_salt())
    }

    async fn shared_keys(
        &self,
        recover: impl FnOnce(&SyncableStore, &AccessControlDocument) -> Option<SharedKeySet> + Send,
    ) -> Result<SharedKeySet, StoreError> {
        let store = self.store()?;
        let access = store.access_control_document(&self.folder).await?;
        access
            .with(|access| recover(&store, access))
            .await
            .ok_or_else(|| StoreError::untrusted(&self.folder, "no share of the folder keys"))
    }
}
