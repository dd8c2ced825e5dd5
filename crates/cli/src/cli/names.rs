//! Human readable names on top of typed ids
//!
//! The CLI addresses items by `/` separated names. Each name maps to a
//! deterministic id inside its folder, so the same name always lands on the
//! same id on every replica. Encrypted ids are salted with the folder's keys
//! and tried before plain ones.

use syncable::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("no item named {0}")]
    NotFound(String),
    #[error("{0} is not a folder")]
    NotAFolder(String),
    #[error("{0} already exists")]
    Exists(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn segments(name: &str) -> Vec<&str> {
    name.split('/').filter(|s| !s.is_empty()).collect()
}

/// Split off the last segment, if any
pub fn split_last(name: &str) -> Option<(Vec<&str>, &str)> {
    let mut parts = segments(name);
    let last = parts.pop()?;
    Some((parts, last))
}

pub async fn child_id(
    folder: &SyncableFolder,
    item_type: SyncableItemType,
    encrypted: bool,
    name: &str,
) -> Result<SyncableId, StoreError> {
    folder
        .deterministic_id(item_type, encrypted, name.as_bytes())
        .await
}

/// Find a folder or file called `name` directly inside `folder`
pub async fn lookup(folder: &SyncableFolder, name: &str) -> Result<Option<SyncableItem>, StoreError> {
    for item_type in [SyncableItemType::Folder, SyncableItemType::File] {
        for encrypted in [true, false] {
            let id = match child_id(folder, item_type, encrypted, name).await {
                Ok(id) => id,
                // no shared keys here, so no encrypted ids either
                Err(e) if e.code() == ErrorCode::Untrusted => continue,
                Err(e) => return Err(e),
            };
            if folder.exists(&id).await? {
                return Ok(Some(folder.get(&id, Some(item_type)).await?));
            }
        }
    }
    Ok(None)
}

pub async fn resolve(store: &SyncableStore, name: &str) -> Result<SyncableItem, NameError> {
    let Some((parents, last)) = split_last(name) else {
        return Ok(SyncableItem::Folder(store.root().await?));
    };
    let folder = resolve_folder(store, &parents).await?;
    lookup(&folder, last)
        .await?
        .ok_or_else(|| NameError::NotFound(name.to_string()))
}

pub async fn resolve_folder(
    store: &SyncableStore,
    segments: &[&str],
) -> Result<SyncableFolder, NameError> {
    let mut folder = store.root().await?;
    for (depth, segment) in segments.iter().enumerate() {
        let walked = segments[..=depth].join("/");
        folder = match lookup(&folder, segment).await? {
            Some(SyncableItem::Folder(child)) => child,
            Some(_) => return Err(NameError::NotAFolder(walked)),
            None => return Err(NameError::NotFound(walked)),
        };
    }
    Ok(folder)
}

/// Walk `segments`, creating any folder that does not exist yet
pub async fn ensure_folder(
    store: &SyncableStore,
    segments: &[&str],
    encrypted: bool,
) -> Result<SyncableFolder, NameError> {
    let mut folder = store.root().await?;
    for (depth, segment) in segments.iter().enumerate() {
        folder = match lookup(&folder, segment).await? {
            Some(SyncableItem::Folder(child)) => child,
            Some(_) => return Err(NameError::NotAFolder(segments[..=depth].join("/"))),
            None => {
                let id = child_id(&folder, SyncableItemType::Folder, encrypted, segment).await?;
                tracing::debug!("creating folder {} as {}", segment, id);
                folder.create_folder(id, CreateMode::local(*segment)).await?
            }
        };
    }
    Ok(folder)
}
