//! Hierarchical addressing
//!
//! A [`SyncablePath`] is the storage root id followed by the typed ids of
//! every container down to the item. Paths are plain values: equality is
//! structural and the type of the addressed item is read off its last id.

mod id;
mod time_id;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use id::{IdScheme, SyncableId, SyncableItemType};
pub use time_id::TimeId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("invalid syncable id: {0}")]
    InvalidId(String),
    #[error("invalid time id: {0}")]
    InvalidTimeId(String),
    #[error("invalid syncable path: {0}")]
    InvalidPath(String),
}

/// Address of one item in a store
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncablePath {
    storage_root_id: String,
    ids: Vec<SyncableId>,
}

impl SyncablePath {
    /// The root folder of a store
    pub fn root(storage_root_id: impl Into<String>) -> Self {
        Self {
            storage_root_id: storage_root_id.into(),
            ids: Vec::new(),
        }
    }

    pub fn new(storage_root_id: impl Into<String>, ids: Vec<SyncableId>) -> Self {
        Self {
            storage_root_id: storage_root_id.into(),
            ids,
        }
    }

    pub fn storage_root_id(&self) -> &str {
        &self.storage_root_id
    }

    pub fn ids(&self) -> &[SyncableId] {
        &self.ids
    }

    pub fn is_root(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn last_id(&self) -> Option<&SyncableId> {
        self.ids.last()
    }

    /// Type of the addressed item, the root is always a folder
    pub fn item_type(&self) -> SyncableItemType {
        self.ids
            .last()
            .map(|id| id.item_type())
            .unwrap_or(SyncableItemType::Folder)
    }

    pub fn append(&self, id: SyncableId) -> Self {
        let mut ids = self.ids.clone();
        ids.push(id);
        Self {
            storage_root_id: self.storage_root_id.clone(),
            ids,
        }
    }

    pub fn append_all(&self, ids: impl IntoIterator<Item = SyncableId>) -> Self {
        let mut path = self.clone();
        path.ids.extend(ids);
        path
    }

    pub fn parent(&self) -> Option<Self> {
        if self.ids.is_empty() {
            return None;
        }
        Some(Self {
            storage_root_id: self.storage_root_id.clone(),
            ids: self.ids[..self.ids.len() - 1].to_vec(),
        })
    }

    /// Every ancestor from the direct parent up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = SyncablePath> + '_ {
        (0..self.ids.len()).rev().map(move |len| Self {
            storage_root_id: self.storage_root_id.clone(),
            ids: self.ids[..len].to_vec(),
        })
    }

    /// Whether `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &SyncablePath) -> bool {
        self.storage_root_id == prefix.storage_root_id && self.ids.starts_with(&prefix.ids)
    }

    /// The ids below `ancestor`, or `None` when `ancestor` is not a prefix
    pub fn relative_to(&self, ancestor: &SyncablePath) -> Option<&[SyncableId]> {
        if !self.starts_with(ancestor) {
            return None;
        }
        Some(&self.ids[ancestor.ids.len()..])
    }

    /// Nearest folder strictly above this path
    ///
    /// The root has no owning folder and is governed by itself.
    pub fn owning_folder(&self) -> SyncablePath {
        self.ancestors()
            .find(|ancestor| ancestor.item_type() == SyncableItemType::Folder)
            .unwrap_or_else(|| self.clone())
    }

    /// Nearest folder at or above this path
    pub fn nearest_folder(&self) -> SyncablePath {
        if self.item_type() == SyncableItemType::Folder {
            self.clone()
        } else {
            self.owning_folder()
        }
    }
}

impl fmt::Display for SyncablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_root_id)?;
        for id in &self.ids {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SyncablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncablePath({})", self)
    }
}

impl FromStr for SyncablePath {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let storage_root_id = parts
            .next()
            .filter(|root| !root.is_empty())
            .ok_or_else(|| IdError::InvalidPath(s.to_string()))?;
        let ids = parts.map(str::parse).collect::<Result<Vec<SyncableId>, _>>()?;
        Ok(Self::new(storage_root_id, ids))
    }
}

impl TryFrom<String> for SyncablePath {
    type Error = IdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SyncablePath> for String {
    fn from(path: SyncablePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn folder() -> SyncableId {
        SyncableId::new_uuid(SyncableItemType::Folder, false)
    }

    fn bundle() -> SyncableId {
        SyncableId::new_uuid(SyncableItemType::Bundle, false)
    }

    fn file() -> SyncableId {
        SyncableId::new_time(SyncableItemType::File, false)
    }

    #[test]
    fn test_append_and_parent() {
        let root = SyncablePath::root("store");
        let a = root.append(folder());
        let b = a.append(file());
        assert_eq!(b.parent().unwrap(), a);
        assert_eq!(a.parent().unwrap(), root);
        assert!(root.parent().is_none());
        assert!(root.is_root());
        assert_eq!(root.item_type(), SyncableItemType::Folder);
    }

    #[test]
    fn test_prefix_relations() {
        let root = SyncablePath::root("store");
        let f = folder();
        let x = file();
        let path = root.append(f.clone()).append(x.clone());
        assert!(path.starts_with(&root));
        assert!(path.starts_with(&path));
        assert!(!root.starts_with(&path));
        assert_eq!(path.relative_to(&root).unwrap(), &[f, x]);
        assert!(SyncablePath::root("other").relative_to(&root).is_none());
    }

    #[test]
    fn test_owning_folder_skips_bundles() {
        let root = SyncablePath::root("store");
        let docs = root.append(folder());
        let nested = docs.append(bundle()).append(bundle()).append(file());
        assert_eq!(nested.owning_folder(), docs);
        assert_eq!(docs.owning_folder(), root);
        assert_eq!(docs.nearest_folder(), docs);
        assert_eq!(root.owning_folder(), root);
    }

    #[test]
    fn test_string_roundtrip() {
        let path = SyncablePath::root("store").append(folder()).append(file());
        let parsed: SyncablePath = path.to_string().parse().unwrap();
        assert_eq!(parsed, path);
        assert_eq!("store".parse::<SyncablePath>().unwrap(), SyncablePath::root("store"));
        assert!("".parse::<SyncablePath>().is_err());
        assert!("store/nope".parse::<SyncablePath>().is_err());
    }

    #[test]
    fn test_ancestors_walk_up() {
        let root = SyncablePath::root("store");
        let a = root.append(folder());
        let b = a.append(bundle());
        let ancestors: Vec<_> = b.ancestors().collect();
        assert_eq!(ancestors, vec![a, root]);
    }
}
