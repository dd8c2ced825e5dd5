use std::collections::HashSet;

use parking_lot::RwLock;

use crate::path::SyncablePath;

/// Paths whose provenance was already verified by this store
///
/// Marks are local and never replicated. They are dropped for a folder's
/// subtree whenever its access control changes, locally or through another
/// replica.
#[derive(Debug, Default)]
pub struct TrustMarks {
    marked: RwLock<HashSet<SyncablePath>>,
}

impl TrustMarks {
    pub fn mark(&self, path: &SyncablePath) {
        self.marked.write().insert(path.clone());
    }

    pub fn is_marked(&self, path: &SyncablePath) -> bool {
        self.marked.read().contains(path)
    }

    /// Forget every mark at or below `folder`
    pub fn clear_under(&self, folder: &SyncablePath) {
        let mut marked = self.marked.write();
        let before = marked.len();
        marked.retain(|path| !path.starts_with(folder));
        tracing::trace!("cleared {} trust marks under {}", before - marked.len(), folder);
    }

    pub fn len(&self) -> usize {
        self.marked.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.read().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::{SyncableId, SyncableItemType};

    #[test]
    fn test_clear_under_keeps_siblings() {
        let marks = TrustMarks::default();
        let root = SyncablePath::root("store");
        let a = root.append(SyncableId::new_uuid(SyncableItemType::Folder, false));
        let b = root.append(SyncableId::new_uuid(SyncableItemType::Folder, false));
        let file = a.append(SyncableId::new_uuid(SyncableItemType::File, false));
        for path in [&root, &a, &b, &file] {
            marks.mark(path);
        }

        marks.clear_under(&a);
        assert!(!marks.is_marked(&a));
        assert!(!marks.is_marked(&file));
        assert!(marks.is_marked(&b));
        assert!(marks.is_marked(&root));
        assert_eq!(marks.len(), 2);
    }
}
