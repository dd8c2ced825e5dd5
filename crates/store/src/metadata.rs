//! Item metadata as persisted by a backing store
//!
//! [`SyncableItemMetadata`] travels with the item between replicas and
//! carries its provenance. [`LocalItemMetadata`] is derived state owned by
//! the hash engine on each replica.

use serde::{Deserialize, Serialize};

use crate::crypto::Signed;
use crate::linked_data::{CodecError, Hash};
use crate::path::{SyncableItemType, SyncablePath, TimeId};
use crate::trusted_time::{TrustedTime, TrustedTimeSignature};

/// Derived hash and size information
///
/// For files `hash` is the hash of the encoded payload. For folders and
/// bundles it is the hash of the `child id -> child hash` map and is `None`
/// whenever a descendant changed since it was last computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalItemMetadata {
    pub hash: Option<Hash>,
    pub num_descendants: u64,
    pub size_bytes: u64,
}

/// The writer's signed claim about an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableOrigin {
    pub content_hash: Hash,
    pub trusted_time: Option<TrustedTime>,
}

/// Signature extras binding an origin to where the item lives
#[derive(Debug, Clone, Serialize)]
pub struct OriginExtras<'a> {
    pub path: &'a SyncablePath,
    pub item_type: SyncableItemType,
    pub name: &'a str,
}

/// Later endorsement of an item by an owner (or above)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableAcceptance {
    pub time_id: TimeId,
    pub trusted_time_signature: TrustedTimeSignature,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptanceExtras<'a> {
    pub path: &'a SyncablePath,
    pub content_hash: &'a Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableProvenance {
    pub origin: Signed<SyncableOrigin>,
    pub acceptance: Option<Signed<SyncableAcceptance>>,
}

/// Metadata that replicates with the item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableItemMetadata {
    /// Plain name, or the hex encoded sealed name for encrypted ids
    pub name: String,
    pub provenance: SyncableProvenance,
}

/// Everything a backing store keeps about one item besides its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItemMetadata {
    pub item_type: SyncableItemType,
    pub item: SyncableItemMetadata,
    pub local: LocalItemMetadata,
}

impl StoredItemMetadata {
    pub fn origin(&self) -> &Signed<SyncableOrigin> {
        &self.item.provenance.origin
    }

    pub fn acceptance(&self) -> Option<&Signed<SyncableAcceptance>> {
        self.item.provenance.acceptance.as_ref()
    }
}

/// The origin content hash of a folder or bundle
///
/// Containers have no payload of their own, so the writer signs over the
/// container's identity instead: where it is, what it is and what it is called.
pub fn container_content_hash(
    path: &SyncablePath,
    item_type: SyncableItemType,
    name: &str,
) -> Result<Hash, CodecError> {
    Hash::of_encoded(&(path, item_type, name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::SyncableId;

    #[test]
    fn test_container_hash_binds_path_and_name() {
        let root = SyncablePath::root("store");
        let a = root.append(SyncableId::new_uuid(SyncableItemType::Folder, false));
        let b = root.append(SyncableId::new_uuid(SyncableItemType::Folder, false));

        let ha = container_content_hash(&a, SyncableItemType::Folder, "docs").unwrap();
        assert_eq!(
            ha,
            container_content_hash(&a, SyncableItemType::Folder, "docs").unwrap()
        );
        assert_ne!(
            ha,
            container_content_hash(&b, SyncableItemType::Folder, "docs").unwrap()
        );
        assert_ne!(
            ha,
            container_content_hash(&a, SyncableItemType::Folder, "other").unwrap()
        );
    }
}
