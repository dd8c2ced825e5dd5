/**
 * Generic snapshot + delta persistence for
 *  conflict-free documents, with live watching
 *  and debounced saves.
 */
pub mod crdt;
/**
 * Per-folder access control: roles, signed
 *  access changes and the folder's shared keys.
 */
pub mod access;
/**
 * Pluggable persistence underneath a store.
 *  In-memory and on-disk implementations.
 */
pub mod backing;
/**
 * Per-folder deletion tombstones.
 */
pub mod changes;
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Signing keys and key sets
 *  - Key-to-key key sharing
 *  - Folder shared keys and sealed payloads
 */
pub mod crypto;
/**
 * Name and payload encryption for the
 *  items of one folder.
 */
pub mod folder_ops;
/**
 * Content hashes and deterministic
 *  DAG-CBOR encoding.
 */
pub mod linked_data;
pub mod metadata;
/**
 * Typed ids and the paths built from them.
 */
pub mod path;
/**
 * The store itself: path resolution, item
 *  accessors, hashing, creation and deletion.
 */
pub mod store;
/**
 * Hash based replication between two stores.
 */
pub mod sync;
/**
 * Provenance checks and the local marks
 *  that remember them.
 */
pub mod trust;
pub mod trusted_time;

pub mod prelude {
    pub use crate::access::Role;
    pub use crate::backing::{BackingStore, FsBackingStore, MemoryBackingStore};
    pub use crate::config::StoreConfig;
    pub use crate::crypto::{InMemoryUserKeys, PublicKey, SecretKey, UserKeys};
    pub use crate::path::{SyncableId, SyncableItemType, SyncablePath};
    pub use crate::store::{
        ChildEnumerable, CreateMode, Encodable, ErrorCode, Hashable, ItemAccessor, StoreError,
        StoreOptions, SyncableBundle, SyncableFile, SyncableFolder, SyncableItem, SyncableStore,
    };
    pub use crate::sync::{LocalRemote, PullStrategy, SyncDriver};
    pub use crate::trusted_time::{KeyedTrustedTimeSource, NoTrustedTimeSource};
}
