//! Integration tests for roles, grants and what they allow

mod common;

use std::time::Duration;

use syncable::access::AccessControlError;
use syncable::crdt::DocumentError;
use syncable::crypto::CryptoKeySetId;
use syncable::prelude::*;

fn id_of(key: &SecretKey) -> CryptoKeySetId {
    CryptoKeySetId::for_public_key(&key.public())
}

#[tokio::test]
async fn test_editor_writes_until_downgraded() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    let testing = common::create_folder(&root, "testing").await;

    let k2 = SecretKey::generate();
    testing.grant_access(k2.public(), Role::Editor).await.unwrap();

    // as K2, write a file into the shared folder
    let k2_store = common::open_as(&backing, &k2).await;
    let k2_testing = common::folder_at(&k2_store, testing.path()).await;
    assert_eq!(k2_testing.user_role().await.unwrap(), Some(Role::Editor));
    let written = common::create_file(&k2_testing, "test.txt", "hello world").await;

    // as K1, read it back
    let id = written.path().last_id().unwrap().clone();
    let read = testing
        .get(&id, Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(read.get_string().await.unwrap(), "hello world");
    assert_eq!(read.name().await.unwrap(), "test.txt");

    let from_k1 = common::create_file(&testing, "notes.txt", "from k1").await;
    testing.modify_access(&id_of(&k2), Role::Viewer).await.unwrap();

    let result = k2_testing
        .create_string_file(
            SyncableId::new_uuid(SyncableItemType::File, true),
            CreateMode::local("again.txt"),
            "denied",
        )
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);
    // still allowed to read what the creator wrote
    assert_eq!(k2_testing.user_role().await.unwrap(), Some(Role::Viewer));
    let k2_read = k2_testing
        .get(from_k1.path().last_id().unwrap(), Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(k2_read.get_string().await.unwrap(), "from k1");
}

#[tokio::test]
async fn test_items_without_trusted_time_follow_current_role() {
    let (k1_store, backing, k1) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    let testing = common::create_folder(&root, "testing").await;

    let k2 = SecretKey::generate();
    testing.grant_access(k2.public(), Role::Editor).await.unwrap();
    let k2_store = common::open_as(&backing, &k2).await;
    let k2_testing = common::folder_at(&k2_store, testing.path()).await;
    let written = common::create_file(&k2_testing, "test.txt", "hello world").await;

    testing.modify_access(&id_of(&k2), Role::Viewer).await.unwrap();

    // a fresh replica view has no trust marks and re-checks the origin
    let fresh = common::open_as(&backing, &k1).await;
    let result = fresh
        .get_at_path(written.path(), Some(SyncableItemType::File))
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);

    // and leaves it out of listings
    let listed = common::folder_at(&fresh, testing.path()).await.ls().await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_local_downgrade_rechecks_items() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    let testing = common::create_folder(&root, "testing").await;

    let k2 = SecretKey::generate();
    testing.grant_access(k2.public(), Role::Editor).await.unwrap();
    let k2_store = common::open_as(&backing, &k2).await;
    let k2_testing = common::folder_at(&k2_store, testing.path()).await;
    let written = common::create_file(&k2_testing, "test.txt", "hello world").await;

    // checked and marked as trusted while k2 could still write
    assert!(k1_store
        .get_at_path(written.path(), Some(SyncableItemType::File))
        .await
        .is_ok());

    testing.modify_access(&id_of(&k2), Role::Viewer).await.unwrap();
    let result = k1_store
        .get_at_path(written.path(), Some(SyncableItemType::File))
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);
}

#[tokio::test]
async fn test_trusted_time_keeps_items_after_downgrade() {
    common::init_tracing();
    let authority = SecretKey::generate();
    let backing = MemoryBackingStore::new();
    let k1 = SecretKey::generate();
    let k2 = SecretKey::generate();
    let options = |key: &SecretKey| {
        common::options(&backing, key)
            .with_trusted_time(KeyedTrustedTimeSource::issuing(authority.clone()))
    };

    let k1_store = SyncableStore::initialize(options(&k1)).await.unwrap();
    let root = k1_store.root().await.unwrap();
    let testing = common::create_folder(&root, "testing").await;
    testing.grant_access(k2.public(), Role::Editor).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let k2_store = SyncableStore::open(options(&k2)).await.unwrap();
    let k2_testing = common::folder_at(&k2_store, testing.path()).await;
    let written = common::create_file(&k2_testing, "test.txt", "hello world").await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    testing.modify_access(&id_of(&k2), Role::Viewer).await.unwrap();

    // K2 was an editor at the time the file was written
    let fresh = SyncableStore::open(options(&k1)).await.unwrap();
    let file = fresh
        .get_at_path(written.path(), Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(file.get_string().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_admin_manages_lower_roles_only() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();

    let admin = SecretKey::generate();
    root.grant_access(admin.public(), Role::Admin).await.unwrap();

    let admin_store = common::open_as(&backing, &admin).await;
    let admin_root = admin_store.root().await.unwrap();

    let viewer = SecretKey::generate();
    admin_root
        .grant_access(viewer.public(), Role::Viewer)
        .await
        .unwrap();

    let owner = SecretKey::generate();
    let result = admin_root.grant_access(owner.public(), Role::Owner).await;
    assert!(matches!(
        result,
        Err(StoreError::AccessControl(AccessControlError::Forbidden { .. }))
    ));

    // K1 sees the admin's grant and nothing else
    let access = root.access_control().await.unwrap();
    access.refresh().await.unwrap();
    let state = access
        .with(|access| access.get_access_control_state().clone())
        .await;
    assert_eq!(state.get(&id_of(&viewer)), Some(&Role::Viewer));
    assert_eq!(state.get(&id_of(&owner)), None);
}

#[tokio::test]
async fn test_granting_twice_fails() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let k2 = SecretKey::generate();
    root.grant_access(k2.public(), Role::Viewer).await.unwrap();

    let result = root.grant_access(k2.public(), Role::Editor).await;
    assert!(matches!(
        result,
        Err(StoreError::AccessControl(AccessControlError::AlreadyGranted(_)))
    ));
}

#[tokio::test]
async fn test_appender_writes_but_cannot_read() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    let inbox = common::create_folder(&root, "inbox").await;

    let appender = SecretKey::generate();
    inbox
        .grant_access(appender.public(), Role::Appender)
        .await
        .unwrap();

    let appender_store = common::open_as(&backing, &appender).await;
    let appender_inbox = common::folder_at(&appender_store, inbox.path()).await;
    let dropped = common::create_file(&appender_inbox, "report.txt", "for your eyes").await;

    let result = dropped.get_string().await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);
    // names stay hidden too
    let listed = appender_inbox.ls().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].name.starts_with('<'));

    let id = dropped.path().last_id().unwrap().clone();
    let read = inbox
        .get(&id, Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(read.get_string().await.unwrap(), "for your eyes");
}

#[tokio::test]
async fn test_removed_reader_loses_access() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    let shared = common::create_folder(&root, "shared").await;

    let k2 = SecretKey::generate();
    shared.grant_access(k2.public(), Role::Viewer).await.unwrap();
    let access = shared.access_control().await.unwrap();
    let before = access.with(|access| access.current_shared_key()).await;

    shared.remove_access(&id_of(&k2)).await.unwrap();
    let after = access.with(|access| access.current_shared_key()).await;
    // removing a reader rotates the folder keys
    assert_ne!(before, after);

    let file = common::create_file(&shared, "later.txt", "not for k2").await;
    let k2_store = common::open_as(&backing, &k2).await;
    let k2_shared = common::folder_at(&k2_store, shared.path()).await;
    assert_eq!(k2_shared.user_role().await.unwrap(), None);

    let id = file.path().last_id().unwrap().clone();
    let k2_file = k2_shared
        .get(&id, Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(
        k2_file.get_string().await.unwrap_err().code(),
        ErrorCode::Untrusted
    );
}

#[tokio::test]
async fn test_store_creator_owns_every_folder() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    assert_eq!(root.user_role().await.unwrap(), Some(Role::Creator));

    let k2 = SecretKey::generate();
    root.grant_access(k2.public(), Role::Editor).await.unwrap();
    let k2_store = common::open_as(&backing, &k2).await;
    let k2_root = k2_store.root().await.unwrap();
    let k2_folder = common::create_folder(&k2_root, "k2 stuff").await;
    assert_eq!(k2_folder.user_role().await.unwrap(), Some(Role::Creator));

    let seen_by_k1 = common::folder_at(&k1_store, k2_folder.path()).await;
    assert_eq!(seen_by_k1.user_role().await.unwrap(), Some(Role::Owner));
    assert_eq!(seen_by_k1.name().await.unwrap(), "k2 stuff");

    let stranger = common::open_as(&backing, &SecretKey::generate()).await;
    assert_eq!(stranger.user_role(root.path()).await.unwrap(), None);
}

#[tokio::test]
async fn test_rejected_compaction_writes_nothing() {
    let (k1_store, backing, _) = common::setup_store().await;
    let root = k1_store.root().await.unwrap();
    let testing = common::create_folder(&root, "testing").await;
    let admin = SecretKey::generate();
    testing.grant_access(admin.public(), Role::Admin).await.unwrap();

    let document = testing.path().append(SyncableId::access_control());
    let snapshots = document.append(SyncableId::snapshots());
    let deltas = document.append(SyncableId::deltas());
    let snapshots_before = backing.get_ids_in_path(&snapshots, None).await.unwrap();
    let deltas_before = backing.get_ids_in_path(&deltas, None).await.unwrap();

    // only the folder creator may snapshot its access control
    let admin_store = common::open_as(&backing, &admin).await;
    let admin_testing = common::folder_at(&admin_store, testing.path()).await;
    let access = admin_testing.access_control().await.unwrap();
    let result = access.compact().await;
    assert!(matches!(
        result,
        Err(StoreError::Document(DocumentError::Invalid(_)))
    ));

    assert_eq!(
        backing.get_ids_in_path(&snapshots, None).await.unwrap(),
        snapshots_before
    );
    assert_eq!(
        backing.get_ids_in_path(&deltas, None).await.unwrap(),
        deltas_before
    );

    // the creator still can
    testing.access_control().await.unwrap().compact().await.unwrap();
    assert_eq!(
        backing.get_ids_in_path(&snapshots, None).await.unwrap().len(),
        snapshots_before.len() + 1
    );
}
