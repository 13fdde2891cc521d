//! Integration tests for SqliteMetadataStore
//!
//! Each test creates a fresh in-memory database; the persistence tests use a
//! file in a temporary directory so the pool can be reopened.

use std::path::Path;

use syncq_cache::{DatabasePool, SqliteMetadataStore};
use syncq_core::domain::{
    ChangeKind, ClientApiError, EngineMode, ErrorDetail, ItemId, LocalFileMetadata,
    PayloadOwnership, PendingChange, ResetKind, SyncAttributes,
};
use syncq_core::ports::IMetadataStore;

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteMetadataStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteMetadataStore::new(pool.pool().clone())
}

fn attrs(name: &str) -> SyncAttributes {
    SyncAttributes::new(ItemId::new())
        .with_remote_file_name(name)
        .with_mime_type("text/plain")
}

// ============================================================================
// Records
// ============================================================================

#[tokio::test]
async fn test_create_and_find() {
    let store = setup().await;
    let a = attrs("a.txt").with_app_file_type("note").with_group_id("g1");

    let created = store.create(&a).await.unwrap();
    let found = store.find(&a.item_id).await.unwrap().expect("record");

    assert_eq!(found.item_id(), a.item_id);
    assert_eq!(found.remote_file_name(), "a.txt");
    assert_eq!(found.mime_type(), "text/plain");
    assert_eq!(found.app_file_type(), Some("note"));
    assert_eq!(found.group_id(), Some("g1"));
    assert_eq!(found.version(), None);
    assert!(!found.deleted_on_server());
    assert!(!found.has_pending_changes());
    assert_eq!(found.item_id(), created.item_id());
}

#[tokio::test]
async fn test_find_unknown_returns_none() {
    let store = setup().await;
    assert!(store.find(&ItemId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_without_mime_type_leaves_no_record() {
    let store = setup().await;
    let a = SyncAttributes::new(ItemId::new()).with_remote_file_name("a.txt");

    let err = store.create(&a).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ClientApiError>(),
        Some(ClientApiError::MimeTypeNotGiven { .. })
    ));
    assert!(store.find(&a.item_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_twice_fails() {
    let store = setup().await;
    let a = attrs("a.txt");
    store.create(&a).await.unwrap();
    assert!(store.create(&a).await.is_err());
}

#[tokio::test]
async fn test_save_round_trips_pending_changes() {
    let store = setup().await;
    let mut m = store.create(&attrs("a.txt")).await.unwrap();
    m.enqueue_upload(PendingChange::upload("/tmp/a.bin", PayloadOwnership::Transfer));
    m.mark_uploaded(4);
    store.save(&m).await.unwrap();

    let found = store.find(&m.item_id()).await.unwrap().unwrap();
    assert_eq!(found.version(), Some(4));
    assert_eq!(found.pending_changes().len(), 1);
    assert_eq!(found.pending_changes()[0].id(), m.pending_changes()[0].id());
    assert_eq!(
        found.pending_changes()[0].kind(),
        &ChangeKind::Upload {
            payload: "/tmp/a.bin".into(),
            ownership: PayloadOwnership::Transfer,
        }
    );
}

#[tokio::test]
async fn test_save_replaces_coalesced_changes() {
    let store = setup().await;
    let mut m = store.create(&attrs("a.txt")).await.unwrap();
    m.enqueue_upload(PendingChange::upload("/tmp/one", PayloadOwnership::Retain));
    store.save(&m).await.unwrap();

    m.enqueue_deletion();
    store.save(&m).await.unwrap();

    let found = store.find(&m.item_id()).await.unwrap().unwrap();
    assert_eq!(found.pending_changes().len(), 1);
    assert!(found.pending_deletion());
}

#[tokio::test]
async fn test_save_batch_writes_every_record() {
    let store = setup().await;
    let mut a = store.create(&attrs("a.txt")).await.unwrap();
    let mut b = store.create(&attrs("b.txt")).await.unwrap();
    a.mark_uploaded(1);
    b.mark_deleted_on_server();

    store.save_batch(&[a.clone(), b.clone()]).await.unwrap();

    assert_eq!(
        store.find(&a.item_id()).await.unwrap().unwrap().version(),
        Some(1)
    );
    assert!(store
        .find(&b.item_id())
        .await
        .unwrap()
        .unwrap()
        .deleted_on_server());
}

#[tokio::test]
async fn test_list_pending_orders_by_oldest_change() {
    let store = setup().await;
    let mut first = store.create(&attrs("first.txt")).await.unwrap();
    let mut second = store.create(&attrs("second.txt")).await.unwrap();
    let idle = store.create(&attrs("idle.txt")).await.unwrap();

    first.enqueue_upload(PendingChange::upload("/tmp/1", PayloadOwnership::Retain));
    store.save(&first).await.unwrap();
    second.enqueue_upload(PendingChange::upload("/tmp/2", PayloadOwnership::Retain));
    store.save(&second).await.unwrap();

    // Re-saving the first record keeps its place in the queue
    first.mark_uploaded(2);
    store.save(&first).await.unwrap();

    let pending = store.list_pending().await.unwrap();
    let ids: Vec<_> = pending.iter().map(|m| m.item_id()).collect();
    assert_eq!(ids, vec![first.item_id(), second.item_id()]);
    assert!(!ids.contains(&idle.item_id()));
}

#[tokio::test]
async fn test_list_all_includes_records_without_changes() {
    let store = setup().await;
    store.create(&attrs("a.txt")).await.unwrap();
    let mut b = store.create(&attrs("b.txt")).await.unwrap();
    b.enqueue_deletion();
    store.save(&b).await.unwrap();

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].remote_file_name(), "a.txt");
    assert!(all[1].pending_deletion());
}

#[tokio::test]
async fn test_remove_and_remove_all() {
    let store = setup().await;
    let mut a = store.create(&attrs("a.txt")).await.unwrap();
    a.enqueue_deletion();
    store.save(&a).await.unwrap();
    let b = store.create(&attrs("b.txt")).await.unwrap();
    store.create(&attrs("c.txt")).await.unwrap();

    store.remove(&a.item_id()).await.unwrap();
    assert!(store.find(&a.item_id()).await.unwrap().is_none());
    assert!(store.list_pending().await.unwrap().is_empty());
    assert!(store.find(&b.item_id()).await.unwrap().is_some());

    assert_eq!(store.remove_all().await.unwrap(), 2);
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_decrement_version_persists() {
    let store = setup().await;
    let mut m = store.create(&attrs("a.txt")).await.unwrap();
    m.mark_uploaded(3);
    m.apply_reset(ResetKind::DecrementVersion);
    store.save(&m).await.unwrap();

    let found = store.find(&m.item_id()).await.unwrap().unwrap();
    assert_eq!(found.version(), Some(2));
}

// ============================================================================
// Engine mode
// ============================================================================

#[tokio::test]
async fn test_mode_absent_on_first_launch() {
    let store = setup().await;
    assert!(store.load_mode().await.unwrap().is_none());
}

#[tokio::test]
async fn test_mode_round_trips_including_error_payload() {
    let store = setup().await;
    let modes = vec![
        EngineMode::Synchronizing,
        EngineMode::NetworkNotConnected,
        EngineMode::ClientApiError(ClientApiError::UserNotSignedIn),
        EngineMode::NonRecoverableError(
            ErrorDetail::new("rejected")
                .with_operation("submit_batch")
                .with_attempts(3),
        ),
        EngineMode::InternalError(ErrorDetail::new("decode failed")),
        EngineMode::Idle,
    ];
    for mode in modes {
        store.save_mode(&mode).await.unwrap();
        assert_eq!(store.load_mode().await.unwrap(), Some(mode));
    }
}

#[tokio::test]
async fn test_corrupt_mode_record_fails_load() {
    let pool = DatabasePool::in_memory().await.unwrap();
    sqlx::query("INSERT INTO engine_state (key, value, updated_at) VALUES ('mode', ?, '')")
        .bind(r#"{"kind":"napping"}"#)
        .execute(pool.pool())
        .await
        .unwrap();
    let store = SqliteMetadataStore::new(pool.pool().clone());

    assert!(store.load_mode().await.is_err());
}

// ============================================================================
// Durability across reopen
// ============================================================================

async fn open(path: &Path) -> SqliteMetadataStore {
    let pool = DatabasePool::new(path).await.unwrap();
    SqliteMetadataStore::new(pool.pool().clone())
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syncq.db");
    let id;

    {
        let store = open(&path).await;
        let mut m = LocalFileMetadata::new(ItemId::new(), "a.txt", "text/plain");
        m.enqueue_upload(PendingChange::upload("/tmp/a", PayloadOwnership::Retain));
        store.save(&m).await.unwrap();
        store.save_mode(&EngineMode::NetworkNotConnected).await.unwrap();
        id = m.item_id();
    }

    let store = open(&path).await;
    let found = store.find(&id).await.unwrap().unwrap();
    assert_eq!(found.pending_changes().len(), 1);
    assert_eq!(
        store.load_mode().await.unwrap(),
        Some(EngineMode::NetworkNotConnected)
    );
}
