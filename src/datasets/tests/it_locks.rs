//! Dataset lock coordinator tests
//!
//! Covers the mutual-exclusion invariant: at every committed state either
//! the exclusive slot is empty or the shared set is empty, never both
//! occupied.

use pgtemp::PgTempDB;
use uuid::Uuid;

use crate::{CatalogDb, DEFAULT_POOL_SIZE, DatasetId, Error, LockKind};

/// Creates a dataset and releases the creating workflow's lock, leaving it
/// unheld.
async fn unlocked_dataset(db: &CatalogDb, name: &str) -> DatasetId {
    let dataset = db
        .create_dataset(name, None, "wf-setup")
        .await
        .expect("Failed to create dataset");
    db.unlock_exclusive(dataset, "wf-setup")
        .await
        .expect("Failed to release setup lock");
    dataset
}

#[tokio::test]
async fn lock_exclusive_is_idempotent_for_the_same_workflow() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let dataset = unlocked_dataset(&db, "idempotent-relock").await;

    //* When
    db.lock_exclusive(dataset, "wf-1")
        .await
        .expect("First exclusive lock should succeed");
    db.lock_exclusive(dataset, "wf-1")
        .await
        .expect("Re-lock by the same workflow should succeed");

    //* Then
    let state = db
        .lock_state(dataset)
        .await
        .expect("Failed to read lock state");
    assert_eq!(state.exclusive.as_deref(), Some("wf-1"));
    assert!(state.shared.is_empty());
}

#[tokio::test]
async fn lock_exclusive_conflicts_with_another_exclusive_holder() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let dataset = unlocked_dataset(&db, "exclusive-vs-exclusive").await;

    db.lock_exclusive(dataset, "wf-1")
        .await
        .expect("First exclusive lock should succeed");

    //* When
    let err = db
        .lock_exclusive(dataset, "wf-2")
        .await
        .expect_err("Second exclusive lock should conflict");

    //* Then
    assert!(matches!(
        err,
        Error::LockConflict {
            dataset: conflicted,
            kind: LockKind::Exclusive,
        } if conflicted == dataset
    ));
    assert!(err.is_retryable(), "lock conflicts are engine-retryable");

    // The original holder is untouched
    let state = db
        .lock_state(dataset)
        .await
        .expect("Failed to read lock state");
    assert_eq!(state.exclusive.as_deref(), Some("wf-1"));
}

#[tokio::test]
async fn lock_shared_allows_multiple_holders_with_set_semantics() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let dataset = unlocked_dataset(&db, "shared-holders").await;

    //* When
    db.lock_shared(dataset, "wf-1")
        .await
        .expect("First shared lock should succeed");
    db.lock_shared(dataset, "wf-2")
        .await
        .expect("Second shared lock should succeed");
    // Duplicate add by an existing holder is a successful no-op
    db.lock_shared(dataset, "wf-1")
        .await
        .expect("Duplicate shared lock should succeed");

    //* Then
    let state = db
        .lock_state(dataset)
        .await
        .expect("Failed to read lock state");
    assert!(state.exclusive.is_none());

    let mut holders: Vec<&str> = state.shared.iter().map(|w| w.as_str()).collect();
    holders.sort_unstable();
    assert_eq!(holders, ["wf-1", "wf-2"]);
}

#[tokio::test]
async fn exclusive_blocks_shared_and_shared_blocks_exclusive() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");

    let exclusive_first = unlocked_dataset(&db, "exclusive-first").await;
    let shared_first = unlocked_dataset(&db, "shared-first").await;

    //* When
    db.lock_exclusive(exclusive_first, "wf-1")
        .await
        .expect("Exclusive lock should succeed");
    let shared_err = db
        .lock_shared(exclusive_first, "wf-2")
        .await
        .expect_err("Shared lock should conflict with exclusive holder");

    db.lock_shared(shared_first, "wf-1")
        .await
        .expect("Shared lock should succeed");
    let exclusive_err = db
        .lock_exclusive(shared_first, "wf-2")
        .await
        .expect_err("Exclusive lock should conflict with shared holder");

    //* Then
    assert!(matches!(
        shared_err,
        Error::LockConflict {
            kind: LockKind::Shared,
            ..
        }
    ));
    assert!(matches!(
        exclusive_err,
        Error::LockConflict {
            kind: LockKind::Exclusive,
            ..
        }
    ));

    // Mutual exclusion holds on both datasets
    for dataset in [exclusive_first, shared_first] {
        let state = db
            .lock_state(dataset)
            .await
            .expect("Failed to read lock state");
        assert!(
            state.exclusive.is_none() || state.shared.is_empty(),
            "exclusive and shared holders must never coexist"
        );
    }
}

#[tokio::test]
async fn unlock_exclusive_is_a_safe_no_op_for_non_holders() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let dataset = unlocked_dataset(&db, "unlock-noop").await;

    db.lock_exclusive(dataset, "wf-1")
        .await
        .expect("Exclusive lock should succeed");

    //* When
    let stale_unlock = db
        .unlock_exclusive(dataset, "wf-stale")
        .await
        .expect("Unlock by non-holder should not error");
    let holder_unlock = db
        .unlock_exclusive(dataset, "wf-1")
        .await
        .expect("Unlock by holder should succeed");
    let repeated_unlock = db
        .unlock_exclusive(dataset, "wf-1")
        .await
        .expect("Repeated unlock should not error");

    //* Then
    assert!(!stale_unlock, "non-holder unlock reports no change");
    assert!(holder_unlock, "holder unlock reports a change");
    assert!(!repeated_unlock, "repeated unlock reports no change");
}

#[tokio::test]
async fn unlock_shared_is_a_safe_no_op_for_non_holders() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let dataset = unlocked_dataset(&db, "shared-unlock-noop").await;

    db.lock_shared(dataset, "wf-1")
        .await
        .expect("Shared lock should succeed");

    //* When
    let stale_unlock = db
        .unlock_shared(dataset, "wf-stale")
        .await
        .expect("Unlock by non-holder should not error");
    let holder_unlock = db
        .unlock_shared(dataset, "wf-1")
        .await
        .expect("Unlock by holder should succeed");

    //* Then
    assert!(!stale_unlock);
    assert!(holder_unlock);

    let state = db
        .lock_state(dataset)
        .await
        .expect("Failed to read lock state");
    assert!(state.is_unlocked());
}

#[tokio::test]
async fn lock_operations_on_missing_dataset_raise_not_found() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");

    let unknown = DatasetId::from(Uuid::new_v4());

    //* When
    let exclusive_err = db
        .lock_exclusive(unknown, "wf-1")
        .await
        .expect_err("Exclusive lock on missing dataset should fail");
    let shared_err = db
        .lock_shared(unknown, "wf-1")
        .await
        .expect_err("Shared lock on missing dataset should fail");

    //* Then
    // Not-found, not a lock conflict - and fatal, never retried
    assert!(matches!(exclusive_err, Error::DatasetNotFound(id) if id == unknown));
    assert!(matches!(shared_err, Error::DatasetNotFound(id) if id == unknown));
    assert!(exclusive_err.is_fatal());
    assert!(shared_err.is_fatal());
}

#[tokio::test]
async fn shared_lock_becomes_available_after_exclusive_release() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let dataset = unlocked_dataset(&db, "handoff").await;

    db.lock_exclusive(dataset, "wf-1")
        .await
        .expect("Exclusive lock should succeed");

    //* When
    db.lock_shared(dataset, "wf-2")
        .await
        .expect_err("Shared lock should conflict while exclusive is held");
    db.unlock_exclusive(dataset, "wf-1")
        .await
        .expect("Unlock should succeed");
    db.lock_shared(dataset, "wf-2")
        .await
        .expect("Shared lock should succeed after release");

    //* Then
    let state = db
        .lock_state(dataset)
        .await
        .expect("Failed to read lock state");
    assert!(state.exclusive.is_none());
    assert_eq!(state.shared.len(), 1);
    assert_eq!(state.shared[0].as_str(), "wf-2");
}
