//! Fault injection tests
//!
//! Verifies that an armed fault point raises a classified error without
//! touching the store, so calling workflow steps can be tested for correct
//! retry/abort behavior.

use pgtemp::PgTempDB;
use uuid::Uuid;

use crate::{
    CatalogDb, DEFAULT_POOL_SIZE, DatasetId, Error, Fault, FaultInjector, FaultPoint, ResourceId,
};

#[tokio::test]
async fn armed_retryable_fault_short_circuits_the_operation() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");

    let dataset = db
        .create_dataset("faulted", None, "wf-setup")
        .await
        .expect("Failed to create dataset");
    db.unlock_exclusive(dataset, "wf-setup")
        .await
        .expect("Failed to release setup lock");

    db.fault_injector().arm(FaultPoint::LockShared, Fault::Retryable);

    //* When
    let err = db
        .lock_shared(dataset, "wf-ingest")
        .await
        .expect_err("Armed fault point should raise");

    //* Then
    assert!(matches!(
        err,
        Error::FaultInjected {
            point: FaultPoint::LockShared,
            fault: Fault::Retryable,
        }
    ));
    assert!(err.is_retryable());

    // The store was never touched
    let state = db
        .lock_state(dataset)
        .await
        .expect("Failed to read lock state");
    assert!(state.is_unlocked());

    // Disarming restores normal behavior - the engine's retry then succeeds
    db.fault_injector().disarm(FaultPoint::LockShared);
    db.lock_shared(dataset, "wf-ingest")
        .await
        .expect("Shared lock should succeed after disarm");
}

#[tokio::test]
async fn armed_fatal_fault_is_fatal_and_leaves_counts_untouched() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");

    let dataset = DatasetId::from(Uuid::new_v4());
    let resource = ResourceId::from(Uuid::new_v4());
    db.create_or_increment_link(dataset, resource, 1)
        .await
        .expect("Failed to create link");

    db.fault_injector()
        .arm(FaultPoint::DecrementLink, Fault::Fatal);

    //* When
    let err = db
        .decrement_link(dataset, resource)
        .await
        .expect_err("Armed fault point should raise");

    //* Then
    assert!(err.is_fatal());
    let count = db
        .link_ref_count(dataset, resource)
        .await
        .expect("Failed to read ref count");
    assert_eq!(count, 1, "injected fault must not reach the store");
}

#[tokio::test]
async fn injector_is_shared_across_handle_clones() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db");
    let clone = db.clone();

    //* When
    db.fault_injector().arm(FaultPoint::DeleteLink, Fault::Fatal);

    //* Then
    let dataset = DatasetId::from(Uuid::new_v4());
    let resource = ResourceId::from(Uuid::new_v4());
    let err = clone
        .delete_link(dataset, resource)
        .await
        .expect_err("Clone should observe the armed fault");
    assert!(matches!(
        err,
        Error::FaultInjected {
            point: FaultPoint::DeleteLink,
            ..
        }
    ));
}

#[tokio::test]
async fn pre_armed_injector_can_be_attached_at_construction() {
    //* Given
    let temp_db = PgTempDB::new();
    let injector = FaultInjector::from_config([(FaultPoint::LockExclusive, Fault::Retryable)]);

    let db = CatalogDb::connect_with_retry(&temp_db.connection_uri(), DEFAULT_POOL_SIZE)
        .await
        .expect("Failed to connect to catalog db")
        .with_fault_injector(injector);

    let dataset = db
        .create_dataset("pre-armed", None, "wf-setup")
        .await
        .expect("Failed to create dataset");
    db.unlock_exclusive(dataset, "wf-setup")
        .await
        .expect("Failed to release setup lock");

    //* When
    let err = db
        .lock_exclusive(dataset, "wf-1")
        .await
        .expect_err("Pre-armed fault point should raise");

    //* Then
    assert!(matches!(
        err,
        Error::FaultInjected {
            point: FaultPoint::LockExclusive,
            fault: Fault::Retryable,
        }
    ));
}
