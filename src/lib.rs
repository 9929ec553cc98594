//! Concurrency-control core of the dataset catalog.
//!
//! Many long-running, independently failing workflow instances concurrently
//! create, ingest into, and delete datasets backed by cloud storage. This
//! crate owns the two pieces of shared mutable state that make that safe,
//! with the relational store's SERIALIZABLE transactions as the only
//! concurrency primitive:
//!
//! - **Dataset locks** - one exclusive-lock slot and one shared-lock set per
//!   dataset, keyed by a caller-supplied workflow instance id. Structural
//!   operations take the exclusive lock; data operations take shared locks.
//! - **Resource links** - a reference count per `(dataset, resource)` pair,
//!   deciding when a shared cloud resource is still in use by in-flight
//!   ingests.
//!
//! Every operation is a single bounded transaction: it succeeds, reports a
//! conflict, or fails - nothing blocks waiting for a lock to free. The crate
//! classifies errors as retryable or fatal (see [`Error::is_retryable`]) but
//! never retries; retry scheduling belongs to the workflow engine driving
//! the calling steps, which re-invokes a step with the same workflow
//! instance id. Lock acquisition and release are idempotent under such
//! re-invocation.

use std::sync::Arc;

use tracing::instrument;

mod config;
mod datasets;
mod db;
mod error;
mod faults;
mod links;
#[cfg(feature = "temp-db")]
pub mod temp;

use self::db::ConnPool;
#[cfg(feature = "temp-db")]
pub use self::temp::{KEEP_TEMP_DIRS, temp_catalog_db};
pub use self::{
    config::PoolConfig,
    datasets::{
        Dataset, DatasetId, LockKind, LockState, WorkflowId, WorkflowIdFromStrError,
        WorkflowIdOwned,
    },
    db::ConnError,
    error::Error,
    faults::{Fault, FaultInjector, FaultPoint},
    links::ResourceId,
};

/// Default pool size for the catalog DB.
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Connection pool to the catalog DB. Clones will refer to the same instance.
#[derive(Clone, Debug)]
pub struct CatalogDb {
    pool: ConnPool,
    url: Arc<str>,
    faults: FaultInjector,
}

impl CatalogDb {
    /// Sets up a connection pool to the catalog DB
    ///
    /// Runs migrations if necessary.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, Error> {
        Self::connect_with_config(url, &PoolConfig::with_size(pool_size), true).await
    }

    /// Sets up a connection pool to the catalog DB with explicit pool
    /// configuration and migration behavior
    ///
    /// Runs migrations only if `auto_migrate` is true.
    #[instrument(skip_all, err)]
    pub async fn connect_with_config(
        url: &str,
        config: &PoolConfig,
        auto_migrate: bool,
    ) -> Result<Self, Error> {
        let pool = ConnPool::connect(url, config).await?;
        if auto_migrate {
            pool.run_migrations().await?;
        }
        Ok(Self {
            pool,
            url: url.into(),
            faults: FaultInjector::new(),
        })
    }

    /// Sets up a connection pool to the catalog DB with retry logic for
    /// temporary databases.
    #[cfg(any(test, feature = "temp-db"))]
    #[instrument(skip_all, err)]
    pub async fn connect_with_retry(url: &str, pool_size: u32) -> Result<Self, Error> {
        use std::time::Duration;

        use backon::{ExponentialBuilder, Retryable};

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_max_times(20);

        fn is_db_starting_up(err: &ConnError) -> bool {
            matches!(
                err,
                ConnError::ConnectionError(sqlx::Error::Database(db_err))
                if db_err.code().is_some_and(|code| code == "57P03")
            )
        }

        fn notify_retry(err: &ConnError, dur: Duration) {
            tracing::warn!(
                error = %err,
                "Database still starting up during connection. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        }

        let config = PoolConfig::with_size(pool_size);
        let pool = (|| ConnPool::connect(url, &config))
            .retry(retry_policy)
            .when(is_db_starting_up)
            .notify(notify_retry)
            .await?;

        pool.run_migrations().await?;

        Ok(Self {
            pool,
            url: url.into(),
            faults: FaultInjector::new(),
        })
    }

    /// Replaces the fault injector consulted by mutating operations.
    ///
    /// Test environments only; the default injector has nothing armed.
    pub fn with_fault_injector(self, faults: FaultInjector) -> Self {
        Self {
            pool: self.pool,
            url: self.url,
            faults,
        }
    }

    /// Returns the fault injector consulted by mutating operations.
    ///
    /// Arming a point here affects every clone of this handle.
    pub fn fault_injector(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the URL this handle was connected with.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn default_pool_size() -> u32 {
        DEFAULT_POOL_SIZE
    }
}

/// Dataset lifecycle API
impl CatalogDb {
    /// Creates a dataset row that is already exclusively locked by `workflow`.
    ///
    /// The correct call order for a create workflow is: `create_dataset`,
    /// then `unlock_exclusive` once the remaining create steps finish -
    /// mirroring how a delete workflow takes the lock before removing the
    /// row. Returns the database-generated dataset id.
    ///
    /// # Errors
    ///
    /// [`Error::DatasetNameExists`] (fatal) if a dataset with this name
    /// already exists.
    #[instrument(skip(self), err)]
    pub async fn create_dataset(
        &self,
        name: &str,
        description: Option<&str>,
        workflow: impl Into<WorkflowId<'_>> + std::fmt::Debug,
    ) -> Result<DatasetId, Error> {
        let workflow = workflow.into();
        let mut tx = db::begin_serializable(&self.pool).await?;
        let id = match datasets::sql::insert_locked(&mut *tx, name, description, &workflow).await {
            Ok(id) => id,
            Err(err) if is_unique_violation(&err) => {
                return Err(Error::DatasetNameExists(name.to_owned()));
            }
            Err(err) => return Err(err.into()),
        };
        tx.commit().await?;
        Ok(id)
    }

    /// Returns a dataset summary regardless of lock state.
    ///
    /// Most internal code paths retrieving a dataset should use this.
    pub async fn get_dataset(&self, dataset: DatasetId) -> Result<Option<Dataset>, Error> {
        Ok(datasets::sql::get_by_id(&*self.pool, dataset).await?)
    }

    /// Returns a dataset summary only if it is not exclusively locked.
    ///
    /// Intended for user-facing reads: a dataset under structural mutation
    /// is reported as absent until the mutating workflow releases its lock.
    pub async fn get_available_dataset(
        &self,
        dataset: DatasetId,
    ) -> Result<Option<Dataset>, Error> {
        Ok(datasets::sql::get_available_by_id(&*self.pool, dataset).await?)
    }

    /// Deletes a dataset row unconditionally.
    ///
    /// Administrative use; workflows should prefer
    /// [`delete_dataset_if_locked`](Self::delete_dataset_if_locked).
    /// Returns `true` if a row was deleted.
    #[instrument(skip(self), err)]
    pub async fn delete_dataset(&self, dataset: DatasetId) -> Result<bool, Error> {
        let rows_deleted = datasets::sql::delete_by_id(&*self.pool, dataset).await?;
        Ok(rows_deleted > 0)
    }

    /// Deletes a dataset row only if `workflow` holds its exclusive lock.
    ///
    /// The final step of a delete workflow: holding the lock guarantees no
    /// data operation is in flight when the row disappears. Returns `true`
    /// if a row was deleted; `false` means the dataset is missing or locked
    /// by someone else, and the caller decides whether that is a bug.
    #[instrument(skip(self), err)]
    pub async fn delete_dataset_if_locked(
        &self,
        dataset: DatasetId,
        workflow: impl Into<WorkflowId<'_>> + std::fmt::Debug,
    ) -> Result<bool, Error> {
        let workflow = workflow.into();
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_deleted =
            datasets::sql::delete_by_id_if_holder(&mut *tx, dataset, &workflow).await?;
        tx.commit().await?;
        tracing::debug!(rows_deleted, "conditional dataset delete");
        Ok(rows_deleted > 0)
    }

    /// Returns the lock state of a dataset.
    ///
    /// # Errors
    ///
    /// [`Error::DatasetNotFound`] if the dataset row is missing;
    /// [`Error::CorruptState`] if the shared holder column is unexpectedly
    /// NULL (it is declared NOT NULL, so this indicates corruption).
    pub async fn lock_state(&self, dataset: DatasetId) -> Result<LockState, Error> {
        match datasets::sql::get_lock_state(&*self.pool, dataset).await? {
            None => Err(Error::DatasetNotFound(dataset)),
            Some((exclusive, Some(shared))) => Ok(LockState { exclusive, shared }),
            Some((_, None)) => Err(Error::CorruptState(format!(
                "shared holder set missing for dataset {dataset}"
            ))),
        }
    }
}

/// Dataset lock API
impl CatalogDb {
    /// Takes the exclusive lock on a dataset for `workflow`.
    ///
    /// Succeeds when `workflow` already holds the lock (idempotent under
    /// step retries), or when no exclusive holder and no shared holders
    /// exist. The precondition is part of the atomic update statement; the
    /// database's SERIALIZABLE isolation, not this crate, arbitrates racing
    /// acquisitions.
    ///
    /// # Errors
    ///
    /// [`Error::DatasetNotFound`] (fatal) if the dataset does not exist;
    /// [`Error::LockConflict`] (retryable by the engine) if another workflow
    /// holds any lock on the dataset.
    #[instrument(skip(self), err)]
    pub async fn lock_exclusive(
        &self,
        dataset: DatasetId,
        workflow: impl Into<WorkflowId<'_>> + std::fmt::Debug,
    ) -> Result<(), Error> {
        self.faults.check(FaultPoint::LockExclusive)?;
        let workflow = workflow.into();
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_updated = datasets::sql::lock_exclusive(&mut *tx, dataset, &workflow).await?;
        tracing::debug!(rows_updated, "exclusive lock attempt");
        if rows_updated == 0 {
            // Zero rows updated means either the dataset is missing or a
            // conflicting holder is present; look again to tell them apart.
            let exists = datasets::sql::exists(&mut *tx, dataset).await?;
            tx.rollback().await?;
            return Err(if exists {
                Error::LockConflict {
                    dataset,
                    kind: LockKind::Exclusive,
                }
            } else {
                Error::DatasetNotFound(dataset)
            });
        }
        tx.commit().await?;
        Ok(())
    }

    /// Releases the exclusive lock on a dataset if `workflow` holds it.
    ///
    /// Returns whether a row changed. A `false` return is not an error:
    /// repeated unlocks and unlocks by a stale workflow are safe, and the
    /// caller decides whether an unexpected no-op is worth flagging.
    #[instrument(skip(self), err)]
    pub async fn unlock_exclusive(
        &self,
        dataset: DatasetId,
        workflow: impl Into<WorkflowId<'_>> + std::fmt::Debug,
    ) -> Result<bool, Error> {
        self.faults.check(FaultPoint::UnlockExclusive)?;
        let workflow = workflow.into();
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_updated = datasets::sql::unlock_exclusive(&mut *tx, dataset, &workflow).await?;
        tx.commit().await?;
        tracing::debug!(rows_updated, "exclusive unlock");
        Ok(rows_updated == 1)
    }

    /// Adds `workflow` to a dataset's shared lock set.
    ///
    /// Many shared holders may coexist; only an exclusive holder forbids
    /// acquisition. Adding a workflow that already holds a shared lock is a
    /// successful no-op (set semantics), which makes the operation
    /// idempotent under step retries.
    ///
    /// # Errors
    ///
    /// [`Error::DatasetNotFound`] (fatal) if the dataset does not exist;
    /// [`Error::LockConflict`] (retryable by the engine) if an exclusive
    /// holder is present.
    #[instrument(skip(self), err)]
    pub async fn lock_shared(
        &self,
        dataset: DatasetId,
        workflow: impl Into<WorkflowId<'_>> + std::fmt::Debug,
    ) -> Result<(), Error> {
        self.faults.check(FaultPoint::LockShared)?;
        let workflow = workflow.into();
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_updated = datasets::sql::lock_shared(&mut *tx, dataset, &workflow).await?;
        tracing::debug!(rows_updated, "shared lock attempt");
        if rows_updated == 0 {
            let exists = datasets::sql::exists(&mut *tx, dataset).await?;
            tx.rollback().await?;
            return Err(if exists {
                Error::LockConflict {
                    dataset,
                    kind: LockKind::Shared,
                }
            } else {
                Error::DatasetNotFound(dataset)
            });
        }
        tx.commit().await?;
        Ok(())
    }

    /// Removes `workflow` from a dataset's shared lock set if present.
    ///
    /// Returns whether a row changed; no-op-safe like
    /// [`unlock_exclusive`](Self::unlock_exclusive).
    #[instrument(skip(self), err)]
    pub async fn unlock_shared(
        &self,
        dataset: DatasetId,
        workflow: impl Into<WorkflowId<'_>> + std::fmt::Debug,
    ) -> Result<bool, Error> {
        self.faults.check(FaultPoint::UnlockShared)?;
        let workflow = workflow.into();
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_updated = datasets::sql::unlock_shared(&mut *tx, dataset, &workflow).await?;
        tx.commit().await?;
        tracing::debug!(rows_updated, "shared unlock");
        Ok(rows_updated == 1)
    }
}

/// Resource link API
impl CatalogDb {
    /// Returns whether a link row exists, regardless of its count.
    ///
    /// Note that a zero-count row exists in this sense; use
    /// [`link_ref_count`](Self::link_ref_count) to tell whether the
    /// resource is actually in use.
    pub async fn link_exists(
        &self,
        dataset: DatasetId,
        resource: ResourceId,
    ) -> Result<bool, Error> {
        Ok(links::sql::exists(&*self.pool, dataset, resource).await?)
    }

    /// Returns a link's current reference count.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptState`] (fatal) if no link row exists - callers only
    /// ask for counts on links they believe exist, so an absent row is a
    /// data-integrity violation, not an empty result.
    pub async fn link_ref_count(
        &self,
        dataset: DatasetId,
        resource: ResourceId,
    ) -> Result<i64, Error> {
        match links::sql::ref_count(&*self.pool, dataset, resource).await? {
            Some(count) => Ok(count),
            None => Err(Error::CorruptState(format!(
                "no resource link row for dataset {dataset} and resource {resource}"
            ))),
        }
    }

    /// Records a use of `resource` by `dataset`.
    ///
    /// Increments the existing link's count by 1, or inserts a new link with
    /// `initial_refs`. Callers pass `initial_refs = 1` when the creating use
    /// is itself chargeable (an ingest), or `0` when the association is
    /// created outside the ingest path and the first charge comes later.
    ///
    /// If the insert loses a first-use race against another workflow, the
    /// operation retries once as an increment in a fresh transaction, so the
    /// duplicate-key error never reaches the caller. A serialization failure
    /// instead surfaces as a retryable error and the winning row is observed
    /// on the engine's retry.
    #[instrument(skip(self), err)]
    pub async fn create_or_increment_link(
        &self,
        dataset: DatasetId,
        resource: ResourceId,
        initial_refs: i64,
    ) -> Result<(), Error> {
        self.faults.check(FaultPoint::CreateLink)?;
        let mut tx = db::begin_serializable(&self.pool).await?;
        if links::sql::exists(&mut *tx, dataset, resource).await? {
            links::sql::increment(&mut *tx, dataset, resource).await?;
            tx.commit().await?;
            return Ok(());
        }
        match links::sql::insert(&mut *tx, dataset, resource, initial_refs).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost a first-use race: another workflow inserted the link
                // between our existence check and insert. The failed insert
                // aborted the transaction, so retry as an increment in a
                // fresh one.
                tracing::debug!(%dataset, %resource, "link insert lost first-use race");
                tx.rollback().await?;
                let mut tx = db::begin_serializable(&self.pool).await?;
                let rows_updated = links::sql::increment(&mut *tx, dataset, resource).await?;
                if rows_updated == 0 {
                    tx.rollback().await?;
                    return Err(Error::LinkVanished { dataset, resource });
                }
                tx.commit().await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Increments an existing link's reference count by 1.
    ///
    /// Returns whether a row changed.
    #[instrument(skip(self), err)]
    pub async fn increment_link(
        &self,
        dataset: DatasetId,
        resource: ResourceId,
    ) -> Result<bool, Error> {
        self.faults.check(FaultPoint::IncrementLink)?;
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_updated = links::sql::increment(&mut *tx, dataset, resource).await?;
        tx.commit().await?;
        Ok(rows_updated == 1)
    }

    /// Decrements an existing link's reference count by 1.
    ///
    /// The compensating action for a failed or undone use. Returns whether a
    /// row changed; a `false` return is not an error. The count is not
    /// guarded against going below zero - pairing one decrement with each
    /// successful use is the caller's responsibility.
    #[instrument(skip(self), err)]
    pub async fn decrement_link(
        &self,
        dataset: DatasetId,
        resource: ResourceId,
    ) -> Result<bool, Error> {
        self.faults.check(FaultPoint::DecrementLink)?;
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_updated = links::sql::decrement(&mut *tx, dataset, resource).await?;
        tx.commit().await?;
        Ok(rows_updated == 1)
    }

    /// Removes a link row outright.
    ///
    /// Administrative cleanup only - the ingest/undo path never deletes, it
    /// decrements. Cleanup logic reads a zero count out of band before
    /// calling this. Returns whether a row was deleted.
    #[instrument(skip(self), err)]
    pub async fn delete_link(
        &self,
        dataset: DatasetId,
        resource: ResourceId,
    ) -> Result<bool, Error> {
        self.faults.check(FaultPoint::DeleteLink)?;
        let mut tx = db::begin_serializable(&self.pool).await?;
        let rows_deleted = links::sql::delete(&mut *tx, dataset, resource).await?;
        tx.commit().await?;
        Ok(rows_deleted > 0)
    }

    /// Returns all resource ids linked to a dataset, oldest link first.
    ///
    /// Used by cleanup logic to find candidate resources to release.
    pub async fn linked_resources(&self, dataset: DatasetId) -> Result<Vec<ResourceId>, Error> {
        Ok(links::sql::resource_ids_for_dataset(&*self.pool, dataset).await?)
    }
}

/// Returns whether a database error is a unique-constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
