//! Error types for catalog database operations

use crate::{
    datasets::{DatasetId, LockKind},
    db::ConnError,
    faults::{Fault, FaultPoint},
    links::ResourceId,
};

/// Errors that can occur when interacting with the catalog database.
///
/// The crate classifies but never retries: a retryable error (see
/// [`Error::is_retryable`]) is expected to be re-driven by the calling
/// workflow engine with the same workflow instance id, relying on the
/// idempotence of the lock and link operations. Everything else aborts the
/// workflow instance and triggers compensation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to establish the initial database connection.
    #[error("Error connecting to catalog db: {0}")]
    ConnectionError(sqlx::Error),

    /// An error occurred while running migrations.
    #[error("Error running migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    /// An error surfaced by the database while executing a query.
    #[error("Error executing database query: {0}")]
    DbError(#[from] sqlx::Error),

    /// A lock operation referenced a dataset that does not exist.
    ///
    /// Fatal: retrying cannot make the dataset appear.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(DatasetId),

    /// Dataset creation collided with an existing dataset name.
    #[error("Dataset name already exists: {0}")]
    DatasetNameExists(String),

    /// The lock precondition was not met because a conflicting holder is
    /// present.
    ///
    /// The crate does not retry this itself; the backoff/retry policy
    /// belongs to the workflow engine driving the calling step.
    #[error("Failed to take {kind} lock on dataset {dataset}: conflicting holder present")]
    LockConflict {
        /// Dataset the lock was requested on.
        dataset: DatasetId,
        /// Which lock flavor was requested.
        kind: LockKind,
    },

    /// An invariant the crate assumes was violated.
    ///
    /// Treated as a data-integrity defect, never as a transient condition.
    #[error("Corrupt catalog state: {0}")]
    CorruptState(String),

    /// A resource link row vanished between losing a first-use insert race
    /// and retrying the operation as an increment.
    #[error("Resource link for dataset {dataset} and resource {resource} vanished during duplicate-key recovery")]
    LinkVanished {
        /// Dataset side of the link.
        dataset: DatasetId,
        /// Resource side of the link.
        resource: ResourceId,
    },

    /// A synthetic error raised by the fault injector instead of touching
    /// the store. Test environments only.
    #[error("Injected {fault} fault at {point}")]
    FaultInjected {
        /// Operation category the fault was armed for.
        point: FaultPoint,
        /// Severity the fault was armed with.
        fault: Fault,
    },
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// The following errors are considered connection issues:
    /// - `Error::ConnectionError`: the initial connection to the database failed.
    /// - `sqlx::Error::Io`: an I/O error, often a network issue or a closed socket.
    /// - `sqlx::Error::Tls`: an error during the TLS handshake.
    /// - `sqlx::Error::PoolTimedOut`: the pool timed out waiting for a free connection.
    /// - `sqlx::Error::PoolClosed`: the pool was closed while an operation was pending.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::ConnectionError(_) => true,
            Error::DbError(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error is retryable by the calling workflow engine.
    ///
    /// The following are considered retryable:
    /// - **Connection errors**: network issues, pool timeouts, TLS errors
    ///   (checked via [`Error::is_connection_error`]).
    /// - **Serialization failures** (PostgreSQL error code `40001`): two
    ///   SERIALIZABLE transactions conflicted and the loser was aborted.
    /// - **Deadlock detected** (PostgreSQL error code `40P01`): one of the
    ///   waiting transactions was aborted and should be retried.
    /// - [`Error::LockConflict`]: another workflow instance holds the lock.
    ///   The conflict clears once that holder releases, so the engine should
    ///   re-drive the step after backoff.
    /// - [`Error::FaultInjected`] with [`Fault::Retryable`].
    ///
    /// Everything else is fatal: the engine should abort the workflow
    /// instance and run compensation.
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_error() {
            return true;
        }

        match self {
            Error::LockConflict { .. } => true,
            Error::FaultInjected {
                fault: Fault::Retryable,
                ..
            } => true,
            Error::DbError(sqlx::Error::Database(err)) => err.code().is_some_and(|code| {
                matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01" // deadlock_detected
                )
            }),
            _ => false,
        }
    }

    /// Returns `true` if the error should abort the calling workflow instance.
    ///
    /// This is the complement of [`Error::is_retryable`].
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::ConnectionError(err) => Error::ConnectionError(err),
            ConnError::MigrationFailed(err) => Error::MigrationError(err),
        }
    }
}
