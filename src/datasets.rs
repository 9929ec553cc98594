//! Dataset rows and the dataset lock coordinator
//!
//! One row per dataset carries both the summary metadata and the lock state
//! that serializes structural operations (create, delete, schema change)
//! against concurrent data operations (ingest, file operations):
//!
//! - `lock_holder` is the single workflow instance allowed to perform
//!   structural mutation, or NULL.
//! - `shared_holders` is the set of workflow instances currently performing
//!   data operations.
//!
//! The two are mutually exclusive at every committed state. Acquisition
//! preconditions live inside the atomic `UPDATE` statements in the `sql`
//! submodule, executed under SERIALIZABLE isolation, so correctness holds
//! across worker processes without any in-memory locking.

use sqlx::types::chrono::{DateTime, Utc};

mod dataset_id;
mod workflow_id;

pub(crate) mod sql;

pub use self::{
    dataset_id::DatasetId,
    workflow_id::{WorkflowId, WorkflowIdFromStrError, WorkflowIdOwned},
};

/// Summary of a dataset row.
///
/// Lock state is intentionally not part of the summary; use
/// [`CatalogDb::lock_state`](crate::CatalogDb::lock_state) to observe it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Dataset {
    /// Unique identifier for the dataset (database-generated)
    pub id: DatasetId,

    /// Unique human-readable name
    pub name: String,

    /// Optional free-form description
    pub description: Option<String>,

    /// Creation timestamp (UTC)
    pub created_at: DateTime<Utc>,
}

/// Which flavor of dataset lock an operation asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// Single-holder lock taken for structural mutation.
    Exclusive,
    /// Multi-holder lock taken for data operations.
    Shared,
}

impl LockKind {
    /// Convert the [`LockKind`] to a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a dataset's lock state at some committed point.
///
/// Either `exclusive` is `None` or `shared` is empty; the update statements
/// maintain this invariant, a snapshot merely observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    /// Workflow instance holding the exclusive lock, if any
    pub exclusive: Option<WorkflowIdOwned>,

    /// Workflow instances holding shared locks
    pub shared: Vec<WorkflowIdOwned>,
}

impl LockState {
    /// Returns whether no workflow instance holds any lock.
    pub fn is_unlocked(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}
