//! Internal SQL operations for dataset rows and the dataset lock coordinator
//!
//! Every lock acquisition expresses its precondition inside the `WHERE`
//! clause of a single `UPDATE`, so the database's transaction manager - not
//! this crate - rejects conflicting concurrent writers. Helpers report the
//! number of rows changed and leave classification (not-found vs. conflict)
//! to the caller, which can run an existence check in the same transaction.

use sqlx::{Executor, Postgres};

use super::{Dataset, DatasetId, WorkflowId, WorkflowIdOwned};

/// Insert a dataset row that is already exclusively locked by `workflow`
///
/// The creating workflow releases the lock once the remaining create steps
/// finish. A unique violation on the dataset name bubbles up as a plain
/// `sqlx::Error`; the caller maps it to its own error type.
pub(crate) async fn insert_locked<'c, E>(
    exe: E,
    name: &str,
    description: Option<&str>,
    workflow: &WorkflowId<'_>,
) -> Result<DatasetId, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO datasets (name, description, lock_holder, shared_holders)
        VALUES ($1, $2, $3, '{}')
        RETURNING id
    "#};
    sqlx::query_scalar(query)
        .bind(name)
        .bind(description)
        .bind(workflow)
        .fetch_one(exe)
        .await
}

/// Get a dataset summary by its ID, regardless of lock state
pub(crate) async fn get_by_id<'c, E>(exe: E, id: DatasetId) -> Result<Option<Dataset>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, name, description, created_at
        FROM datasets
        WHERE id = $1
    "#};
    sqlx::query_as(query).bind(id).fetch_optional(exe).await
}

/// Get a dataset summary by its ID, excluding exclusively locked datasets
///
/// Intended for user-facing reads: a dataset under structural mutation is
/// reported as absent until the mutating workflow releases its lock.
pub(crate) async fn get_available_by_id<'c, E>(
    exe: E,
    id: DatasetId,
) -> Result<Option<Dataset>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, name, description, created_at
        FROM datasets
        WHERE id = $1 AND lock_holder IS NULL
    "#};
    sqlx::query_as(query).bind(id).fetch_optional(exe).await
}

/// Check whether a dataset row exists
pub(crate) async fn exists<'c, E>(exe: E, id: DatasetId) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT COUNT(*)
        FROM datasets
        WHERE id = $1
    "#};
    let count: i64 = sqlx::query_scalar(query).bind(id).fetch_one(exe).await?;
    Ok(count > 0)
}

/// Delete a dataset row unconditionally
pub(crate) async fn delete_by_id<'c, E>(exe: E, id: DatasetId) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM datasets WHERE id = $1")
        .bind(id)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Delete a dataset row only if `workflow` holds its exclusive lock
pub(crate) async fn delete_by_id_if_holder<'c, E>(
    exe: E,
    id: DatasetId,
    workflow: &WorkflowId<'_>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM datasets
        WHERE id = $1 AND lock_holder = $2
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(workflow)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Attempt to take the exclusive lock on a dataset for `workflow`
///
/// Succeeds only when no other workflow holds the exclusive lock and no
/// shared holders exist. Re-acquisition by the current holder matches the
/// `lock_holder = $2` arm, which is what makes the operation idempotent
/// under step retries.
pub(crate) async fn lock_exclusive<'c, E>(
    exe: E,
    id: DatasetId,
    workflow: &WorkflowId<'_>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE datasets
        SET lock_holder = $2
        WHERE id = $1
          AND (lock_holder IS NULL OR lock_holder = $2)
          AND CARDINALITY(shared_holders) = 0
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(workflow)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Release the exclusive lock on a dataset if `workflow` holds it
///
/// Zero rows changed is not an error; repeated unlocks and unlocks by a
/// stale workflow are safe.
pub(crate) async fn unlock_exclusive<'c, E>(
    exe: E,
    id: DatasetId,
    workflow: &WorkflowId<'_>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE datasets
        SET lock_holder = NULL
        WHERE id = $1 AND lock_holder = $2
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(workflow)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Attempt to add `workflow` to a dataset's shared lock set
///
/// The appended array is deduplicated (UNNEST + DISTINCT + ARRAY_AGG), so a
/// duplicate add by the same workflow is a no-op that still counts as a
/// successful acquisition. ARRAY_AGG never sees zero rows here because the
/// append guarantees at least one element, so the subselect cannot yield
/// NULL. The guard only forbids an exclusive holder; any number of shared
/// holders may coexist.
pub(crate) async fn lock_shared<'c, E>(
    exe: E,
    id: DatasetId,
    workflow: &WorkflowId<'_>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE datasets
        SET shared_holders = (
            SELECT ARRAY_AGG(DISTINCT holder)
            FROM UNNEST(ARRAY_APPEND(shared_holders, $2)) holder
        )
        WHERE id = $1 AND lock_holder IS NULL
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(workflow)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Remove `workflow` from a dataset's shared lock set if present
///
/// No-op-safe like [`unlock_exclusive`].
pub(crate) async fn unlock_shared<'c, E>(
    exe: E,
    id: DatasetId,
    workflow: &WorkflowId<'_>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE datasets
        SET shared_holders = ARRAY_REMOVE(shared_holders, $2)
        WHERE id = $1 AND $2 = ANY(shared_holders)
    "#};
    let result = sqlx::query(query)
        .bind(id)
        .bind(workflow)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Read a dataset's raw lock columns
///
/// Returns `None` if the dataset row is missing. The shared holder set is
/// reported as `Option` so the caller can treat an unexpectedly NULL column
/// as a data-integrity violation rather than silently defaulting it.
pub(crate) async fn get_lock_state<'c, E>(
    exe: E,
    id: DatasetId,
) -> Result<Option<(Option<WorkflowIdOwned>, Option<Vec<WorkflowIdOwned>>)>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT lock_holder, shared_holders
        FROM datasets
        WHERE id = $1
    "#};
    sqlx::query_as(query).bind(id).fetch_optional(exe).await
}
