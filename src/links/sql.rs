//! Internal SQL operations for dataset-resource links

use sqlx::{Executor, Postgres};

use super::ResourceId;
use crate::datasets::DatasetId;

/// Insert a new link row with the given starting reference count
///
/// A unique violation means another workflow created the link first; the
/// caller recovers by incrementing instead.
pub(crate) async fn insert<'c, E>(
    exe: E,
    dataset: DatasetId,
    resource: ResourceId,
    initial_refs: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO dataset_resources (dataset_id, resource_id, ref_count)
        VALUES ($1, $2, $3)
    "#};
    sqlx::query(query)
        .bind(dataset)
        .bind(resource)
        .bind(initial_refs)
        .execute(exe)
        .await?;
    Ok(())
}

/// Increment an existing link's reference count by 1
pub(crate) async fn increment<'c, E>(
    exe: E,
    dataset: DatasetId,
    resource: ResourceId,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE dataset_resources
        SET ref_count = ref_count + 1
        WHERE dataset_id = $1 AND resource_id = $2
    "#};
    let result = sqlx::query(query)
        .bind(dataset)
        .bind(resource)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Decrement an existing link's reference count by 1
///
/// Not guarded against going below zero; the caller's pairing discipline
/// (one decrement per successful use) is the only guard.
pub(crate) async fn decrement<'c, E>(
    exe: E,
    dataset: DatasetId,
    resource: ResourceId,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE dataset_resources
        SET ref_count = ref_count - 1
        WHERE dataset_id = $1 AND resource_id = $2
    "#};
    let result = sqlx::query(query)
        .bind(dataset)
        .bind(resource)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Check whether a link row exists, regardless of its count
pub(crate) async fn exists<'c, E>(
    exe: E,
    dataset: DatasetId,
    resource: ResourceId,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT COUNT(*)
        FROM dataset_resources
        WHERE dataset_id = $1 AND resource_id = $2
    "#};
    let count: i64 = sqlx::query_scalar(query)
        .bind(dataset)
        .bind(resource)
        .fetch_one(exe)
        .await?;
    Ok(count > 0)
}

/// Read a link's current reference count
///
/// Returns `None` if the row is absent; the caller decides whether that is
/// a data-integrity violation.
pub(crate) async fn ref_count<'c, E>(
    exe: E,
    dataset: DatasetId,
    resource: ResourceId,
) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT ref_count
        FROM dataset_resources
        WHERE dataset_id = $1 AND resource_id = $2
    "#};
    sqlx::query_scalar(query)
        .bind(dataset)
        .bind(resource)
        .fetch_optional(exe)
        .await
}

/// Remove a link row outright
///
/// Administrative cleanup only; the ingest/undo path never deletes.
pub(crate) async fn delete<'c, E>(
    exe: E,
    dataset: DatasetId,
    resource: ResourceId,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM dataset_resources
        WHERE dataset_id = $1 AND resource_id = $2
    "#};
    let result = sqlx::query(query)
        .bind(dataset)
        .bind(resource)
        .execute(exe)
        .await?;
    Ok(result.rows_affected())
}

/// Get all resource ids linked to a dataset
pub(crate) async fn resource_ids_for_dataset<'c, E>(
    exe: E,
    dataset: DatasetId,
) -> Result<Vec<ResourceId>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT resource_id
        FROM dataset_resources
        WHERE dataset_id = $1
        ORDER BY created_at ASC
    "#};
    sqlx::query_scalar(query).bind(dataset).fetch_all(exe).await
}
