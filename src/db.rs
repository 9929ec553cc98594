//! Internal database connection primitives
//!
//! The module is private to the crate - only selected types are re-exported
//! publicly through lib.rs.

use sqlx::Postgres;

mod conn;

pub use conn::ConnError;
pub(crate) use conn::ConnPool;

/// Begins a transaction pinned to SERIALIZABLE isolation.
///
/// Every lock and link mutation runs inside one of these. The isolation
/// level, not any in-process synchronization, is what rejects conflicting
/// concurrent writers: a losing transaction surfaces a serialization failure
/// (PostgreSQL `40001`), which callers observe as a retryable error.
pub(crate) async fn begin_serializable(
    pool: &ConnPool,
) -> Result<sqlx::Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}
