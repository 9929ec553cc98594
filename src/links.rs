//! Dataset-resource links with use-reference counts
//!
//! Expensive cloud resources (buckets, storage accounts) are shared across
//! datasets and across concurrently executing workflow instances. The
//! `ref_count` column on each `(dataset, resource)` link is a concurrency
//! control device, not bookkeeping: the only values that matter are 0 and
//! greater than 0. A row with a count of 0 is equivalent to no row at all -
//! no ingest in that dataset is using the resource - while a positive count
//! means the resource is in use and must not be released.
//!
//! An ingest step either creates the link with a count of 1 or increments
//! it; the step's undo always decrements. Parallel ingests therefore never
//! wait on one another the way they would if the link carried a lock.
//! Reaching zero does not remove the row - only the explicit administrative
//! delete does - which trades a few harmless zero-count rows for not having
//! to order deletes against concurrent creates.

mod resource_id;

pub(crate) mod sql;

pub use self::resource_id::ResourceId;

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_counts;
}
