//! Dataset ID new-type wrapper for database values

use uuid::Uuid;

/// A type-safe identifier for dataset rows.
///
/// Dataset ids are generated by the database on insert and are stable for
/// the lifetime of the dataset. The wrapper is transparent to `sqlx` and
/// `serde`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Get a reference to the inner [`Uuid`]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DatasetId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<DatasetId> for Uuid {
    fn from(id: DatasetId) -> Self {
        id.0
    }
}

impl std::str::FromStr for DatasetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Uuid>().map(Self)
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
