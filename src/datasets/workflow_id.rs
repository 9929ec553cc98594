//! Workflow instance ID new-type wrapper for database values
//!
//! This module provides a [`WorkflowId`] new-type wrapper around [`Cow<str>`]
//! for the caller-supplied workflow instance identifier that keys all lock
//! state. The workflow engine guarantees the identifier is stable across
//! retries of the same logical step; the lock operations rely on that to be
//! idempotent under re-execution.
//!
//! ## Validation Strategy
//!
//! The only invariant is that the identifier is non-empty. It is enforced
//! when parsing via [`FromStr`](std::str::FromStr); conversions from `&str`
//! and `String` trust the caller, following the principle of "validate at
//! boundaries, trust database data."

use std::borrow::Cow;

/// An owned workflow instance ID for database return values and owned
/// storage scenarios.
///
/// This is a type alias for `WorkflowId<'static>`, intended for use as a
/// return type from database queries or in any context where the identifier
/// must own its storage.
pub type WorkflowIdOwned = WorkflowId<'static>;

/// A workflow instance ID wrapper for database values.
///
/// This new-type wrapper around `Cow<str>` supports both borrowed and owned
/// strings through copy-on-write semantics, so lock operations can pass
/// borrowed identifiers without allocating.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkflowId<'a>(Cow<'a, str>);

impl<'a> WorkflowId<'a> {
    /// Create a new WorkflowId wrapper from a reference to str (borrowed)
    ///
    /// Does not validate; the caller must supply a non-empty identifier.
    pub fn from_ref_unchecked(id: &'a str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// Create a new WorkflowId wrapper from an owned String
    ///
    /// Does not validate; the caller must supply a non-empty identifier.
    pub fn from_owned_unchecked(id: String) -> WorkflowIdOwned {
        WorkflowId(Cow::Owned(id))
    }

    /// Consume and return the inner String (owned)
    pub fn into_inner(self) -> String {
        match self {
            WorkflowId(Cow::Owned(id)) => id,
            WorkflowId(Cow::Borrowed(id)) => id.to_owned(),
        }
    }

    /// Get an owned version of this WorkflowId
    pub fn to_owned(&self) -> WorkflowIdOwned {
        WorkflowId(Cow::Owned(self.0.to_string()))
    }

    /// Get a reference to the inner str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for WorkflowId<'a> {
    fn from(id: &'a str) -> Self {
        Self::from_ref_unchecked(id)
    }
}

impl From<String> for WorkflowIdOwned {
    fn from(id: String) -> Self {
        WorkflowId::from_owned_unchecked(id)
    }
}

impl<'a> std::ops::Deref for WorkflowId<'a> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> AsRef<str> for WorkflowId<'a> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'a> PartialEq<&str> for WorkflowId<'a> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<'a> PartialEq<WorkflowId<'a>> for &str {
    fn eq(&self, other: &WorkflowId<'a>) -> bool {
        *self == other.as_str()
    }
}

impl std::str::FromStr for WorkflowId<'static> {
    type Err = WorkflowIdFromStrError;

    /// Parses a string as a [`WorkflowId`], rejecting empty input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(WorkflowIdFromStrError::Empty);
        }
        Ok(WorkflowId::from_owned_unchecked(s.to_owned()))
    }
}

impl<'a> std::fmt::Display for WorkflowId<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<'a> std::fmt::Debug for WorkflowId<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl serde::Serialize for WorkflowId<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for WorkflowIdOwned {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        Ok(WorkflowId::from_owned_unchecked(s))
    }
}

impl sqlx::Type<sqlx::Postgres> for WorkflowId<'_> {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::postgres::PgHasArrayType for WorkflowId<'_> {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

impl<'a> sqlx::Encode<'_, sqlx::Postgres> for WorkflowId<'a> {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'_>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<'_, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for WorkflowIdOwned {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(WorkflowId::from_owned_unchecked(s))
    }
}

/// Errors that can occur when parsing a string as a [`WorkflowId`].
#[derive(Debug, thiserror::Error)]
pub enum WorkflowIdFromStrError {
    /// The provided identifier is empty.
    #[error("Workflow instance id must not be empty")]
    Empty,
}
