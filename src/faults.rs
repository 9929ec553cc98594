//! Configuration-driven fault injection for resilience testing
//!
//! Workflow steps are expected to retry on retryable errors and abort with
//! compensation on fatal ones. The [`FaultInjector`] lets tests force either
//! outcome at a chosen operation without needing to provoke a real store
//! failure: every mutating operation consults the injector before touching
//! the database, and an armed fault point raises [`Error::FaultInjected`]
//! instead.
//!
//! The injector is disabled by default and intended for test environments
//! only.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::error::Error;

/// Operation categories a fault can be armed for.
///
/// One variant per mutating operation of the lock coordinator and the
/// resource link counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPoint {
    /// `lock_exclusive`
    LockExclusive,
    /// `unlock_exclusive`
    UnlockExclusive,
    /// `lock_shared`
    LockShared,
    /// `unlock_shared`
    UnlockShared,
    /// `create_or_increment_link`
    CreateLink,
    /// `increment_link`
    IncrementLink,
    /// `decrement_link`
    DecrementLink,
    /// `delete_link`
    DeleteLink,
}

impl FaultPoint {
    /// Convert the [`FaultPoint`] to a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockExclusive => "lock_exclusive",
            Self::UnlockExclusive => "unlock_exclusive",
            Self::LockShared => "lock_shared",
            Self::UnlockShared => "unlock_shared",
            Self::CreateLink => "create_link",
            Self::IncrementLink => "increment_link",
            Self::DecrementLink => "decrement_link",
            Self::DeleteLink => "delete_link",
        }
    }
}

impl std::fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Surfaces as a retryable error; the calling engine should re-drive
    /// the step.
    Retryable,
    /// Surfaces as a fatal error; the calling engine should abort and
    /// compensate.
    Fatal,
}

impl Fault {
    /// Convert the [`Fault`] to a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared registry of armed faults. Clones refer to the same instance.
///
/// An armed fault stays armed until explicitly disarmed, so a single armed
/// point can exercise a caller's full retry loop.
#[derive(Debug, Default, Clone)]
pub struct FaultInjector {
    armed: Arc<Mutex<HashMap<FaultPoint, Fault>>>,
}

impl FaultInjector {
    /// Creates an injector with no armed faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an injector pre-armed from configuration.
    pub fn from_config(config: impl IntoIterator<Item = (FaultPoint, Fault)>) -> Self {
        Self {
            armed: Arc::new(Mutex::new(config.into_iter().collect())),
        }
    }

    /// Arms `point` to raise `fault` on its next consultations.
    pub fn arm(&self, point: FaultPoint, fault: Fault) {
        self.lock_armed().insert(point, fault);
    }

    /// Disarms `point`; subsequent operations run against the store again.
    pub fn disarm(&self, point: FaultPoint) {
        self.lock_armed().remove(&point);
    }

    /// Disarms all fault points.
    pub fn clear(&self) {
        self.lock_armed().clear();
    }

    /// Returns whether `point` is currently armed.
    pub fn is_armed(&self, point: FaultPoint) -> bool {
        self.lock_armed().contains_key(&point)
    }

    /// Raises the armed fault for `point`, if any.
    ///
    /// Called at the top of every mutating operation, before any store
    /// access.
    pub(crate) fn check(&self, point: FaultPoint) -> Result<(), Error> {
        match self.lock_armed().get(&point) {
            Some(&fault) => {
                tracing::info!(%point, %fault, "raising injected fault");
                Err(Error::FaultInjected { point, fault })
            }
            None => Ok(()),
        }
    }

    fn lock_armed(&self) -> std::sync::MutexGuard<'_, HashMap<FaultPoint, Fault>> {
        // A panic while holding this lock leaves the map intact, so the
        // poison marker carries no information worth propagating.
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_point_passes() {
        let injector = FaultInjector::new();
        assert!(injector.check(FaultPoint::LockShared).is_ok());
    }

    #[test]
    fn armed_point_raises_until_disarmed() {
        let injector = FaultInjector::new();
        injector.arm(FaultPoint::LockShared, Fault::Retryable);

        let err = injector
            .check(FaultPoint::LockShared)
            .expect_err("armed point should raise");
        assert!(matches!(
            err,
            Error::FaultInjected {
                point: FaultPoint::LockShared,
                fault: Fault::Retryable,
            }
        ));

        // Stays armed across consultations
        assert!(injector.check(FaultPoint::LockShared).is_err());
        // Other points are unaffected
        assert!(injector.check(FaultPoint::LockExclusive).is_ok());

        injector.disarm(FaultPoint::LockShared);
        assert!(injector.check(FaultPoint::LockShared).is_ok());
    }

    #[test]
    fn clones_share_the_registry() {
        let injector = FaultInjector::new();
        let clone = injector.clone();

        clone.arm(FaultPoint::DecrementLink, Fault::Fatal);
        assert!(injector.is_armed(FaultPoint::DecrementLink));

        injector.clear();
        assert!(!clone.is_armed(FaultPoint::DecrementLink));
    }

    #[test]
    fn from_config_pre_arms_points() {
        let injector = FaultInjector::from_config([
            (FaultPoint::CreateLink, Fault::Fatal),
            (FaultPoint::UnlockShared, Fault::Retryable),
        ]);
        assert!(injector.is_armed(FaultPoint::CreateLink));
        assert!(injector.is_armed(FaultPoint::UnlockShared));
        assert!(!injector.is_armed(FaultPoint::DeleteLink));
    }
}
