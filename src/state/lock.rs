//! Advisory lock serializing runs that write manifests.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

/// Lock expiry in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A held manifest lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier, required to release the lock.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock stops being honoured.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for `holder` expiring after [`LOCK_EXPIRY_SECS`].
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_ttl(holder, Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// Creates a lock with a custom lifetime.
    #[must_use]
    pub fn with_ttl(holder: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns true once the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds until expiry, never negative.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// The error reported to anyone else trying to take this lock.
    #[must_use]
    pub fn contention_error(&self) -> StateError {
        StateError::LockedByOther {
            holder: self.holder.clone(),
            since: self.acquired_at.to_rfc3339(),
        }
    }

    /// Checks that `lock_id` matches this lock.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockFailed`] on mismatch.
    pub fn check_owner(&self, lock_id: &str) -> Result<(), StateError> {
        if self.lock_id == lock_id {
            Ok(())
        } else {
            Err(StateError::LockFailed {
                message: format!("Lock ID mismatch: expected {}, got {lock_id}", self.lock_id),
            })
        }
    }
}

/// Identifies the current process as `<hostname>-<pid>-<random>`.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];

    format!("{hostname}-{pid}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_lock_is_live() {
        let lock = LockInfo::new("ci-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
        assert!(lock.check_owner(&lock.lock_id).is_ok());
        assert!(lock.check_owner("someone-else").is_err());
    }

    #[test]
    fn test_expired_lock() {
        let lock = LockInfo::with_ttl("ci-runner", Duration::seconds(-1));
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_contains_pid() {
        let first = generate_holder_id();
        assert_ne!(first, generate_holder_id());
        assert!(first.contains(&std::process::id().to_string()));
    }
}
