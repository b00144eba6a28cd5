use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Advisory exclusive lock on one virtual path. At most one active lock per
/// path; a lock is active iff `expires_at > now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub path: String,
    pub locked_by: UserId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub lock_type: String,
    pub reason: Option<String>,
}

impl FileLock {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Result of an acquire attempt: either the caller holds the lock now, or
/// somebody else does.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum LockAttempt {
    Acquired { lock: FileLock },
    Held { lock: FileLock },
}

impl LockAttempt {
    pub fn acquired(&self) -> bool {
        matches!(self, LockAttempt::Acquired { .. })
    }
}
