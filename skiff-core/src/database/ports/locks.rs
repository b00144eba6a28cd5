use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skiff_model::{FileLock, LockAttempt, UserId};

use crate::error::Result;

#[async_trait]
pub trait LocksRepository: Send + Sync {
    /// Insert-if-absent. A row whose `expires_at` has passed counts as
    /// absent and is replaced in the same transaction. Returns the existing
    /// active lock when somebody else holds the path.
    async fn try_acquire(&self, lock: &FileLock) -> Result<LockAttempt>;
    async fn get(&self, path: &str) -> Result<Option<FileLock>>;
    /// Deletes the row iff `holder` matches; returns whether a row was
    /// deleted.
    async fn delete_if_holder(&self, path: &str, holder: UserId) -> Result<bool>;
    /// Extends expiry iff `holder` matches; returns whether a row changed.
    async fn refresh(
        &self,
        path: &str,
        holder: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn sweep_expired(&self) -> Result<u64>;
}
