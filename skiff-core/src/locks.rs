//! Advisory per-path locks.
//!
//! Locks are cooperative: they serialise well-behaved web clients but
//! cannot stop the SMB daemon (or an admin) from writing. The watcher
//! audits such writes as lock bypasses when it sees them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use skiff_model::{FileLock, LockAttempt, UserId};
use tracing::debug;

use crate::database::ports::LocksRepository;
use crate::error::{Error, Result};

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

pub struct LockManager {
    repo: Arc<dyn LocksRepository>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager").finish()
    }
}

impl LockManager {
    pub fn new(repo: Arc<dyn LocksRepository>) -> Self {
        Self { repo }
    }

    /// Attempts to take the exclusive lock on `path`. Returns the holder's
    /// lock when somebody else already has it.
    pub async fn acquire(
        &self,
        path: &str,
        holder: UserId,
        ttl: Duration,
        reason: Option<String>,
    ) -> Result<LockAttempt> {
        let now = Utc::now();
        let lock = FileLock {
            path: path.to_string(),
            locked_by: holder,
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .map_err(|e| Error::Internal(format!("lock ttl: {e}")))?,
            lock_type: "exclusive".to_string(),
            reason,
        };
        let attempt = self.repo.try_acquire(&lock).await?;
        match &attempt {
            LockAttempt::Acquired { .. } => debug!("lock acquired: {path} by {holder}"),
            LockAttempt::Held { lock } => {
                debug!("lock contended: {path} held by {}", lock.locked_by)
            }
        }
        Ok(attempt)
    }

    /// Like [`acquire`](Self::acquire) but turns contention into a
    /// `lock-held` error.
    pub async fn acquire_or_err(
        &self,
        path: &str,
        holder: UserId,
        ttl: Duration,
        reason: Option<String>,
    ) -> Result<FileLock> {
        match self.acquire(path, holder, ttl, reason).await? {
            LockAttempt::Acquired { lock } => Ok(lock),
            LockAttempt::Held { lock } => Err(Error::LockHeld {
                holder: lock.locked_by.to_string(),
                until: lock.expires_at,
            }),
        }
    }

    /// Releases the lock; only the holder may release.
    pub async fn release(&self, path: &str, holder: UserId) -> Result<()> {
        match self.repo.get(path).await? {
            None => Err(Error::NotFound(format!("no lock on {path}"))),
            Some(lock) if lock.locked_by != holder => Err(Error::Forbidden(format!(
                "lock on {path} is held by another user"
            ))),
            Some(_) => {
                self.repo.delete_if_holder(path, holder).await?;
                Ok(())
            }
        }
    }

    /// Extends the holder's lock by `ttl` from now.
    pub async fn refresh(&self, path: &str, holder: UserId, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| Error::Internal(format!("lock ttl: {e}")))?;
        if self.repo.refresh(path, holder, expires_at).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("no lock held on {path}")))
        }
    }

    pub async fn holder(&self, path: &str) -> Result<Option<FileLock>> {
        self.repo.get(path).await
    }

    /// Removes expired rows; run hourly to keep the table bounded.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let swept = self.repo.sweep_expired().await?;
        if swept > 0 {
            debug!("swept {swept} expired locks");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;

    fn manager() -> LockManager {
        LockManager::new(MemoryDb::new().locks.clone())
    }

    #[tokio::test]
    async fn second_acquire_reports_holder() {
        let manager = manager();
        let bob = UserId::new();
        let carol = UserId::new();

        let first = manager
            .acquire("/home/bob/report.docx", bob, Duration::from_secs(300), None)
            .await
            .unwrap();
        assert!(first.acquired());

        let second = manager
            .acquire("/home/bob/report.docx", carol, Duration::from_secs(300), None)
            .await
            .unwrap();
        match second {
            LockAttempt::Held { lock } => assert_eq!(lock.locked_by, bob),
            LockAttempt::Acquired { .. } => panic!("lock should be contended"),
        }
    }

    #[tokio::test]
    async fn expired_lock_is_treated_as_absent() {
        let manager = manager();
        let bob = UserId::new();
        let carol = UserId::new();

        manager
            .acquire("/home/bob/x", bob, Duration::from_millis(10), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let attempt = manager
            .acquire("/home/bob/x", carol, Duration::from_secs(60), None)
            .await
            .unwrap();
        assert!(attempt.acquired());
    }

    #[tokio::test]
    async fn only_holder_may_release_or_refresh() {
        let manager = manager();
        let bob = UserId::new();
        let carol = UserId::new();

        manager
            .acquire("/home/bob/x", bob, Duration::from_secs(60), None)
            .await
            .unwrap();

        let err = manager.release("/home/bob/x", carol).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let err = manager
            .refresh("/home/bob/x", carol, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not-found");

        manager.release("/home/bob/x", bob).await.unwrap();
        let err = manager.release("/home/bob/x", bob).await.unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }
}
