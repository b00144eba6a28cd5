//! Per-principal byte accounting.
//!
//! The filesystem is the authority; the stored counters are cached
//! accumulators maintained incrementally by signed deltas and overwritten
//! by the periodic reconciliation walk. Upload reservations hold bytes in a
//! transient pending pool so concurrent uploads cannot oversubscribe a
//! quota between check and commit.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use skiff_model::{audit::event, NewAuditEvent, StorageOwner, UploadId};
use tracing::{info, warn};

use crate::audit::AuditRecorder;
use crate::database::ports::{DrivesRepository, UsersRepository};
use crate::error::{Error, Result};
use crate::paths::PathResolver;

const USAGE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Drift tolerance before reconciliation logs a security event.
const DRIFT_ABSOLUTE: i64 = 1024 * 1024;
const DRIFT_RELATIVE: f64 = 0.001;

#[derive(Debug, Clone, Copy)]
pub struct UsageSnapshot {
    pub used: i64,
    pub quota: i64,
    pub trash_used: i64,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    owner: StorageOwner,
    bytes: i64,
}

#[derive(Debug, Clone, Copy)]
struct CachedUsage {
    snapshot: UsageSnapshot,
    fetched: Instant,
}

pub struct QuotaAccountant {
    users: Arc<dyn UsersRepository>,
    drives: Arc<dyn DrivesRepository>,
    audit: Arc<AuditRecorder>,
    pending: DashMap<UploadId, Reservation>,
    usage_cache: DashMap<StorageOwner, CachedUsage>,
}

impl std::fmt::Debug for QuotaAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaAccountant")
            .field("pending_reservations", &self.pending.len())
            .finish()
    }
}

impl QuotaAccountant {
    pub fn new(
        users: Arc<dyn UsersRepository>,
        drives: Arc<dyn DrivesRepository>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            users,
            drives,
            audit,
            pending: DashMap::new(),
            usage_cache: DashMap::new(),
        }
    }

    /// Sum of bytes reserved against one principal.
    pub fn pending_for(&self, owner: StorageOwner) -> i64 {
        self.pending
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.bytes)
            .sum()
    }

    /// Reserves `bytes` for an upload. The check is
    /// `used + pending + bytes <= quota` unless the quota is unlimited.
    pub async fn reserve(&self, owner: StorageOwner, upload: UploadId, bytes: i64) -> Result<()> {
        let snapshot = self.usage_uncached(owner).await?;
        if snapshot.quota > 0 {
            let pending = self.pending_for(owner);
            if snapshot.used + pending + bytes > snapshot.quota {
                return Err(Error::QuotaExceeded(format!(
                    "{} bytes requested, {} of {} used ({} pending)",
                    bytes, snapshot.used, snapshot.quota, pending
                )));
            }
        }
        self.pending.insert(upload, Reservation { owner, bytes });
        Ok(())
    }

    /// Drops a reservation without charging it (abort, expiry).
    pub fn release(&self, upload: UploadId) {
        self.pending.remove(&upload);
    }

    /// Converts a reservation into a committed delta.
    pub async fn commit(&self, upload: UploadId) -> Result<()> {
        let Some((_, reservation)) = self.pending.remove(&upload) else {
            return Err(Error::UploadOrphaned(format!(
                "no reservation for upload {upload}"
            )));
        };
        self.apply_delta(reservation.owner, reservation.bytes).await
    }

    /// Applies a signed byte delta to the owner's counter.
    pub async fn apply_delta(&self, owner: StorageOwner, delta: i64) -> Result<()> {
        match owner {
            StorageOwner::User(id) => self.users.apply_storage_delta(id, delta).await?,
            StorageOwner::Drive(id) => self.drives.apply_storage_delta(id, delta).await?,
        }
        self.usage_cache.remove(&owner);
        Ok(())
    }

    /// Applies a signed delta to a user's trash counter.
    pub async fn apply_trash_delta(&self, user: skiff_model::UserId, delta: i64) -> Result<()> {
        self.users.apply_trash_delta(user, delta).await?;
        self.usage_cache.remove(&StorageOwner::User(user));
        Ok(())
    }

    /// Usage through the 60 s read cache (dashboards poll this).
    pub async fn usage(&self, owner: StorageOwner) -> Result<UsageSnapshot> {
        if let Some(cached) = self.usage_cache.get(&owner) {
            if cached.fetched.elapsed() < USAGE_CACHE_TTL {
                return Ok(cached.snapshot);
            }
        }
        let snapshot = self.usage_uncached(owner).await?;
        self.usage_cache.insert(
            owner,
            CachedUsage {
                snapshot,
                fetched: Instant::now(),
            },
        );
        Ok(snapshot)
    }

    async fn usage_uncached(&self, owner: StorageOwner) -> Result<UsageSnapshot> {
        match owner {
            StorageOwner::User(id) => {
                let user = self
                    .users
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("user {id}")))?;
                Ok(UsageSnapshot {
                    used: user.storage_used,
                    quota: user.storage_quota,
                    trash_used: user.trash_used,
                })
            }
            StorageOwner::Drive(id) => {
                let drive = self
                    .drives
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("drive {id}")))?;
                Ok(UsageSnapshot {
                    used: drive.storage_used,
                    quota: drive.storage_quota,
                    trash_used: 0,
                })
            }
        }
    }

    /// Walks every principal's subtree and overwrites the counters with the
    /// measured truth. Drift beyond tolerance is recorded as a security
    /// event. Returns the number of principals reconciled.
    pub async fn reconcile(&self, resolver: &PathResolver) -> Result<u64> {
        let mut reconciled = 0u64;

        for user in self.users.list().await? {
            let home = resolver.home_dir(&user.username);
            let trash = resolver.user_trash_dir(&user.username);
            let measured = tree_size(&home).await?;
            let measured_trash = tree_size(&trash).await?;

            self.report_drift(
                &format!("/home ({})", user.username),
                user.storage_used,
                measured,
            )
            .await;

            self.users
                .set_usage(user.id, measured, measured_trash)
                .await?;
            self.usage_cache.remove(&StorageOwner::User(user.id));
            reconciled += 1;
        }

        for drive in self.drives.list().await? {
            let measured = tree_size(&resolver.drive_dir(&drive.name)).await?;
            self.report_drift(
                &format!("/shared/{}", drive.name),
                drive.storage_used,
                measured,
            )
            .await;
            self.drives.set_usage(drive.id, measured).await?;
            self.usage_cache.remove(&StorageOwner::Drive(drive.id));
            reconciled += 1;
        }

        info!("reconciled storage counters for {reconciled} principals");
        Ok(reconciled)
    }

    async fn report_drift(&self, target: &str, stored: i64, measured: i64) {
        let drift = (stored - measured).abs();
        let tolerance = DRIFT_ABSOLUTE.max((measured as f64 * DRIFT_RELATIVE) as i64);
        if drift > tolerance {
            warn!("storage drift on {target}: stored {stored}, measured {measured}");
            self.audit
                .record(
                    NewAuditEvent::new(event::SECURITY_QUOTA_DRIFT, target).details(
                        serde_json::json!({
                            "stored": stored,
                            "measured": measured,
                            "drift": drift,
                        }),
                    ),
                )
                .await;
        }
    }
}

/// Which principal's counter a resolved path charges: the caller's own for
/// home paths, the drive's for shared paths.
pub async fn owner_for(
    resolved: &crate::paths::Resolved,
    principal: &skiff_model::User,
    drives: &Arc<dyn DrivesRepository>,
) -> Result<StorageOwner> {
    use skiff_model::StorageClass;
    match resolved.class {
        StorageClass::Home => Ok(StorageOwner::User(principal.id)),
        StorageClass::Shared => {
            let name = resolved
                .drive
                .as_deref()
                .ok_or_else(|| Error::Internal("shared path without drive".to_string()))?;
            let drive = drives
                .get_by_name(name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("drive {name}")))?;
            Ok(StorageOwner::Drive(drive.id))
        }
        StorageClass::Root => Err(Error::InvalidPath(
            "root paths have no storage owner".to_string(),
        )),
    }
}

/// Recursive byte count of a subtree; missing paths count as zero.
pub async fn tree_size(path: &Path) -> Result<i64> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || tree_size_blocking(&path))
        .await
        .map_err(|e| Error::Internal(format!("size walk: {e}")))?
}

fn tree_size_blocking(path: &Path) -> Result<i64> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_file() {
        return Ok(metadata.len() as i64);
    }
    if !metadata.is_dir() {
        // Symlinks and specials do not count against anyone.
        return Ok(0);
    }
    let mut total = 0i64;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        total += tree_size_blocking(&entry.path())?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;
    use chrono::Utc;
    use skiff_model::{User, UserId};

    fn user_with_quota(quota: i64) -> User {
        User {
            id: UserId::new(),
            username: format!("u{}", UserId::new()),
            email: None,
            is_admin: false,
            is_active: true,
            storage_quota: quota,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn accountant(db: &MemoryDb) -> QuotaAccountant {
        QuotaAccountant::new(
            db.users.clone(),
            db.drives.clone(),
            Arc::new(AuditRecorder::new(db.audit.clone())),
        )
    }

    #[tokio::test]
    async fn reservation_counts_against_quota() {
        let db = MemoryDb::new();
        let user = user_with_quota(1000);
        db.users.create(&user, None).await.unwrap();
        let quota = accountant(&db);
        let owner = StorageOwner::User(user.id);

        quota.reserve(owner, UploadId::new(), 600).await.unwrap();
        let err = quota
            .reserve(owner, UploadId::new(), 500)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "quota-exceeded");

        // Releasing frees the headroom again.
        quota.reserve(owner, UploadId::new(), 400).await.unwrap();
    }

    #[tokio::test]
    async fn commit_converts_reservation_into_usage() {
        let db = MemoryDb::new();
        let user = user_with_quota(1000);
        db.users.create(&user, None).await.unwrap();
        let quota = accountant(&db);
        let owner = StorageOwner::User(user.id);
        let upload = UploadId::new();

        quota.reserve(owner, upload, 300).await.unwrap();
        quota.commit(upload).await.unwrap();
        assert_eq!(quota.pending_for(owner), 0);

        let stored = db.users.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.storage_used, 300);
    }

    #[tokio::test]
    async fn unlimited_quota_never_rejects() {
        let db = MemoryDb::new();
        let user = user_with_quota(0);
        db.users.create(&user, None).await.unwrap();
        let quota = accountant(&db);
        quota
            .reserve(StorageOwner::User(user.id), UploadId::new(), i64::MAX / 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reconcile_overwrites_counters_from_disk() {
        let db = MemoryDb::new();
        let user = user_with_quota(0);
        db.users.create(&user, None).await.unwrap();
        // Seed a wrong counter.
        db.users.apply_storage_delta(user.id, 999_999).await.unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path());
        let home = resolver.home_dir(&user.username);
        std::fs::create_dir_all(home.join("docs")).unwrap();
        std::fs::write(home.join("docs/a.bin"), vec![0u8; 1234]).unwrap();

        let quota = accountant(&db);
        quota.reconcile(&resolver).await.unwrap();

        let stored = db.users.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.storage_used, 1234);
        assert_eq!(stored.trash_used, 0);
    }
}
