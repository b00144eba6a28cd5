//! Resumable chunked uploads.
//!
//! Bytes accumulate in a staging file under `<dataRoot>/uploads/<id>` with
//! a JSON sidecar carrying the destination and accounting context, so
//! in-flight uploads survive a restart. Offsets are strictly monotonic;
//! finalisation is one atomic rename into the tree plus a quota commit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skiff_model::{
    audit::event, ChangeEvent, FsOp, NewAuditEvent, ShareId, ShareToken, StorageClass,
    StorageOwner, UploadId, User, UserId,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::acl::{AccessIntent, AclEngine};
use crate::audit::AuditRecorder;
use crate::database::ports::DrivesRepository;
use crate::error::{Error, Result};
use crate::events::EventHub;
use crate::locks::{LockManager, DEFAULT_LOCK_TTL};
use crate::paths::{validate_name, PathResolver};
use crate::quota::{owner_for, QuotaAccountant};
use crate::settings::SettingsCache;
use crate::ttl::TtlSet;

/// Staging sidecar: everything needed to resume or finalise after a
/// restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMeta {
    pub id: UploadId,
    /// Canonical virtual destination, in `dest_username`'s view.
    pub dest: String,
    pub dest_username: String,
    pub uploader: UserId,
    pub owner: StorageOwner,
    pub length: u64,
    pub client_ip: Option<String>,
    pub share_id: Option<ShareId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AppendOutcome {
    /// More bytes expected; the new offset.
    Offset(u64),
    /// The staging file reached its declared length and was promoted.
    Completed { path: String, bytes: u64 },
}

pub struct UploadPipeline {
    resolver: Arc<PathResolver>,
    acl: Arc<AclEngine>,
    quota: Arc<QuotaAccountant>,
    locks: Arc<LockManager>,
    drives: Arc<dyn DrivesRepository>,
    audit: Arc<AuditRecorder>,
    hub: Arc<EventHub>,
    web_origin: Arc<TtlSet>,
    settings: Arc<SettingsCache>,
    entries: DashMap<UploadId, Arc<Mutex<UploadMeta>>>,
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("in_flight", &self.entries.len())
            .finish()
    }
}

impl UploadPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<PathResolver>,
        acl: Arc<AclEngine>,
        quota: Arc<QuotaAccountant>,
        locks: Arc<LockManager>,
        drives: Arc<dyn DrivesRepository>,
        audit: Arc<AuditRecorder>,
        hub: Arc<EventHub>,
        web_origin: Arc<TtlSet>,
        settings: Arc<SettingsCache>,
    ) -> Self {
        Self {
            resolver,
            acl,
            quota,
            locks,
            drives,
            audit,
            hub,
            web_origin,
            settings,
            entries: DashMap::new(),
        }
    }

    fn staging_path(&self, id: UploadId) -> PathBuf {
        self.resolver.uploads_root().join(id.to_string())
    }

    fn sidecar_path(&self, id: UploadId) -> PathBuf {
        self.resolver.uploads_root().join(format!("{id}.json"))
    }

    fn staging_lock_path(id: UploadId) -> String {
        format!("/uploads/{id}")
    }

    /// Announces an upload into the principal's own view of the tree.
    pub async fn create(
        &self,
        principal: &User,
        dest: &str,
        length: u64,
        client_ip: Option<String>,
    ) -> Result<UploadId> {
        let settings = self.settings.current().await;
        if settings.max_file_size > 0 && length as i64 > settings.max_file_size {
            return Err(Error::FileTooLarge(format!(
                "{length} bytes exceeds the {} byte limit",
                settings.max_file_size
            )));
        }

        let resolved = self.resolver.resolve(dest, Some(principal))?;
        if resolved.class == StorageClass::Root || resolved.is_class_root() {
            return Err(Error::InvalidPath(format!(
                "{} is not a file destination",
                resolved.canonical
            )));
        }
        let name = resolved
            .canonical
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        validate_name(&name)?;
        self.acl
            .require(Some(principal), &resolved, AccessIntent::Write)
            .await?;

        let owner = owner_for(&resolved, principal, &self.drives).await?;
        let meta = UploadMeta {
            id: UploadId::new(),
            dest: resolved.canonical,
            dest_username: principal.username.clone(),
            uploader: principal.id,
            owner,
            length,
            client_ip,
            share_id: None,
            created_at: Utc::now(),
        };
        self.open_staging(meta).await
    }

    /// Announces an upload through an upload share: the destination is
    /// `<share path>/<filename>` in the creator's view, gated by the
    /// share's extension whitelist and per-file cap instead of the ACL.
    pub async fn create_for_share(
        &self,
        share: &ShareToken,
        creator: &User,
        filename: &str,
        length: u64,
        client_ip: Option<String>,
    ) -> Result<UploadId> {
        validate_name(filename)?;
        if !share.extension_allowed(filename) {
            return Err(Error::InvalidFilename(format!(
                "extension of {filename} is not allowed on this link"
            )));
        }
        if share.max_file_size > 0 && length as i64 > share.max_file_size {
            return Err(Error::FileTooLarge(format!(
                "{length} bytes exceeds the link's {} byte limit",
                share.max_file_size
            )));
        }
        let settings = self.settings.current().await;
        if settings.max_file_size > 0 && length as i64 > settings.max_file_size {
            return Err(Error::FileTooLarge(format!(
                "{length} bytes exceeds the {} byte limit",
                settings.max_file_size
            )));
        }

        let dest = format!("{}/{}", share.path.trim_end_matches('/'), filename);
        let resolved = self.resolver.resolve_for_user(&dest, &creator.username)?;
        let owner = owner_for(&resolved, creator, &self.drives).await?;
        let meta = UploadMeta {
            id: UploadId::new(),
            dest: resolved.canonical,
            dest_username: creator.username.clone(),
            uploader: creator.id,
            owner,
            length,
            client_ip,
            share_id: Some(share.id),
            created_at: Utc::now(),
        };
        self.open_staging(meta).await
    }

    async fn open_staging(&self, meta: UploadMeta) -> Result<UploadId> {
        let id = meta.id;
        self.quota.reserve(meta.owner, id, meta.length as i64).await?;

        // The lock row makes the in-flight upload visible to lock listings;
        // actual append serialisation is the per-entry mutex.
        if let Err(err) = self
            .locks
            .acquire_or_err(
                &Self::staging_lock_path(id),
                meta.uploader,
                DEFAULT_LOCK_TTL,
                Some("upload in progress".to_string()),
            )
            .await
        {
            self.quota.release(id);
            return Err(err);
        }

        fs::create_dir_all(self.resolver.uploads_root()).await?;
        fs::write(self.staging_path(id), b"").await?;
        fs::write(self.sidecar_path(id), serde_json::to_vec_pretty(&meta)?).await?;
        self.entries.insert(id, Arc::new(Mutex::new(meta)));
        info!("upload {id} created");
        Ok(id)
    }

    async fn entry(&self, id: UploadId) -> Result<Arc<Mutex<UploadMeta>>> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        // Restart recovery: rebuild the entry from its sidecar.
        let bytes = fs::read(self.sidecar_path(id))
            .await
            .map_err(|_| Error::NotFound(format!("upload {id}")))?;
        let meta: UploadMeta = serde_json::from_slice(&bytes)?;
        self.quota.reserve(meta.owner, id, meta.length as i64).await?;
        let entry = Arc::new(Mutex::new(meta));
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    /// An upload id is not a capability: only the principal that created
    /// the upload (or an admin) may touch its staging file.
    fn authorize(meta: &UploadMeta, principal: &User) -> Result<()> {
        if meta.uploader != principal.id && !principal.is_admin {
            return Err(Error::Forbidden("not the upload owner".to_string()));
        }
        Ok(())
    }

    /// Current offset and declared length; idempotent.
    pub async fn offset(&self, principal: &User, id: UploadId) -> Result<(u64, u64)> {
        let entry = self.entry(id).await?;
        let meta = entry.lock().await;
        Self::authorize(&meta, principal)?;
        let offset = self.staged_len(id).await?;
        Ok((offset, meta.length))
    }

    async fn staged_len(&self, id: UploadId) -> Result<u64> {
        Ok(fs::metadata(self.staging_path(id))
            .await
            .map_err(|_| Error::UploadOrphaned(format!("staging file for {id} is gone")))?
            .len())
    }

    /// Appends bytes at the declared offset. Gaps and overlaps reject with
    /// `offset-mismatch` and leave the staging file untouched.
    pub async fn append(
        &self,
        principal: &User,
        id: UploadId,
        offset: u64,
        data: &[u8],
    ) -> Result<AppendOutcome> {
        let entry = self.entry(id).await?;
        let meta = entry.lock().await;
        Self::authorize(&meta, principal)?;

        let current = self.staged_len(id).await?;
        if offset != current {
            return Err(Error::OffsetMismatch {
                expected: current,
                got: offset,
            });
        }
        let new_len = current + data.len() as u64;
        if new_len > meta.length {
            return Err(Error::FileTooLarge(format!(
                "{new_len} bytes would exceed the declared length {}",
                meta.length
            )));
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.staging_path(id))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;

        // Keep the advisory row alive for long uploads; failure is benign.
        let _ = self
            .locks
            .refresh(&Self::staging_lock_path(id), meta.uploader, DEFAULT_LOCK_TTL)
            .await;

        if new_len < meta.length {
            return Ok(AppendOutcome::Offset(new_len));
        }
        let completed = meta.clone();
        drop(meta);
        self.finalize(completed).await
    }

    async fn finalize(&self, meta: UploadMeta) -> Result<AppendOutcome> {
        let resolved = self
            .resolver
            .resolve_for_user(&meta.dest, &meta.dest_username)?;
        if let Some(parent) = resolved.real.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Replacing an existing destination must not double-charge it.
        let replaced = fs::metadata(&resolved.real)
            .await
            .map(|m| m.len() as i64)
            .unwrap_or(0);

        let settings = self.settings.current().await;
        // Tag before the rename so the watcher cannot race the tag.
        self.web_origin.mark(
            resolved.real.to_string_lossy().into_owned(),
            Duration::from_secs(settings.web_origin_tag_seconds.max(1) as u64),
        );
        fs::rename(self.staging_path(meta.id), &resolved.real).await?;

        self.quota.commit(meta.id).await?;
        if replaced > 0 {
            self.quota.apply_delta(meta.owner, -replaced).await?;
        }
        let _ = fs::remove_file(self.sidecar_path(meta.id)).await;
        self.entries.remove(&meta.id);
        let _ = self
            .locks
            .release(&Self::staging_lock_path(meta.id), meta.uploader)
            .await;

        self.audit
            .record(
                NewAuditEvent::new(event::FILE_UPLOAD, &resolved.canonical)
                    .actor(meta.uploader)
                    .ip(meta.client_ip.clone())
                    .details(serde_json::json!({
                        "bytes": meta.length,
                        "share_id": meta.share_id,
                    })),
            )
            .await;
        self.hub
            .publish(&ChangeEvent {
                op: FsOp::Create,
                path: resolved.canonical.clone(),
                is_dir: false,
                owner: match resolved.class {
                    StorageClass::Home => Some(meta.uploader),
                    _ => None,
                },
                actor: Some(meta.uploader),
                ts: Utc::now(),
            })
            .await;

        info!("upload {} promoted to {}", meta.id, resolved.canonical);
        Ok(AppendOutcome::Completed {
            path: resolved.canonical,
            bytes: meta.length,
        })
    }

    /// Aborts an upload: staging bytes, sidecar, reservation and lock row
    /// are all released. Owner-scoped like every other operation on an
    /// existing id.
    pub async fn terminate(&self, principal: &User, id: UploadId) -> Result<()> {
        let entry = self.entry(id).await?;
        {
            let meta = entry.lock().await;
            Self::authorize(&meta, principal)?;
        }
        self.terminate_inner(id).await
    }

    /// Abort without an ownership check; for the sweeper and internal
    /// cleanup paths that act on the system's behalf.
    async fn terminate_inner(&self, id: UploadId) -> Result<()> {
        let uploader = match self.entries.remove(&id) {
            Some((_, entry)) => Some(entry.lock().await.uploader),
            None => None,
        };
        let _ = fs::remove_file(self.staging_path(id)).await;
        let _ = fs::remove_file(self.sidecar_path(id)).await;
        self.quota.release(id);
        if let Some(uploader) = uploader {
            let _ = self.locks.release(&Self::staging_lock_path(id), uploader).await;
        }
        info!("upload {id} terminated");
        Ok(())
    }

    /// Reservation context of an in-flight upload.
    pub async fn meta(&self, principal: &User, id: UploadId) -> Result<UploadMeta> {
        let entry = self.entry(id).await?;
        let meta = entry.lock().await;
        Self::authorize(&meta, principal)?;
        Ok(meta.clone())
    }

    /// Garbage-collects staging files older than `older_than`; run by the
    /// reconciliation job.
    pub async fn sweep_orphans(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let uploads = self.resolver.uploads_root();
        let mut removed = 0u64;
        let mut entries = match fs::read_dir(&uploads).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(id) = name.parse::<UploadId>() else {
                warn!("unidentifiable staging file, removing: {}", path.display());
                let _ = fs::remove_file(&path).await;
                removed += 1;
                continue;
            };
            let stale = match self.entry(id).await {
                Ok(entry) => entry.lock().await.created_at < cutoff,
                // No sidecar: nothing can ever finalise it.
                Err(_) => true,
            };
            if stale {
                self.terminate_inner(id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("upload sweeper removed {removed} stale staging files");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;
    use crate::database::ports::users::UsersRepository;

    struct Fixture {
        _tmp: tempfile::TempDir,
        db: MemoryDb,
        pipeline: UploadPipeline,
        resolver: Arc<PathResolver>,
        web_origin: Arc<TtlSet>,
        alice: User,
    }

    async fn fixture(quota_bytes: i64) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = Arc::new(PathResolver::new(tmp.path()));
        let db = MemoryDb::new();
        let alice = User {
            id: UserId::new(),
            username: "alice".to_string(),
            email: None,
            is_admin: false,
            is_active: true,
            storage_quota: quota_bytes,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.users.create(&alice, None).await.unwrap();

        let audit = Arc::new(AuditRecorder::new(db.audit.clone()));
        let acl = Arc::new(AclEngine::new(db.drives.clone(), db.acl.clone()));
        let quota = Arc::new(QuotaAccountant::new(
            db.users.clone(),
            db.drives.clone(),
            audit.clone(),
        ));
        let hub = Arc::new(EventHub::new(acl.clone()));
        let web_origin = Arc::new(TtlSet::new());
        let pipeline = UploadPipeline::new(
            resolver.clone(),
            acl,
            quota,
            Arc::new(LockManager::new(db.locks.clone())),
            db.drives.clone(),
            audit,
            hub,
            web_origin.clone(),
            Arc::new(SettingsCache::new(db.settings.clone())),
        );
        std::fs::create_dir_all(resolver.home_dir("alice")).unwrap();
        Fixture {
            _tmp: tmp,
            db,
            pipeline,
            resolver,
            web_origin,
            alice,
        }
    }

    #[tokio::test]
    async fn chunked_upload_promotes_and_accounts() {
        let f = fixture(0).await;
        let id = f
            .pipeline
            .create(&f.alice, "/home/hello.txt", 10, Some("10.0.0.1".into()))
            .await
            .unwrap();

        match f.pipeline.append(&f.alice, id, 0, b"hello").await.unwrap() {
            AppendOutcome::Offset(5) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(f.pipeline.offset(&f.alice, id).await.unwrap(), (5, 10));

        match f.pipeline.append(&f.alice, id, 5, b"world").await.unwrap() {
            AppendOutcome::Completed { path, bytes } => {
                assert_eq!(path, "/home/hello.txt");
                assert_eq!(bytes, 10);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let dest = f.resolver.home_dir("alice").join("hello.txt");
        assert_eq!(std::fs::read(&dest).unwrap(), b"helloworld");
        assert!(f.web_origin.is_marked(&dest.to_string_lossy()));

        let user = f.db.users.get_by_id(f.alice.id).await.unwrap().unwrap();
        assert_eq!(user.storage_used, 10);
        assert!(f
            .db
            .audit
            .events()
            .iter()
            .any(|e| e.event_type == event::FILE_UPLOAD && e.target == "/home/hello.txt"));
    }

    #[tokio::test]
    async fn gaps_and_overlaps_reject_without_corrupting() {
        let f = fixture(0).await;
        let id = f
            .pipeline
            .create(&f.alice, "/home/a.bin", 8, None)
            .await
            .unwrap();
        f.pipeline.append(&f.alice, id, 0, b"abcd").await.unwrap();

        let err = f.pipeline.append(&f.alice, id, 6, b"xy").await.unwrap_err();
        assert!(matches!(
            err,
            Error::OffsetMismatch {
                expected: 4,
                got: 6
            }
        ));
        let err = f.pipeline.append(&f.alice, id, 2, b"xy").await.unwrap_err();
        assert_eq!(err.kind(), "offset-mismatch");

        // The staging file still holds exactly the accepted prefix.
        assert_eq!(f.pipeline.offset(&f.alice, id).await.unwrap().0, 4);
    }

    #[tokio::test]
    async fn bytes_beyond_declared_length_reject() {
        let f = fixture(0).await;
        let id = f
            .pipeline
            .create(&f.alice, "/home/a.bin", 4, None)
            .await
            .unwrap();
        let err = f.pipeline.append(&f.alice, id, 0, b"abcde").await.unwrap_err();
        assert_eq!(err.kind(), "file-too-large");
    }

    #[tokio::test]
    async fn quota_gates_upload_create() {
        let f = fixture(100).await;
        let err = f
            .pipeline
            .create(&f.alice, "/home/big.bin", 101, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "quota-exceeded");
    }

    #[tokio::test]
    async fn terminate_releases_reservation() {
        let f = fixture(100).await;
        let id = f
            .pipeline
            .create(&f.alice, "/home/a.bin", 80, None)
            .await
            .unwrap();
        // A second large upload is blocked by the pending reservation.
        assert!(f
            .pipeline
            .create(&f.alice, "/home/b.bin", 80, None)
            .await
            .is_err());

        f.pipeline.terminate(&f.alice, id).await.unwrap();
        f.pipeline
            .create(&f.alice, "/home/b.bin", 80, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn other_users_cannot_touch_an_upload() {
        let f = fixture(0).await;
        let id = f
            .pipeline
            .create(&f.alice, "/home/a.bin", 8, None)
            .await
            .unwrap();
        f.pipeline.append(&f.alice, id, 0, b"abcd").await.unwrap();

        let mallory = User {
            id: UserId::new(),
            username: "mallory".to_string(),
            email: None,
            is_admin: false,
            is_active: true,
            storage_quota: 0,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db_insert(&f, &mallory).await;

        let err = f.pipeline.offset(&mallory, id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let err = f.pipeline.append(&mallory, id, 4, b"zz").await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let err = f.pipeline.terminate(&mallory, id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        // The owner is unaffected; an admin may step in.
        assert_eq!(f.pipeline.offset(&f.alice, id).await.unwrap().0, 4);
        let mut admin = mallory.clone();
        admin.is_admin = true;
        f.pipeline.terminate(&admin, id).await.unwrap();
    }

    async fn db_insert(f: &Fixture, user: &User) {
        f.db.users.create(user, None).await.unwrap();
    }

    #[tokio::test]
    async fn orphan_sweep_removes_stale_staging() {
        let f = fixture(0).await;
        let id = f
            .pipeline
            .create(&f.alice, "/home/a.bin", 100, None)
            .await
            .unwrap();
        // Nothing is stale yet.
        assert_eq!(
            f.pipeline
                .sweep_orphans(chrono::Duration::hours(24))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            f.pipeline
                .sweep_orphans(chrono::Duration::seconds(0))
                .await
                .unwrap(),
            1
        );
        assert!(f.pipeline.offset(&f.alice, id).await.is_err());
    }
}
