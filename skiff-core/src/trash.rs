//! Trash: atomic move-out of the tree with a metadata side-record per
//! entry, restore, and the retention reaper.
//!
//! The bytes live at `<dataRoot>/trash/<username>/<id>/<name>`, the record
//! at `<dataRoot>/trash/<username>/<id>.json`. Records are the listing
//! source of truth; orphans in either direction are cleaned on reap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use skiff_model::{
    audit::event, ChangeEvent, FsOp, NewAuditEvent, StorageClass, StorageOwner, TrashId,
    TrashItem, TrashStats, User, UserId,
};
use tokio::fs;
use tracing::{info, warn};

use crate::acl::{AccessIntent, AclEngine};
use crate::audit::AuditRecorder;
use crate::database::ports::DrivesRepository;
use crate::error::{Error, Result};
use crate::events::EventHub;
use crate::paths::PathResolver;
use crate::quota::{owner_for, tree_size, QuotaAccountant};

pub struct TrashManager {
    resolver: Arc<PathResolver>,
    acl: Arc<AclEngine>,
    quota: Arc<QuotaAccountant>,
    drives: Arc<dyn DrivesRepository>,
    audit: Arc<AuditRecorder>,
    hub: Arc<EventHub>,
}

impl std::fmt::Debug for TrashManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrashManager").finish()
    }
}

impl TrashManager {
    pub fn new(
        resolver: Arc<PathResolver>,
        acl: Arc<AclEngine>,
        quota: Arc<QuotaAccountant>,
        drives: Arc<dyn DrivesRepository>,
        audit: Arc<AuditRecorder>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            resolver,
            acl,
            quota,
            drives,
            audit,
            hub,
        }
    }

    fn record_path(&self, username: &str, id: TrashId) -> PathBuf {
        self.resolver.user_trash_dir(username).join(format!("{id}.json"))
    }

    fn payload_dir(&self, username: &str, id: TrashId) -> PathBuf {
        self.resolver.user_trash_dir(username).join(id.to_string())
    }

    pub async fn move_to_trash(&self, principal: &User, vpath: &str) -> Result<TrashItem> {
        let resolved = self.resolver.resolve(vpath, Some(principal))?;
        if resolved.is_class_root() {
            return Err(Error::InvalidPath(format!(
                "cannot delete {}",
                resolved.canonical
            )));
        }
        self.acl
            .require(Some(principal), &resolved, AccessIntent::Write)
            .await?;

        let metadata = fs::symlink_metadata(&resolved.real)
            .await
            .map_err(|_| Error::NotFound(resolved.canonical.clone()))?;
        let is_dir = metadata.is_dir();
        let size = tree_size(&resolved.real).await?;
        let name = resolved
            .real
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(resolved.canonical.clone()))?;

        let id = TrashId::new();
        let payload_dir = self.payload_dir(&principal.username, id);
        fs::create_dir_all(&payload_dir).await?;
        fs::rename(&resolved.real, payload_dir.join(&name)).await?;

        let item = TrashItem {
            id,
            owner_id: principal.id,
            original_path: resolved.canonical.clone(),
            name,
            size,
            is_dir,
            deleted_at: Utc::now(),
        };
        let record = self.record_path(&principal.username, id);
        fs::write(&record, serde_json::to_vec_pretty(&item)?).await?;

        let owner = owner_for(&resolved, principal, &self.drives).await?;
        self.quota.apply_delta(owner, -size).await?;
        self.quota.apply_trash_delta(principal.id, size).await?;

        self.audit
            .record(
                NewAuditEvent::new(event::FILE_TRASH, &resolved.canonical)
                    .actor(principal.id)
                    .details(serde_json::json!({ "trash_id": id, "bytes": size })),
            )
            .await;
        self.hub
            .publish(&ChangeEvent {
                op: FsOp::Remove,
                path: resolved.canonical,
                is_dir,
                owner: home_owner(&resolved.class, principal),
                actor: Some(principal.id),
                ts: Utc::now(),
            })
            .await;

        Ok(item)
    }

    pub async fn list(&self, principal: &User) -> Result<Vec<TrashItem>> {
        let mut items = self.read_records(&principal.username).await?;
        items.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(items)
    }

    pub async fn stats(&self, principal: &User) -> Result<TrashStats> {
        let items = self.read_records(&principal.username).await?;
        Ok(TrashStats {
            items: items.len() as i64,
            bytes: items.iter().map(|i| i.size).sum(),
        })
    }

    async fn read_records(&self, username: &str) -> Result<Vec<TrashItem>> {
        let dir = self.resolver.user_trash_dir(username);
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<TrashItem>(&bytes) {
                    Ok(item) => out.push(item),
                    Err(e) => warn!("corrupt trash record {}: {e}", path.display()),
                },
                Err(e) => warn!("unreadable trash record {}: {e}", path.display()),
            }
        }
        Ok(out)
    }

    async fn load_record(&self, principal: &User, id: TrashId) -> Result<TrashItem> {
        let record = self.record_path(&principal.username, id);
        let bytes = fs::read(&record)
            .await
            .map_err(|_| Error::NotFound(format!("trash item {id}")))?;
        let item: TrashItem = serde_json::from_slice(&bytes)?;
        if item.owner_id != principal.id {
            return Err(Error::Forbidden("not the trash owner".to_string()));
        }
        Ok(item)
    }

    /// Restores an entry to its original virtual path, recreating missing
    /// parents and refusing to overwrite anything that appeared there since.
    pub async fn restore(&self, principal: &User, id: TrashId) -> Result<String> {
        let item = self.load_record(principal, id).await?;
        let target = self.resolver.resolve(&item.original_path, Some(principal))?;
        self.acl
            .require(Some(principal), &target, AccessIntent::Write)
            .await?;

        if fs::symlink_metadata(&target.real).await.is_ok() {
            return Err(Error::AlreadyExists(target.canonical.clone()));
        }
        if let Some(parent) = target.real.parent() {
            fs::create_dir_all(parent).await?;
        }
        let payload = self.payload_dir(&principal.username, id).join(&item.name);
        fs::rename(&payload, &target.real).await?;

        let owner = owner_for(&target, principal, &self.drives).await?;
        self.quota.apply_delta(owner, item.size).await?;
        self.quota.apply_trash_delta(principal.id, -item.size).await?;

        let _ = fs::remove_dir_all(self.payload_dir(&principal.username, id)).await;
        fs::remove_file(self.record_path(&principal.username, id)).await?;

        self.audit
            .record(
                NewAuditEvent::new(event::FILE_RESTORE, &target.canonical)
                    .actor(principal.id)
                    .details(serde_json::json!({ "trash_id": id })),
            )
            .await;
        self.hub
            .publish(&ChangeEvent {
                op: FsOp::Create,
                path: target.canonical.clone(),
                is_dir: item.is_dir,
                owner: home_owner(&target.class, principal),
                actor: Some(principal.id),
                ts: Utc::now(),
            })
            .await;

        info!("restored {} from trash for {}", target.canonical, principal.username);
        Ok(target.canonical)
    }

    /// Permanently deletes one entry.
    pub async fn delete_item(&self, principal: &User, id: TrashId) -> Result<()> {
        let item = self.load_record(principal, id).await?;
        self.remove_entry(&principal.username, &item).await?;
        Ok(())
    }

    /// Permanently deletes everything in the principal's trash; returns the
    /// number of entries removed.
    pub async fn empty(&self, principal: &User) -> Result<u64> {
        let mut removed = 0u64;
        for item in self.read_records(&principal.username).await? {
            self.remove_entry(&principal.username, &item).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn remove_entry(&self, username: &str, item: &TrashItem) -> Result<()> {
        let _ = fs::remove_dir_all(self.payload_dir(username, item.id)).await;
        let _ = fs::remove_file(self.record_path(username, item.id)).await;
        self.quota.apply_trash_delta(item.owner_id, -item.size).await?;
        Ok(())
    }

    /// Retention reaper: removes entries older than `retention_days` across
    /// all users, plus any record/payload orphans it finds on the way.
    pub async fn reap(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let trash_root = self.resolver.trash_root();
        let mut reaped = 0u64;

        let mut users = match fs::read_dir(&trash_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(user_dir) = users.next_entry().await? {
            if !user_dir.file_type().await?.is_dir() {
                continue;
            }
            let username = user_dir.file_name().to_string_lossy().into_owned();
            let items = self.read_records(&username).await?;

            for item in &items {
                let payload = self.payload_dir(&username, item.id).join(&item.name);
                let has_payload = fs::symlink_metadata(&payload).await.is_ok();
                if item.deleted_at < cutoff || !has_payload {
                    if !has_payload {
                        warn!("trash record without bytes, dropping: {}", item.id);
                    }
                    self.remove_entry(&username, item).await?;
                    reaped += 1;
                }
            }

            // Payload directories without a record are unrecoverable;
            // remove them so they stop holding bytes.
            let known: Vec<String> = items.iter().map(|i| i.id.to_string()).collect();
            let mut entries = fs::read_dir(user_dir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await?.is_dir() && !known.contains(&name) {
                    warn!("orphaned trash payload, removing: {username}/{name}");
                    let _ = fs::remove_dir_all(entry.path()).await;
                }
            }
        }

        if reaped > 0 {
            info!("trash reaper removed {reaped} entries");
        }
        Ok(reaped)
    }
}

fn home_owner(class: &StorageClass, principal: &User) -> Option<UserId> {
    match class {
        StorageClass::Home => Some(principal.id),
        _ => None,
    }
}
