//! In-memory fakes of the repository ports for engine tests. They mirror
//! the semantics the Postgres implementations get from SQL (upsert
//! conflicts, atomic cap checks, expiry sweeps) closely enough for unit
//! tests to be meaningful without a live store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use skiff_model::{
    AccessLevel, AclEntityType, AclEntry, AuditEvent, AuditQuery, DriveId, DriveMembership,
    FileAnnotation, FileLock, FileShare, FileShareId, LockAttempt, NewAuditEvent,
    NewNotification, Notification, SettingRow, ShareId, ShareToken, SharedDrive, User, UserId,
};

use crate::database::ports::users::LoginState;
use crate::database::ports::{
    AclRepository, AnnotationsRepository, AuditRepository, DrivesRepository,
    FileSharesRepository, LocksRepository, NotificationsRepository, SettingsRepository,
    SharesRepository, UsersRepository,
};
use crate::error::{Error, Result};

pub(crate) struct MemoryDb {
    pub users: Arc<MemoryUsers>,
    pub drives: Arc<MemoryDrives>,
    pub acl: Arc<MemoryAcl>,
    pub locks: Arc<MemoryLocks>,
    pub shares: Arc<MemoryShares>,
    pub file_shares: Arc<MemoryFileShares>,
    pub audit: Arc<MemoryAudit>,
    pub notifications: Arc<MemoryNotifications>,
    pub annotations: Arc<MemoryAnnotations>,
    pub settings: Arc<MemorySettings>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            users: Arc::new(MemoryUsers::default()),
            drives: Arc::new(MemoryDrives::default()),
            acl: Arc::new(MemoryAcl::default()),
            locks: Arc::new(MemoryLocks::default()),
            shares: Arc::new(MemoryShares::default()),
            file_shares: Arc::new(MemoryFileShares::default()),
            audit: Arc::new(MemoryAudit::default()),
            notifications: Arc::new(MemoryNotifications::default()),
            annotations: Arc::new(MemoryAnnotations::default()),
            settings: Arc::new(MemorySettings::default()),
        }
    }
}

struct UserRecord {
    user: User,
    password_hash: Option<String>,
    smb_hash: Option<String>,
    totp_secret: Option<String>,
    login: LoginState,
}

#[derive(Default)]
pub(crate) struct MemoryUsers {
    inner: Mutex<HashMap<Uuid, UserRecord>>,
}

#[async_trait]
impl UsersRepository for MemoryUsers {
    async fn create(&self, user: &User, password_hash: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.values().any(|r| r.user.username == user.username) {
            return Err(Error::AlreadyExists("username".to_string()));
        }
        inner.insert(
            user.id.to_uuid(),
            UserRecord {
                user: user.clone(),
                password_hash: password_hash.map(str::to_string),
                smb_hash: None,
                totp_secret: None,
                login: LoginState::default(),
            },
        );
        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.inner.lock().get(id.as_uuid()).map(|r| r.user.clone()))
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .lock()
            .values()
            .find(|r| r.user.username == username)
            .map(|r| r.user.clone()))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> =
            self.inner.lock().values().map(|r| r.user.clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn update_profile(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .get_mut(user.id.as_uuid())
            .ok_or_else(|| Error::NotFound("user".to_string()))?;
        record.user.email = user.email.clone();
        record.user.is_admin = user.is_admin;
        record.user.is_active = user.is_active;
        record.user.storage_quota = user.storage_quota;
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        self.inner.lock().remove(id.as_uuid());
        Ok(())
    }

    async fn get_password_hash(&self, id: UserId) -> Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .get(id.as_uuid())
            .and_then(|r| r.password_hash.clone()))
    }

    async fn set_password_hash(&self, id: UserId, hash: &str) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.password_hash = Some(hash.to_string());
        }
        Ok(())
    }

    async fn set_smb_password_hash(&self, id: UserId, hash: &str) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.smb_hash = Some(hash.to_string());
        }
        Ok(())
    }

    async fn get_totp_secret(&self, id: UserId) -> Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .get(id.as_uuid())
            .and_then(|r| r.totp_secret.clone()))
    }

    async fn set_totp(&self, id: UserId, secret: Option<&str>, enabled: bool) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.totp_secret = secret.map(str::to_string);
            record.user.totp_enabled = enabled;
        }
        Ok(())
    }

    async fn get_login_state(&self, id: UserId) -> Result<LoginState> {
        self.inner
            .lock()
            .get(id.as_uuid())
            .map(|r| r.login)
            .ok_or_else(|| Error::NotFound("user".to_string()))
    }

    async fn set_login_state(&self, id: UserId, state: LoginState) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.login = state;
            record.user.failed_login_count = state.failed_count;
            record.user.locked_until = state.locked_until;
        }
        Ok(())
    }

    async fn apply_storage_delta(&self, id: UserId, delta: i64) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.user.storage_used = (record.user.storage_used + delta).max(0);
        }
        Ok(())
    }

    async fn apply_trash_delta(&self, id: UserId, delta: i64) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.user.trash_used = (record.user.trash_used + delta).max(0);
        }
        Ok(())
    }

    async fn set_usage(&self, id: UserId, storage_used: i64, trash_used: i64) -> Result<()> {
        if let Some(record) = self.inner.lock().get_mut(id.as_uuid()) {
            record.user.storage_used = storage_used;
            record.user.trash_used = trash_used;
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryDrives {
    drives: Mutex<HashMap<Uuid, SharedDrive>>,
    members: Mutex<HashMap<(Uuid, Uuid), DriveMembership>>,
}

#[async_trait]
impl DrivesRepository for MemoryDrives {
    async fn create(&self, drive: &SharedDrive) -> Result<()> {
        let mut drives = self.drives.lock();
        if drives.values().any(|d| d.name == drive.name) {
            return Err(Error::AlreadyExists("drive name".to_string()));
        }
        drives.insert(drive.id.to_uuid(), drive.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: DriveId) -> Result<Option<SharedDrive>> {
        Ok(self.drives.lock().get(id.as_uuid()).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<SharedDrive>> {
        Ok(self.drives.lock().values().find(|d| d.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<SharedDrive>> {
        let mut out: Vec<SharedDrive> = self.drives.lock().values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<(SharedDrive, AccessLevel)>> {
        let drives = self.drives.lock();
        let members = self.members.lock();
        let mut out: Vec<(SharedDrive, AccessLevel)> = members
            .values()
            .filter(|m| m.user_id == user)
            .filter_map(|m| {
                drives
                    .get(m.drive_id.as_uuid())
                    .filter(|d| d.is_active)
                    .map(|d| (d.clone(), m.level))
            })
            .collect();
        out.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        Ok(out)
    }

    async fn update(&self, drive: &SharedDrive) -> Result<()> {
        self.drives.lock().insert(drive.id.to_uuid(), drive.clone());
        Ok(())
    }

    async fn delete(&self, id: DriveId) -> Result<()> {
        self.drives.lock().remove(id.as_uuid());
        self.members.lock().retain(|(d, _), _| d != id.as_uuid());
        Ok(())
    }

    async fn add_member(&self, membership: &DriveMembership) -> Result<()> {
        self.members.lock().insert(
            (membership.drive_id.to_uuid(), membership.user_id.to_uuid()),
            membership.clone(),
        );
        Ok(())
    }

    async fn remove_member(&self, drive: DriveId, user: UserId) -> Result<()> {
        self.members.lock().remove(&(drive.to_uuid(), user.to_uuid()));
        Ok(())
    }

    async fn get_membership(
        &self,
        drive: DriveId,
        user: UserId,
    ) -> Result<Option<DriveMembership>> {
        Ok(self
            .members
            .lock()
            .get(&(drive.to_uuid(), user.to_uuid()))
            .cloned())
    }

    async fn list_members(&self, drive: DriveId) -> Result<Vec<DriveMembership>> {
        Ok(self
            .members
            .lock()
            .values()
            .filter(|m| m.drive_id == drive)
            .cloned()
            .collect())
    }

    async fn apply_storage_delta(&self, id: DriveId, delta: i64) -> Result<()> {
        if let Some(drive) = self.drives.lock().get_mut(id.as_uuid()) {
            drive.storage_used = (drive.storage_used + delta).max(0);
        }
        Ok(())
    }

    async fn set_usage(&self, id: DriveId, storage_used: i64) -> Result<()> {
        if let Some(drive) = self.drives.lock().get_mut(id.as_uuid()) {
            drive.storage_used = storage_used;
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryAcl {
    entries: Mutex<Vec<AclEntry>>,
}

#[async_trait]
impl AclRepository for MemoryAcl {
    async fn upsert(&self, entry: &AclEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.retain(|e| {
            !(e.path == entry.path
                && e.entity_type == entry.entity_type
                && e.entity_id == entry.entity_id)
        });
        entries.push(entry.clone());
        Ok(())
    }

    async fn remove(
        &self,
        path: &str,
        entity_type: AclEntityType,
        entity_id: Uuid,
    ) -> Result<()> {
        self.entries.lock().retain(|e| {
            !(e.path == path && e.entity_type == entity_type && e.entity_id == entity_id)
        });
        Ok(())
    }

    async fn list_for_paths(&self, paths: &[String]) -> Result<Vec<AclEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| paths.contains(&e.path))
            .cloned()
            .collect())
    }

    async fn list_public(&self) -> Result<Vec<AclEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.is_public())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryLocks {
    locks: Mutex<HashMap<String, FileLock>>,
}

#[async_trait]
impl LocksRepository for MemoryLocks {
    async fn try_acquire(&self, lock: &FileLock) -> Result<LockAttempt> {
        let mut locks = self.locks.lock();
        let now = Utc::now();
        if let Some(existing) = locks.get(&lock.path) {
            if existing.is_active(now) {
                return Ok(LockAttempt::Held {
                    lock: existing.clone(),
                });
            }
        }
        locks.insert(lock.path.clone(), lock.clone());
        Ok(LockAttempt::Acquired { lock: lock.clone() })
    }

    async fn get(&self, path: &str) -> Result<Option<FileLock>> {
        Ok(self
            .locks
            .lock()
            .get(path)
            .filter(|l| l.is_active(Utc::now()))
            .cloned())
    }

    async fn delete_if_holder(&self, path: &str, holder: UserId) -> Result<bool> {
        let mut locks = self.locks.lock();
        if locks.get(path).is_some_and(|l| l.locked_by == holder) {
            locks.remove(path);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn refresh(
        &self,
        path: &str,
        holder: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut locks = self.locks.lock();
        match locks.get_mut(path) {
            Some(lock) if lock.locked_by == holder && lock.is_active(Utc::now()) => {
                lock.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let mut locks = self.locks.lock();
        let now = Utc::now();
        let before = locks.len();
        locks.retain(|_, l| l.is_active(now));
        Ok((before - locks.len()) as u64)
    }
}

#[derive(Default)]
pub(crate) struct MemoryShares {
    shares: Mutex<HashMap<Uuid, ShareToken>>,
}

#[async_trait]
impl SharesRepository for MemoryShares {
    async fn create(&self, share: &ShareToken) -> Result<()> {
        self.shares.lock().insert(share.id.to_uuid(), share.clone());
        Ok(())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<ShareToken>> {
        Ok(self
            .shares
            .lock()
            .values()
            .find(|s| s.token == token)
            .cloned())
    }

    async fn get_by_id(&self, id: ShareId) -> Result<Option<ShareToken>> {
        Ok(self.shares.lock().get(id.as_uuid()).cloned())
    }

    async fn list_by_creator(&self, user: UserId) -> Result<Vec<ShareToken>> {
        Ok(self
            .shares
            .lock()
            .values()
            .filter(|s| s.created_by == user)
            .cloned()
            .collect())
    }

    async fn update(&self, share: &ShareToken) -> Result<()> {
        self.shares.lock().insert(share.id.to_uuid(), share.clone());
        Ok(())
    }

    async fn delete(&self, id: ShareId) -> Result<()> {
        self.shares.lock().remove(id.as_uuid());
        Ok(())
    }

    async fn consume_access(&self, id: ShareId) -> Result<bool> {
        let mut shares = self.shares.lock();
        let Some(share) = shares.get_mut(id.as_uuid()) else {
            return Ok(false);
        };
        if share.max_access > 0 && share.access_count >= share.max_access {
            return Ok(false);
        }
        share.access_count += 1;
        Ok(true)
    }

    async fn record_upload(&self, id: ShareId, bytes: i64) -> Result<bool> {
        let mut shares = self.shares.lock();
        let Some(share) = shares.get_mut(id.as_uuid()) else {
            return Ok(false);
        };
        if share.max_total_size > 0 && share.total_uploaded_size + bytes > share.max_total_size {
            return Ok(false);
        }
        share.upload_count += 1;
        share.total_uploaded_size += bytes;
        Ok(true)
    }

    async fn list_expiring(&self, within: DateTime<Utc>) -> Result<Vec<ShareToken>> {
        Ok(self
            .shares
            .lock()
            .values()
            .filter(|s| {
                s.is_active
                    && !s.expiration_notified
                    && s.expires_at.is_some_and(|at| at <= within)
            })
            .cloned()
            .collect())
    }

    async fn mark_expiration_notified(&self, id: ShareId) -> Result<()> {
        if let Some(share) = self.shares.lock().get_mut(id.as_uuid()) {
            share.expiration_notified = true;
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryFileShares {
    shares: Mutex<HashMap<Uuid, FileShare>>,
}

#[async_trait]
impl FileSharesRepository for MemoryFileShares {
    async fn upsert(&self, share: &FileShare) -> Result<()> {
        let mut shares = self.shares.lock();
        shares.retain(|_, s| {
            !(s.owner_id == share.owner_id
                && s.shared_with_id == share.shared_with_id
                && s.item_path == share.item_path)
        });
        shares.insert(share.id.to_uuid(), share.clone());
        Ok(())
    }

    async fn get(&self, id: FileShareId) -> Result<Option<FileShare>> {
        Ok(self.shares.lock().get(id.as_uuid()).cloned())
    }

    async fn delete(&self, id: FileShareId) -> Result<()> {
        self.shares.lock().remove(id.as_uuid());
        Ok(())
    }

    async fn list_owned(&self, owner: UserId) -> Result<Vec<FileShare>> {
        Ok(self
            .shares
            .lock()
            .values()
            .filter(|s| s.owner_id == owner)
            .cloned()
            .collect())
    }

    async fn list_received(&self, recipient: UserId) -> Result<Vec<FileShare>> {
        Ok(self
            .shares
            .lock()
            .values()
            .filter(|s| s.shared_with_id == recipient)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditRepository for MemoryAudit {
    async fn insert(&self, event: &NewAuditEvent) -> Result<i64> {
        let mut events = self.events.lock();
        let id = events.len() as i64 + 1;
        events.push(AuditEvent {
            id,
            ts: Utc::now(),
            actor_id: event.actor_id,
            ip_addr: event.ip_addr.clone(),
            event_type: event.event_type.clone(),
            target: event.target.clone(),
            details: event.details.clone(),
        });
        Ok(id)
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let events = self.events.lock();
        let category = query
            .category
            .as_ref()
            .map(|c| format!("{}.", c.trim_end_matches('.')));
        let mut out: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                category
                    .as_ref()
                    .is_none_or(|c| e.event_type.starts_with(c.as_str()))
            })
            .filter(|e| query.actor_id.is_none_or(|a| e.actor_id == Some(a)))
            .filter(|e| query.from.is_none_or(|from| e.ts >= from))
            .filter(|e| query.to.is_none_or(|to| e.ts <= to))
            .filter(|e| {
                query
                    .target_prefix
                    .as_ref()
                    .is_none_or(|p| e.target.starts_with(p.as_str()))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.unwrap_or(100).clamp(1, 500) as usize;
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryNotifications {
    items: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationsRepository for MemoryNotifications {
    async fn insert(&self, notification: &NewNotification) -> Result<i64> {
        let mut items = self.items.lock();
        let id = items.len() as i64 + 1;
        items.push(Notification {
            id,
            user_id: notification.user_id,
            kind: notification.kind.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            link: notification.link.clone(),
            actor_id: notification.actor_id,
            is_read: false,
            created_at: Utc::now(),
            metadata: notification.metadata.clone(),
        });
        Ok(id)
    }

    async fn list_for_user(
        &self,
        user: UserId,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        Ok(self
            .items
            .lock()
            .iter()
            .rev()
            .filter(|n| n.user_id == user && (!unread_only || !n.is_read))
            .take(limit.max(1) as usize)
            .cloned()
            .collect())
    }

    async fn unread_count(&self, user: UserId) -> Result<i64> {
        Ok(self
            .items
            .lock()
            .iter()
            .filter(|n| n.user_id == user && !n.is_read)
            .count() as i64)
    }

    async fn mark_read(&self, user: UserId, id: i64) -> Result<()> {
        for n in self.items.lock().iter_mut() {
            if n.id == id && n.user_id == user {
                n.is_read = true;
            }
        }
        Ok(())
    }

    async fn mark_all_read(&self, user: UserId) -> Result<()> {
        for n in self.items.lock().iter_mut() {
            if n.user_id == user {
                n.is_read = true;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryAnnotations {
    annotations: Mutex<HashMap<(Uuid, String), FileAnnotation>>,
    starred: Mutex<HashMap<Uuid, Vec<String>>>,
}

#[async_trait]
impl AnnotationsRepository for MemoryAnnotations {
    async fn upsert(&self, annotation: &FileAnnotation) -> Result<()> {
        self.annotations.lock().insert(
            (annotation.owner_id.to_uuid(), annotation.path.clone()),
            annotation.clone(),
        );
        Ok(())
    }

    async fn get(&self, owner: UserId, path: &str) -> Result<Option<FileAnnotation>> {
        Ok(self
            .annotations
            .lock()
            .get(&(owner.to_uuid(), path.to_string()))
            .cloned())
    }

    async fn delete(&self, owner: UserId, path: &str) -> Result<()> {
        self.annotations
            .lock()
            .remove(&(owner.to_uuid(), path.to_string()));
        Ok(())
    }

    async fn star(&self, owner: UserId, path: &str) -> Result<()> {
        let mut starred = self.starred.lock();
        let paths = starred.entry(owner.to_uuid()).or_default();
        if !paths.contains(&path.to_string()) {
            paths.push(path.to_string());
        }
        Ok(())
    }

    async fn unstar(&self, owner: UserId, path: &str) -> Result<()> {
        if let Some(paths) = self.starred.lock().get_mut(owner.as_uuid()) {
            paths.retain(|p| p != path);
        }
        Ok(())
    }

    async fn list_starred(&self, owner: UserId) -> Result<Vec<String>> {
        Ok(self
            .starred
            .lock()
            .get(owner.as_uuid())
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct MemorySettings {
    rows: Mutex<HashMap<String, SettingRow>>,
}

#[async_trait]
impl SettingsRepository for MemorySettings {
    async fn load_all(&self) -> Result<Vec<SettingRow>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<SettingRow>> {
        Ok(self.rows.lock().get(key).cloned())
    }

    async fn upsert(&self, key: &str, value: &str, updated_by: Option<UserId>) -> Result<()> {
        self.rows.lock().insert(
            key.to_string(),
            SettingRow {
                key: key.to_string(),
                value: value.to_string(),
                description: None,
                updated_by,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}
