use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Dotted event type names used across the platform. Kept as constants so
/// emit sites and query filters cannot drift apart.
pub mod event {
    pub const FILE_UPLOAD: &str = "file.upload";
    pub const FILE_DOWNLOAD: &str = "file.download";
    pub const FILE_WRITE: &str = "file.write";
    pub const FILE_DELETE: &str = "file.delete";
    pub const FILE_RENAME: &str = "file.rename";
    pub const FILE_MOVE: &str = "file.move";
    pub const FILE_COPY: &str = "file.copy";
    pub const FILE_CHANGED: &str = "file.changed";
    pub const FILE_TRASH: &str = "file.trash";
    pub const FILE_RESTORE: &str = "file.restore";

    pub const USER_LOGIN: &str = "user.login";
    pub const USER_LOGIN_FAILED: &str = "user.login_failed";
    pub const USER_LOGOUT: &str = "user.logout";
    pub const USER_CREATED: &str = "user.created";
    pub const USER_DELETED: &str = "user.deleted";

    pub const ADMIN_SETTINGS_UPDATED: &str = "admin.settings_updated";
    pub const ADMIN_DRIVE_CREATED: &str = "admin.drive_created";
    pub const ADMIN_DRIVE_DELETED: &str = "admin.drive_deleted";
    pub const ADMIN_MEMBERSHIP_CHANGED: &str = "admin.membership_changed";

    pub const SHARE_CREATED: &str = "share.created";
    pub const SHARE_REVOKED: &str = "share.revoked";
    pub const SHARE_ACCESSED: &str = "share.accessed";
    pub const SHARE_UPLOAD: &str = "share.upload";
    pub const SHARE_EDIT: &str = "share.edit";

    pub const SECURITY_ACCOUNT_LOCKED: &str = "security.account_locked";
    pub const SECURITY_ACCOUNT_UNLOCKED: &str = "security.account_unlocked";
    pub const SECURITY_IP_LOCKED: &str = "security.ip_locked";
    pub const SECURITY_ACCESS_DENIED: &str = "security.access_denied";
    pub const SECURITY_LOCK_BYPASSED: &str = "security.lock_bypassed";
    pub const SECURITY_QUOTA_DRIFT: &str = "security.quota_drift";

    pub const SMB_CREATE: &str = "smb.create";
    pub const SMB_WRITE: &str = "smb.write";
    pub const SMB_DELETE: &str = "smb.delete";
    pub const SMB_RENAME: &str = "smb.rename";
}

/// One immutable row of the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub actor_id: Option<UserId>,
    pub ip_addr: Option<String>,
    pub event_type: String,
    pub target: String,
    pub details: serde_json::Value,
}

/// Event payload before it has been assigned an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub actor_id: Option<UserId>,
    pub ip_addr: Option<String>,
    pub event_type: String,
    pub target: String,
    pub details: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(event_type: &str, target: impl Into<String>) -> Self {
        Self {
            actor_id: None,
            ip_addr: None,
            event_type: event_type.to_string(),
            target: target.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn actor(mut self, actor: UserId) -> Self {
        self.actor_id = Some(actor);
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip_addr = ip;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Query filters for the audit log read side. `limit` is clamped to 500 by
/// the recorder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    /// Dotted category prefix, e.g. `file` or `security`.
    pub category: Option<String>,
    pub actor_id: Option<UserId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub target_prefix: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}
