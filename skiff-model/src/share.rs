use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::AccessLevel;
use crate::ids::{FileShareId, ShareId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    Download,
    Upload,
    Edit,
}

impl ShareType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareType::Download => "download",
            ShareType::Upload => "upload",
            ShareType::Edit => "edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "download" => Some(ShareType::Download),
            "upload" => Some(ShareType::Upload),
            "edit" => Some(ShareType::Edit),
            _ => None,
        }
    }
}

/// A public link granting bounded access to one path without authentication.
///
/// The `token` is the URL-safe credential; everything else is policy.
/// Zero means "unlimited" for `max_access`, `max_file_size` and
/// `max_total_size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareToken {
    pub id: ShareId,
    pub token: String,
    pub path: String,
    pub created_by: UserId,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub access_count: i64,
    pub max_access: i64,
    pub is_active: bool,
    pub require_login: bool,
    pub share_type: ShareType,
    pub max_file_size: i64,
    pub allowed_extensions: Option<Vec<String>>,
    pub upload_count: i64,
    pub max_total_size: i64,
    pub total_uploaded_size: i64,
    pub expiration_notified: bool,
    pub created_at: DateTime<Utc>,
}

impl ShareToken {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn access_exhausted(&self) -> bool {
        self.max_access > 0 && self.access_count >= self.max_access
    }

    /// Extension whitelist check for upload shares; a missing list allows
    /// everything. Comparison is case-insensitive on the final extension.
    pub fn extension_allowed(&self, filename: &str) -> bool {
        let Some(allowed) = &self.allowed_extensions else {
            return true;
        };
        if allowed.is_empty() {
            return true;
        }
        let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        allowed.iter().any(|a| a.trim_start_matches('.').to_lowercase() == ext)
    }
}

/// Direct user-to-user share of one item, unique per
/// `(owner, recipient, path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileShare {
    pub id: FileShareId,
    pub owner_id: UserId,
    pub shared_with_id: UserId,
    pub item_path: String,
    pub item_name: String,
    pub is_folder: bool,
    pub level: AccessLevel,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(max_access: i64, access_count: i64) -> ShareToken {
        ShareToken {
            id: ShareId::new(),
            token: "t".into(),
            path: "/home/docs".into(),
            created_by: UserId::new(),
            expires_at: None,
            password_hash: None,
            access_count,
            max_access,
            is_active: true,
            require_login: false,
            share_type: ShareType::Download,
            max_file_size: 0,
            allowed_extensions: None,
            upload_count: 0,
            max_total_size: 0,
            total_uploaded_size: 0,
            expiration_notified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn zero_max_access_never_exhausts() {
        assert!(!share(0, 1_000_000).access_exhausted());
        assert!(share(3, 3).access_exhausted());
        assert!(!share(3, 2).access_exhausted());
    }

    #[test]
    fn extension_whitelist_is_case_insensitive() {
        let mut s = share(0, 0);
        s.allowed_extensions = Some(vec!["pdf".into(), ".PNG".into()]);
        assert!(s.extension_allowed("report.PDF"));
        assert!(s.extension_allowed("pic.png"));
        assert!(!s.extension_allowed("run.exe"));
    }
}
