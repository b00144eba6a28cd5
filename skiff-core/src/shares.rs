//! Public share links: opaque-token issuance, gated access, accounting,
//! and the expiry notifier.

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Deserialize;
use skiff_model::{
    audit::event, NewAuditEvent, NewNotification, ShareId, ShareToken, ShareType, User, UserId,
};
use tracing::info;

use crate::audit::AuditRecorder;
use crate::auth::password;
use crate::database::ports::{NotificationsRepository, SharesRepository, UsersRepository};
use crate::error::{Error, Result};
use crate::paths::{PathResolver, Resolved};

/// Request payload for creating a link.
#[derive(Debug, Clone, Deserialize)]
pub struct NewShare {
    pub path: String,
    pub share_type: ShareType,
    pub expires_at: Option<DateTime<Utc>>,
    pub password: Option<String>,
    #[serde(default)]
    pub max_access: i64,
    #[serde(default)]
    pub require_login: bool,
    #[serde(default)]
    pub max_file_size: i64,
    pub allowed_extensions: Option<Vec<String>>,
    #[serde(default)]
    pub max_total_size: i64,
}

/// A share that passed every gate, with the path resolved through its
/// creator's view of the tree.
#[derive(Debug, Clone)]
pub struct ResolvedShare {
    pub share: ShareToken,
    pub creator: User,
    pub real: PathBuf,
    pub resolved: Resolved,
}

pub struct ShareService {
    shares: Arc<dyn SharesRepository>,
    users: Arc<dyn UsersRepository>,
    notifications: Arc<dyn NotificationsRepository>,
    resolver: Arc<PathResolver>,
    audit: Arc<AuditRecorder>,
}

impl std::fmt::Debug for ShareService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareService").finish()
    }
}

/// 32 random bytes, URL-safe encoded: the token IS the credential.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl ShareService {
    pub fn new(
        shares: Arc<dyn SharesRepository>,
        users: Arc<dyn UsersRepository>,
        notifications: Arc<dyn NotificationsRepository>,
        resolver: Arc<PathResolver>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            shares,
            users,
            notifications,
            resolver,
            audit,
        }
    }

    pub async fn create(&self, creator: &User, req: NewShare) -> Result<ShareToken> {
        // The path must at least resolve in the creator's view.
        let resolved = self
            .resolver
            .resolve_for_user(&req.path, &creator.username)?;

        let password_hash = req
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(password::hash_password)
            .transpose()?;

        let share = ShareToken {
            id: ShareId::new(),
            token: generate_token(),
            path: resolved.canonical.clone(),
            created_by: creator.id,
            expires_at: req.expires_at,
            password_hash,
            access_count: 0,
            max_access: req.max_access.max(0),
            is_active: true,
            require_login: req.require_login,
            share_type: req.share_type,
            max_file_size: req.max_file_size.max(0),
            allowed_extensions: req.allowed_extensions,
            upload_count: 0,
            max_total_size: req.max_total_size.max(0),
            total_uploaded_size: 0,
            expiration_notified: false,
            created_at: Utc::now(),
        };
        self.shares.create(&share).await?;
        self.audit
            .record(
                NewAuditEvent::new(event::SHARE_CREATED, &share.path)
                    .actor(creator.id)
                    .details(serde_json::json!({
                        "share_id": share.id,
                        "share_type": share.share_type.as_str(),
                    })),
            )
            .await;
        Ok(share)
    }

    pub async fn list_mine(&self, user: UserId) -> Result<Vec<ShareToken>> {
        self.shares.list_by_creator(user).await
    }

    pub async fn get_owned(&self, user: &User, id: ShareId) -> Result<ShareToken> {
        let share = self
            .shares
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("share {id}")))?;
        if share.created_by != user.id && !user.is_admin {
            return Err(Error::Forbidden("not the share owner".to_string()));
        }
        Ok(share)
    }

    pub async fn update(&self, user: &User, share: ShareToken) -> Result<()> {
        // Ownership check against the stored row, not the payload.
        self.get_owned(user, share.id).await?;
        self.shares.update(&share).await
    }

    pub async fn revoke(&self, user: &User, id: ShareId) -> Result<()> {
        let mut share = self.get_owned(user, id).await?;
        share.is_active = false;
        self.shares.update(&share).await?;
        self.audit
            .record(NewAuditEvent::new(event::SHARE_REVOKED, &share.path).actor(user.id))
            .await;
        Ok(())
    }

    pub async fn delete(&self, user: &User, id: ShareId) -> Result<()> {
        let share = self.get_owned(user, id).await?;
        self.shares.delete(share.id).await
    }

    /// Gates one access through the full failure ladder, increments the
    /// access counter atomically, and resolves the target as the creator.
    pub async fn resolve_access(
        &self,
        token: &str,
        provided_password: Option<&str>,
        principal: Option<&User>,
    ) -> Result<ResolvedShare> {
        let share = self
            .shares
            .get_by_token(token)
            .await?
            .ok_or_else(|| Error::NotFound("share".to_string()))?;

        if !share.is_active {
            return Err(Error::ShareRevoked);
        }
        if share.is_expired(Utc::now()) {
            return Err(Error::TokenExpired);
        }
        if let Some(hash) = &share.password_hash {
            match provided_password {
                None => return Err(Error::PasswordRequired),
                Some(candidate) if !password::verify_password(candidate, hash) => {
                    return Err(Error::PasswordWrong);
                }
                Some(_) => {}
            }
        }
        if share.require_login && principal.is_none() {
            return Err(Error::LoginRequired);
        }
        if !self.shares.consume_access(share.id).await? {
            return Err(Error::AccessLimitReached);
        }

        let creator = self
            .users
            .get_by_id(share.created_by)
            .await?
            .ok_or_else(|| Error::NotFound("share creator".to_string()))?;
        let resolved = self
            .resolver
            .resolve_for_user(&share.path, &creator.username)?;

        self.audit
            .record(
                NewAuditEvent::new(event::SHARE_ACCESSED, &share.path)
                    .actor(creator.id)
                    .details(serde_json::json!({ "share_id": share.id })),
            )
            .await;

        Ok(ResolvedShare {
            real: resolved.real.clone(),
            resolved,
            share,
            creator,
        })
    }

    /// Charges one upload of `bytes` against an upload share's cumulative
    /// cap.
    pub async fn charge_upload(&self, share: &ShareToken, bytes: i64) -> Result<()> {
        if share.share_type != ShareType::Upload {
            return Err(Error::Forbidden("not an upload share".to_string()));
        }
        if !self.shares.record_upload(share.id, bytes).await? {
            return Err(Error::QuotaExceeded(format!(
                "share upload limit of {} bytes reached",
                share.max_total_size
            )));
        }
        Ok(())
    }

    /// Hourly scan: links expiring within a day notify their creator once.
    pub async fn notify_expiring(&self) -> Result<u64> {
        let within = Utc::now() + Duration::hours(24);
        let mut notified = 0u64;
        for share in self.shares.list_expiring(within).await? {
            self.notifications
                .insert(
                    &NewNotification::new(share.created_by, "share_expiring", "Share link expiring")
                        .message(format!("Your share link for {} expires soon", share.path))
                        .link(format!("/shares/{}", share.id)),
                )
                .await?;
            self.shares.mark_expiration_notified(share.id).await?;
            notified += 1;
        }
        if notified > 0 {
            info!("notified creators of {notified} expiring share links");
        }
        Ok(notified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDb;

    fn alice() -> User {
        User {
            id: UserId::new(),
            username: "alice".to_string(),
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
        }
    }

    fn service(db: &MemoryDb) -> ShareService {
        ShareService::new(
            db.shares.clone(),
            db.users.clone(),
            db.notifications.clone(),
            Arc::new(PathResolver::new("/data")),
            Arc::new(AuditRecorder::new(db.audit.clone())),
        )
    }

    fn download_request(path: &str) -> NewShare {
        NewShare {
            path: path.to_string(),
            share_type: ShareType::Download,
            expires_at: None,
            password: None,
            max_access: 0,
            require_login: false,
            max_file_size: 0,
            allowed_extensions: None,
            max_total_size: 0,
        }
    }

    #[tokio::test]
    async fn tokens_are_long_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.len() >= 42);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn access_limit_is_enforced_exactly() {
        let db = MemoryDb::new();
        let alice = alice();
        db.users.create(&alice, None).await.unwrap();
        let service = service(&db);

        let mut req = download_request("/home/docs/report.pdf");
        req.max_access = 3;
        let share = service.create(&alice, req).await.unwrap();

        for _ in 0..3 {
            service
                .resolve_access(&share.token, None, None)
                .await
                .unwrap();
        }
        let err = service
            .resolve_access(&share.token, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "access-limit-reached");

        let stored = db.shares.get_by_id(share.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 3);
    }

    #[tokio::test]
    async fn failure_ladder_is_ordered() {
        let db = MemoryDb::new();
        let alice = alice();
        db.users.create(&alice, None).await.unwrap();
        let service = service(&db);

        assert_eq!(
            service
                .resolve_access("missing-token", None, None)
                .await
                .unwrap_err()
                .kind(),
            "not-found"
        );

        let mut req = download_request("/home/docs/a");
        req.password = Some("pw".to_string());
        req.require_login = true;
        let share = service.create(&alice, req).await.unwrap();

        // Revoked wins over everything after existence.
        service.revoke(&alice, share.id).await.unwrap();
        assert_eq!(
            service
                .resolve_access(&share.token, None, None)
                .await
                .unwrap_err()
                .kind(),
            "revoked"
        );

        let mut reactivated = db.shares.get_by_id(share.id).await.unwrap().unwrap();
        reactivated.is_active = true;
        db.shares.update(&reactivated).await.unwrap();

        assert_eq!(
            service
                .resolve_access(&share.token, None, None)
                .await
                .unwrap_err()
                .kind(),
            "password-required"
        );
        assert_eq!(
            service
                .resolve_access(&share.token, Some("wrong"), None)
                .await
                .unwrap_err()
                .kind(),
            "password-wrong"
        );
        assert_eq!(
            service
                .resolve_access(&share.token, Some("pw"), None)
                .await
                .unwrap_err()
                .kind(),
            "login-required"
        );
        let resolved = service
            .resolve_access(&share.token, Some("pw"), Some(&alice))
            .await
            .unwrap();
        assert_eq!(resolved.resolved.canonical, "/home/docs/a");
        assert!(resolved.real.ends_with("users/alice/docs/a"));
    }

    #[tokio::test]
    async fn expired_share_rejects() {
        let db = MemoryDb::new();
        let alice = alice();
        db.users.create(&alice, None).await.unwrap();
        let service = service(&db);

        let mut req = download_request("/home/x");
        req.expires_at = Some(Utc::now() - Duration::hours(1));
        let share = service.create(&alice, req).await.unwrap();
        assert_eq!(
            service
                .resolve_access(&share.token, None, None)
                .await
                .unwrap_err()
                .kind(),
            "token-expired"
        );
    }

    #[tokio::test]
    async fn expiry_scan_notifies_once() {
        let db = MemoryDb::new();
        let alice = alice();
        db.users.create(&alice, None).await.unwrap();
        let service = service(&db);

        let mut req = download_request("/home/x");
        req.expires_at = Some(Utc::now() + Duration::hours(2));
        service.create(&alice, req).await.unwrap();

        assert_eq!(service.notify_expiring().await.unwrap(), 1);
        assert_eq!(service.notify_expiring().await.unwrap(), 0);
        assert_eq!(db.notifications.unread_count(alice.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upload_cumulative_cap() {
        let db = MemoryDb::new();
        let alice = alice();
        db.users.create(&alice, None).await.unwrap();
        let service = service(&db);

        let mut req = download_request("/home/inbox");
        req.share_type = ShareType::Upload;
        req.max_total_size = 100;
        let share = service.create(&alice, req).await.unwrap();

        service.charge_upload(&share, 60).await.unwrap();
        service.charge_upload(&share, 40).await.unwrap();
        let err = service.charge_upload(&share, 1).await.unwrap_err();
        assert_eq!(err.kind(), "quota-exceeded");
    }
}
