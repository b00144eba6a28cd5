use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skiff_model::{User, UserId};

use crate::error::Result;

/// Login-counter columns read and written by the brute-force guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginState {
    pub failed_count: i32,
    pub last_failed: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn create(&self, user: &User, password_hash: Option<&str>) -> Result<()>;
    async fn get_by_id(&self, id: UserId) -> Result<Option<User>>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list(&self) -> Result<Vec<User>>;
    /// Updates email, admin flag, active flag and quota.
    async fn update_profile(&self, user: &User) -> Result<()>;
    /// Deletes the account; ACLs, shares, memberships and notifications
    /// cascade in the store.
    async fn delete(&self, id: UserId) -> Result<()>;

    async fn get_password_hash(&self, id: UserId) -> Result<Option<String>>;
    async fn set_password_hash(&self, id: UserId, hash: &str) -> Result<()>;
    async fn set_smb_password_hash(&self, id: UserId, hash: &str) -> Result<()>;

    /// The stored TOTP secret, whether or not 2FA is enabled yet.
    async fn get_totp_secret(&self, id: UserId) -> Result<Option<String>>;
    async fn set_totp(&self, id: UserId, secret: Option<&str>, enabled: bool) -> Result<()>;

    async fn get_login_state(&self, id: UserId) -> Result<LoginState>;
    async fn set_login_state(&self, id: UserId, state: LoginState) -> Result<()>;

    /// Applies a signed byte delta to `storage_used` atomically.
    async fn apply_storage_delta(&self, id: UserId, delta: i64) -> Result<()>;
    /// Applies a signed byte delta to `trash_used` atomically.
    async fn apply_trash_delta(&self, id: UserId, delta: i64) -> Result<()>;
    /// Overwrites both counters; used by reconciliation only.
    async fn set_usage(&self, id: UserId, storage_used: i64, trash_used: i64) -> Result<()>;
}
