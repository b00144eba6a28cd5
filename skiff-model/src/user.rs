use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::ids::UserId;

/// A platform account. Password and TOTP secrets live in the same table but
/// are never carried on this struct so it can be serialized straight into
/// API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    /// Quota in bytes; 0 means unlimited.
    pub storage_quota: i64,
    pub storage_used: i64,
    pub trash_used: i64,
    pub totp_enabled: bool,
    #[serde(skip_serializing)]
    pub failed_login_count: i32,
    #[serde(skip_serializing)]
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Remaining quota headroom, or `None` when the account is unlimited.
    pub fn quota_headroom(&self) -> Option<i64> {
        if self.storage_quota == 0 {
            None
        } else {
            Some((self.storage_quota - self.storage_used).max(0))
        }
    }
}

/// Admin- or provisioning-supplied payload for account creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub storage_quota: Option<i64>,
}

/// Usernames are 3-50 chars from `[A-Za-z0-9_-]`; they double as the home
/// directory name on disk, so the charset is deliberately narrow.
pub fn validate_username(username: &str) -> Result<()> {
    if username.len() < 3 || username.len() > 50 {
        return Err(ModelError::InvalidUsername(format!(
            "length must be 3-50, got {}",
            username.len()
        )));
    }
    if let Some(bad) = username
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
    {
        return Err(ModelError::InvalidUsername(format!(
            "character {bad:?} is not allowed"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Second step of a login that answered `requires_2fa`.
#[derive(Debug, Clone, Deserialize)]
pub struct TotpLoginRequest {
    pub user_id: UserId,
    pub code: String,
}

/// JWT claims carried by bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_charset_enforced() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a-b_c9").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"x".repeat(51)).is_err());
        assert!(validate_username("alice/../bob").is_err());
        assert!(validate_username("alice bob").is_err());
    }

    #[test]
    fn locked_until_in_past_is_not_locked() {
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            username: "alice".into(),
            email: None,
            is_admin: false,
            is_active: true,
            storage_quota: 0,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: Some(now - chrono::Duration::seconds(1)),
            created_at: now,
            updated_at: now,
        };
        assert!(!user.is_locked(now));
    }
}
