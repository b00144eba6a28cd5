use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skiff_model::{ShareId, ShareToken, UserId};

use crate::error::Result;

#[async_trait]
pub trait SharesRepository: Send + Sync {
    async fn create(&self, share: &ShareToken) -> Result<()>;
    async fn get_by_token(&self, token: &str) -> Result<Option<ShareToken>>;
    async fn get_by_id(&self, id: ShareId) -> Result<Option<ShareToken>>;
    async fn list_by_creator(&self, user: UserId) -> Result<Vec<ShareToken>>;
    async fn update(&self, share: &ShareToken) -> Result<()>;
    async fn delete(&self, id: ShareId) -> Result<()>;

    /// Atomic `access_count` increment with cap check; returns `false` when
    /// the cap is already exhausted (no increment happens then).
    async fn consume_access(&self, id: ShareId) -> Result<bool>;

    /// Atomic upload accounting: bumps `upload_count` and
    /// `total_uploaded_size` iff the cumulative cap allows another `bytes`.
    async fn record_upload(&self, id: ShareId, bytes: i64) -> Result<bool>;

    /// Active, not-yet-notified shares expiring at or before `within`.
    async fn list_expiring(&self, within: DateTime<Utc>) -> Result<Vec<ShareToken>>;
    async fn mark_expiration_notified(&self, id: ShareId) -> Result<()>;
}
