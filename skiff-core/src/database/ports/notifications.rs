use async_trait::async_trait;
use skiff_model::{NewNotification, Notification, UserId};

use crate::error::Result;

#[async_trait]
pub trait NotificationsRepository: Send + Sync {
    async fn insert(&self, notification: &NewNotification) -> Result<i64>;
    async fn list_for_user(
        &self,
        user: UserId,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>>;
    async fn unread_count(&self, user: UserId) -> Result<i64>;
    async fn mark_read(&self, user: UserId, id: i64) -> Result<()>;
    async fn mark_all_read(&self, user: UserId) -> Result<()>;
}
