use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use skiff_model::{NewNotification, Notification, UserId};

use super::col;
use crate::database::map_db_err;
use crate::database::ports::notifications::NotificationsRepository;
use crate::error::Result;

const COLUMNS: &str =
    "id, user_id, type, title, message, link, actor_id, is_read, created_at, metadata";

#[derive(Clone, Debug)]
pub struct PostgresNotificationsRepository {
    pool: PgPool,
}

impl PostgresNotificationsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Notification> {
        let actor: Option<uuid::Uuid> = col(row, "actor_id")?;
        Ok(Notification {
            id: col(row, "id")?,
            user_id: UserId(col(row, "user_id")?),
            kind: col(row, "type")?,
            title: col(row, "title")?,
            message: col(row, "message")?,
            link: col(row, "link")?,
            actor_id: actor.map(UserId),
            is_read: col(row, "is_read")?,
            created_at: col(row, "created_at")?,
            metadata: col(row, "metadata")?,
        })
    }
}

#[async_trait]
impl NotificationsRepository for PostgresNotificationsRepository {
    async fn insert(&self, notification: &NewNotification) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, type, title, message, link, actor_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(notification.user_id.to_uuid())
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.link)
        .bind(notification.actor_id.map(|a| a.to_uuid()))
        .bind(&notification.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("insert notification", e))?;
        row.try_get("id")
            .map_err(|e| map_db_err("read notification id", e))
    }

    async fn list_for_user(
        &self,
        user: UserId,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM notifications
            WHERE user_id = $1 AND ($2 = FALSE OR is_read = FALSE)
            ORDER BY id DESC
            LIMIT $3
            "#
        ))
        .bind(user.to_uuid())
        .bind(unread_only)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list notifications", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn unread_count(&self, user: UserId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS unread FROM notifications WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user.to_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("count unread notifications", e))?;
        col(&row, "unread")
    }

    async fn mark_read(&self, user: UserId, id: i64) -> Result<()> {
        sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND id = $2")
            .bind(user.to_uuid())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("mark notification read", e))?;
        Ok(())
    }

    async fn mark_all_read(&self, user: UserId) -> Result<()> {
        sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1")
            .bind(user.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("mark all notifications read", e))?;
        Ok(())
    }
}
