use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use tracing::info;

use skiff_model::{ShareId, ShareToken, ShareType, UserId};

use super::col;
use crate::database::ports::shares::SharesRepository;
use crate::database::{map_db_err, retry};
use crate::error::{Error, Result};

const SHARE_COLUMNS: &str = "id, token, path, created_by, expires_at, password_hash, \
     access_count, max_access, is_active, require_login, share_type, max_file_size, \
     allowed_extensions, upload_count, max_total_size, total_uploaded_size, \
     expiration_notified, created_at";

#[derive(Clone, Debug)]
pub struct PostgresSharesRepository {
    pool: PgPool,
}

impl PostgresSharesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<ShareToken> {
        let share_type: String = col(row, "share_type")?;
        let share_type = ShareType::parse(&share_type)
            .ok_or_else(|| Error::Database(format!("unknown share type: {share_type}")))?;
        let allowed_extensions: Option<serde_json::Value> = col(row, "allowed_extensions")?;
        let allowed_extensions = allowed_extensions
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Database(format!("allowed_extensions: {e}")))?;
        Ok(ShareToken {
            id: ShareId(col(row, "id")?),
            token: col(row, "token")?,
            path: col(row, "path")?,
            created_by: UserId(col(row, "created_by")?),
            expires_at: col(row, "expires_at")?,
            password_hash: col(row, "password_hash")?,
            access_count: col(row, "access_count")?,
            max_access: col(row, "max_access")?,
            is_active: col(row, "is_active")?,
            require_login: col(row, "require_login")?,
            share_type,
            max_file_size: col(row, "max_file_size")?,
            allowed_extensions,
            upload_count: col(row, "upload_count")?,
            max_total_size: col(row, "max_total_size")?,
            total_uploaded_size: col(row, "total_uploaded_size")?,
            expiration_notified: col(row, "expiration_notified")?,
            created_at: col(row, "created_at")?,
        })
    }
}

#[async_trait]
impl SharesRepository for PostgresSharesRepository {
    async fn create(&self, share: &ShareToken) -> Result<()> {
        let extensions = share
            .allowed_extensions
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let pool = &self.pool;
        let extensions = &extensions;
        retry("create share", || async move {
            sqlx::query(
                r#"
                INSERT INTO shares (
                    id, token, path, created_by, expires_at, password_hash,
                    access_count, max_access, is_active, require_login, share_type,
                    max_file_size, allowed_extensions, upload_count, max_total_size,
                    total_uploaded_size, expiration_notified, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                        $15, $16, $17, $18)
                "#,
            )
            .bind(share.id.to_uuid())
            .bind(&share.token)
            .bind(&share.path)
            .bind(share.created_by.to_uuid())
            .bind(share.expires_at)
            .bind(&share.password_hash)
            .bind(share.access_count)
            .bind(share.max_access)
            .bind(share.is_active)
            .bind(share.require_login)
            .bind(share.share_type.as_str())
            .bind(share.max_file_size)
            .bind(extensions)
            .bind(share.upload_count)
            .bind(share.max_total_size)
            .bind(share.total_uploaded_size)
            .bind(share.expiration_notified)
            .bind(share.created_at)
            .execute(pool)
            .await
        })
        .await?;
        info!("created {} share {} for {}", share.share_type.as_str(), share.id, share.path);
        Ok(())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<ShareToken>> {
        let pool = &self.pool;
        let row = retry("load share by token", || async move {
            sqlx::query(&format!("SELECT {SHARE_COLUMNS} FROM shares WHERE token = $1"))
                .bind(token)
                .fetch_optional(pool)
                .await
        })
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_by_id(&self, id: ShareId) -> Result<Option<ShareToken>> {
        let row = sqlx::query(&format!("SELECT {SHARE_COLUMNS} FROM shares WHERE id = $1"))
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("load share", e))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_by_creator(&self, user: UserId) -> Result<Vec<ShareToken>> {
        let rows = sqlx::query(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE created_by = $1 ORDER BY created_at DESC"
        ))
        .bind(user.to_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list shares", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn update(&self, share: &ShareToken) -> Result<()> {
        let extensions = share
            .allowed_extensions
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            UPDATE shares
            SET expires_at = $2, password_hash = $3, max_access = $4, is_active = $5,
                require_login = $6, max_file_size = $7, allowed_extensions = $8,
                max_total_size = $9, expiration_notified = $10
            WHERE id = $1
            "#,
        )
        .bind(share.id.to_uuid())
        .bind(share.expires_at)
        .bind(&share.password_hash)
        .bind(share.max_access)
        .bind(share.is_active)
        .bind(share.require_login)
        .bind(share.max_file_size)
        .bind(extensions)
        .bind(share.max_total_size)
        .bind(share.expiration_notified)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update share", e))?;
        Ok(())
    }

    async fn delete(&self, id: ShareId) -> Result<()> {
        sqlx::query("DELETE FROM shares WHERE id = $1")
            .bind(id.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete share", e))?;
        Ok(())
    }

    async fn consume_access(&self, id: ShareId) -> Result<bool> {
        let pool = &self.pool;
        let affected = retry("consume share access", || async move {
            sqlx::query(
                r#"
                UPDATE shares SET access_count = access_count + 1
                WHERE id = $1 AND (max_access = 0 OR access_count < max_access)
                "#,
            )
            .bind(id.to_uuid())
            .execute(pool)
            .await
            .map(|r| r.rows_affected())
        })
        .await?;
        Ok(affected == 1)
    }

    async fn record_upload(&self, id: ShareId, bytes: i64) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE shares
            SET upload_count = upload_count + 1,
                total_uploaded_size = total_uploaded_size + $2
            WHERE id = $1
              AND (max_total_size = 0 OR total_uploaded_size + $2 <= max_total_size)
            "#,
        )
        .bind(id.to_uuid())
        .bind(bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("record share upload", e))?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn list_expiring(&self, within: DateTime<Utc>) -> Result<Vec<ShareToken>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SHARE_COLUMNS} FROM shares
            WHERE is_active = TRUE
              AND expiration_notified = FALSE
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            "#
        ))
        .bind(within)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list expiring shares", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn mark_expiration_notified(&self, id: ShareId) -> Result<()> {
        sqlx::query("UPDATE shares SET expiration_notified = TRUE WHERE id = $1")
            .bind(id.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("mark expiration notified", e))?;
        Ok(())
    }
}
