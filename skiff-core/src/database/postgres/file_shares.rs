use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::PgPool;

use skiff_model::{AccessLevel, FileShare, FileShareId, UserId};

use super::col;
use crate::database::map_db_err;
use crate::database::ports::file_shares::FileSharesRepository;
use crate::error::Result;

const COLUMNS: &str = "id, owner_id, shared_with_id, item_path, item_name, is_folder, \
     permission_level, message, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PostgresFileSharesRepository {
    pool: PgPool,
}

impl PostgresFileSharesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<FileShare> {
        Ok(FileShare {
            id: FileShareId(col(row, "id")?),
            owner_id: UserId(col(row, "owner_id")?),
            shared_with_id: UserId(col(row, "shared_with_id")?),
            item_path: col(row, "item_path")?,
            item_name: col(row, "item_name")?,
            is_folder: col(row, "is_folder")?,
            level: AccessLevel::from_i16(col(row, "permission_level")?),
            message: col(row, "message")?,
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl FileSharesRepository for PostgresFileSharesRepository {
    async fn upsert(&self, share: &FileShare) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_shares (
                id, owner_id, shared_with_id, item_path, item_name, is_folder,
                permission_level, message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (owner_id, shared_with_id, item_path)
            DO UPDATE SET permission_level = EXCLUDED.permission_level,
                          message = EXCLUDED.message,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(share.id.to_uuid())
        .bind(share.owner_id.to_uuid())
        .bind(share.shared_with_id.to_uuid())
        .bind(&share.item_path)
        .bind(&share.item_name)
        .bind(share.is_folder)
        .bind(share.level.as_i16())
        .bind(&share.message)
        .bind(share.created_at)
        .bind(share.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("upsert file share", e))?;
        Ok(())
    }

    async fn get(&self, id: FileShareId) -> Result<Option<FileShare>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM file_shares WHERE id = $1"))
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("load file share", e))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn delete(&self, id: FileShareId) -> Result<()> {
        sqlx::query("DELETE FROM file_shares WHERE id = $1")
            .bind(id.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete file share", e))?;
        Ok(())
    }

    async fn list_owned(&self, owner: UserId) -> Result<Vec<FileShare>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM file_shares WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner.to_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list owned file shares", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_received(&self, recipient: UserId) -> Result<Vec<FileShare>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM file_shares WHERE shared_with_id = $1 ORDER BY created_at DESC"
        ))
        .bind(recipient.to_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list received file shares", e))?;
        rows.iter().map(Self::map_row).collect()
    }
}
