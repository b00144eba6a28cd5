use async_trait::async_trait;
use sqlx::PgPool;

use skiff_model::{FileAnnotation, UserId};

use super::col;
use crate::database::map_db_err;
use crate::database::ports::annotations::AnnotationsRepository;
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct PostgresAnnotationsRepository {
    pool: PgPool,
}

impl PostgresAnnotationsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnnotationsRepository for PostgresAnnotationsRepository {
    async fn upsert(&self, annotation: &FileAnnotation) -> Result<()> {
        let tags = serde_json::to_value(&annotation.tags)?;
        sqlx::query(
            r#"
            INSERT INTO file_metadata (user_id, file_path, description, tags)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, file_path)
            DO UPDATE SET description = EXCLUDED.description, tags = EXCLUDED.tags
            "#,
        )
        .bind(annotation.owner_id.to_uuid())
        .bind(&annotation.path)
        .bind(&annotation.description)
        .bind(tags)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("upsert annotation", e))?;
        Ok(())
    }

    async fn get(&self, owner: UserId, path: &str) -> Result<Option<FileAnnotation>> {
        let row = sqlx::query(
            "SELECT description, tags FROM file_metadata WHERE user_id = $1 AND file_path = $2",
        )
        .bind(owner.to_uuid())
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("load annotation", e))?;
        row.map(|row| {
            let tags: serde_json::Value = col(&row, "tags")?;
            let tags = serde_json::from_value(tags)
                .map_err(|e| Error::Database(format!("tags: {e}")))?;
            Ok(FileAnnotation {
                owner_id: owner,
                path: path.to_string(),
                description: col(&row, "description")?,
                tags,
            })
        })
        .transpose()
    }

    async fn delete(&self, owner: UserId, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_metadata WHERE user_id = $1 AND file_path = $2")
            .bind(owner.to_uuid())
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete annotation", e))?;
        Ok(())
    }

    async fn star(&self, owner: UserId, path: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO starred_files (user_id, file_path)
            VALUES ($1, $2)
            ON CONFLICT (user_id, file_path) DO NOTHING
            "#,
        )
        .bind(owner.to_uuid())
        .bind(path)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("star path", e))?;
        Ok(())
    }

    async fn unstar(&self, owner: UserId, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM starred_files WHERE user_id = $1 AND file_path = $2")
            .bind(owner.to_uuid())
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("unstar path", e))?;
        Ok(())
    }

    async fn list_starred(&self, owner: UserId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT file_path FROM starred_files WHERE user_id = $1 ORDER BY file_path",
        )
        .bind(owner.to_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list starred", e))?;
        rows.iter().map(|row| col(row, "file_path")).collect()
    }
}
