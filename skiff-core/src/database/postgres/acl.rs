use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use uuid::Uuid;

use skiff_model::{AccessLevel, AclEntityType, AclEntry, PUBLIC_ENTITY_ID};

use super::col;
use crate::database::ports::acl::AclRepository;
use crate::database::{map_db_err, retry};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct PostgresAclRepository {
    pool: PgPool,
}

impl PostgresAclRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<AclEntry> {
        let entity_type: String = col(row, "entity_type")?;
        let entity_type = AclEntityType::parse(&entity_type)
            .ok_or_else(|| Error::Database(format!("unknown acl entity type: {entity_type}")))?;
        Ok(AclEntry {
            path: col(row, "path")?,
            entity_type,
            entity_id: col(row, "entity_id")?,
            level: AccessLevel::from_i16(col(row, "permission_level")?),
        })
    }
}

#[async_trait]
impl AclRepository for PostgresAclRepository {
    async fn upsert(&self, entry: &AclEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO acl (path, entity_type, entity_id, permission_level)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (path, entity_type, entity_id)
            DO UPDATE SET permission_level = EXCLUDED.permission_level
            "#,
        )
        .bind(&entry.path)
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(entry.level.as_i16())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("upsert acl entry", e))?;
        Ok(())
    }

    async fn remove(
        &self,
        path: &str,
        entity_type: AclEntityType,
        entity_id: Uuid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM acl WHERE path = $1 AND entity_type = $2 AND entity_id = $3")
            .bind(path)
            .bind(entity_type.as_str())
            .bind(entity_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("remove acl entry", e))?;
        Ok(())
    }

    async fn list_for_paths(&self, paths: &[String]) -> Result<Vec<AclEntry>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let pool = &self.pool;
        let rows = retry("list acl for paths", || async move {
            sqlx::query(
                "SELECT path, entity_type, entity_id, permission_level FROM acl \
                 WHERE path = ANY($1)",
            )
            .bind(paths)
            .fetch_all(pool)
            .await
        })
        .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_public(&self) -> Result<Vec<AclEntry>> {
        let rows = sqlx::query(
            "SELECT path, entity_type, entity_id, permission_level FROM acl \
             WHERE entity_type = 'group' AND entity_id = $1",
        )
        .bind(PUBLIC_ENTITY_ID)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list public acl", e))?;
        rows.iter().map(Self::map_row).collect()
    }
}
