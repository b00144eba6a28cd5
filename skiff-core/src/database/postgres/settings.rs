use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::PgPool;

use skiff_model::{SettingRow, UserId};

use super::col;
use crate::database::map_db_err;
use crate::database::ports::settings::SettingsRepository;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct PostgresSettingsRepository {
    pool: PgPool,
}

impl PostgresSettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<SettingRow> {
        let updated_by: Option<uuid::Uuid> = col(row, "updated_by")?;
        Ok(SettingRow {
            key: col(row, "key")?,
            value: col(row, "value")?,
            description: col(row, "description")?,
            updated_by: updated_by.map(UserId),
            updated_at: col(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl SettingsRepository for PostgresSettingsRepository {
    async fn load_all(&self) -> Result<Vec<SettingRow>> {
        let rows = sqlx::query(
            "SELECT key, value, description, updated_by, updated_at FROM system_settings",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("load settings", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn get(&self, key: &str) -> Result<Option<SettingRow>> {
        let row = sqlx::query(
            "SELECT key, value, description, updated_by, updated_at FROM system_settings \
             WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("load setting", e))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn upsert(&self, key: &str, value: &str, updated_by: Option<UserId>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_by, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by,
                          updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_by.map(|u| u.to_uuid()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("upsert setting", e))?;
        Ok(())
    }
}
