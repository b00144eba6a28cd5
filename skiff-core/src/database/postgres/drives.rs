use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use tracing::info;

use skiff_model::{AccessLevel, DriveId, DriveMembership, SharedDrive, UserId};

use super::col;
use crate::database::ports::drives::DrivesRepository;
use crate::database::{map_db_err, retry};
use crate::error::Result;

const DRIVE_COLUMNS: &str =
    "id, name, storage_quota, storage_used, is_active, created_by, created_at";

#[derive(Clone, Debug)]
pub struct PostgresDrivesRepository {
    pool: PgPool,
}

impl PostgresDrivesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<SharedDrive> {
        Ok(SharedDrive {
            id: DriveId(col(row, "id")?),
            name: col(row, "name")?,
            storage_quota: col(row, "storage_quota")?,
            storage_used: col(row, "storage_used")?,
            is_active: col(row, "is_active")?,
            created_by: UserId(col(row, "created_by")?),
            created_at: col(row, "created_at")?,
        })
    }
}

#[async_trait]
impl DrivesRepository for PostgresDrivesRepository {
    async fn create(&self, drive: &SharedDrive) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shared_folders (
                id, name, storage_quota, storage_used, is_active, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(drive.id.to_uuid())
        .bind(&drive.name)
        .bind(drive.storage_quota)
        .bind(drive.storage_used)
        .bind(drive.is_active)
        .bind(drive.created_by.to_uuid())
        .bind(drive.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("create drive", e))?;
        info!("created shared drive: {} ({})", drive.name, drive.id);
        Ok(())
    }

    async fn get_by_id(&self, id: DriveId) -> Result<Option<SharedDrive>> {
        let row = sqlx::query(&format!(
            "SELECT {DRIVE_COLUMNS} FROM shared_folders WHERE id = $1"
        ))
        .bind(id.to_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("load drive", e))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<SharedDrive>> {
        let row = sqlx::query(&format!(
            "SELECT {DRIVE_COLUMNS} FROM shared_folders WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("load drive by name", e))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self) -> Result<Vec<SharedDrive>> {
        let rows = sqlx::query(&format!(
            "SELECT {DRIVE_COLUMNS} FROM shared_folders ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list drives", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<(SharedDrive, AccessLevel)>> {
        let pool = &self.pool;
        let rows = retry("list drives for user", || async move {
            sqlx::query(
                r#"
                SELECT f.id, f.name, f.storage_quota, f.storage_used, f.is_active,
                       f.created_by, f.created_at, m.permission_level
                FROM shared_folders f
                JOIN shared_folder_members m ON m.drive_id = f.id
                WHERE m.user_id = $1 AND f.is_active = TRUE
                ORDER BY f.name
                "#,
            )
            .bind(user.to_uuid())
            .fetch_all(pool)
            .await
        })
        .await?;
        rows.iter()
            .map(|row| {
                let drive = Self::map_row(row)?;
                let level = AccessLevel::from_i16(col(row, "permission_level")?);
                Ok((drive, level))
            })
            .collect()
    }

    async fn update(&self, drive: &SharedDrive) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shared_folders
            SET name = $2, storage_quota = $3, is_active = $4
            WHERE id = $1
            "#,
        )
        .bind(drive.id.to_uuid())
        .bind(&drive.name)
        .bind(drive.storage_quota)
        .bind(drive.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update drive", e))?;
        Ok(())
    }

    async fn delete(&self, id: DriveId) -> Result<()> {
        sqlx::query("DELETE FROM shared_folders WHERE id = $1")
            .bind(id.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete drive", e))?;
        Ok(())
    }

    async fn add_member(&self, membership: &DriveMembership) -> Result<()> {
        let pool = &self.pool;
        retry("add drive member", || async move {
            sqlx::query(
                r#"
                INSERT INTO shared_folder_members (drive_id, user_id, permission_level)
                VALUES ($1, $2, $3)
                ON CONFLICT (drive_id, user_id)
                DO UPDATE SET permission_level = EXCLUDED.permission_level
                "#,
            )
            .bind(membership.drive_id.to_uuid())
            .bind(membership.user_id.to_uuid())
            .bind(membership.level.as_i16())
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn remove_member(&self, drive: DriveId, user: UserId) -> Result<()> {
        sqlx::query("DELETE FROM shared_folder_members WHERE drive_id = $1 AND user_id = $2")
            .bind(drive.to_uuid())
            .bind(user.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("remove drive member", e))?;
        Ok(())
    }

    async fn get_membership(
        &self,
        drive: DriveId,
        user: UserId,
    ) -> Result<Option<DriveMembership>> {
        let row = sqlx::query(
            r#"
            SELECT drive_id, user_id, permission_level
            FROM shared_folder_members
            WHERE drive_id = $1 AND user_id = $2
            "#,
        )
        .bind(drive.to_uuid())
        .bind(user.to_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("load membership", e))?;
        row.map(|row| {
            Ok(DriveMembership {
                drive_id: DriveId(col(&row, "drive_id")?),
                user_id: UserId(col(&row, "user_id")?),
                level: AccessLevel::from_i16(col(&row, "permission_level")?),
            })
        })
        .transpose()
    }

    async fn list_members(&self, drive: DriveId) -> Result<Vec<DriveMembership>> {
        let rows = sqlx::query(
            r#"
            SELECT drive_id, user_id, permission_level
            FROM shared_folder_members
            WHERE drive_id = $1
            "#,
        )
        .bind(drive.to_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list members", e))?;
        rows.into_iter()
            .map(|row| {
                Ok(DriveMembership {
                    drive_id: DriveId(col(&row, "drive_id")?),
                    user_id: UserId(col(&row, "user_id")?),
                    level: AccessLevel::from_i16(col(&row, "permission_level")?),
                })
            })
            .collect()
    }

    async fn apply_storage_delta(&self, id: DriveId, delta: i64) -> Result<()> {
        sqlx::query(
            "UPDATE shared_folders SET storage_used = GREATEST(storage_used + $2, 0) WHERE id = $1",
        )
        .bind(id.to_uuid())
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("apply drive storage delta", e))?;
        Ok(())
    }

    async fn set_usage(&self, id: DriveId, storage_used: i64) -> Result<()> {
        sqlx::query("UPDATE shared_folders SET storage_used = $2 WHERE id = $1")
            .bind(id.to_uuid())
            .bind(storage_used)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("set drive usage", e))?;
        Ok(())
    }
}
