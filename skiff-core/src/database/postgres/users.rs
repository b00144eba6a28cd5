use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use tracing::info;

use skiff_model::{User, UserId};

use super::col;
use crate::database::ports::users::{LoginState, UsersRepository};
use crate::database::{map_db_err, retry};
use crate::error::Result;

const USER_COLUMNS: &str = "id, username, email, is_admin, is_active, storage_quota, \
     storage_used, trash_used, totp_enabled, failed_login_count, locked_until, \
     created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PostgresUsersRepository {
    pool: PgPool,
}

impl PostgresUsersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<User> {
        Ok(User {
            id: UserId(col(row, "id")?),
            username: col(row, "username")?,
            email: col(row, "email")?,
            is_admin: col(row, "is_admin")?,
            is_active: col(row, "is_active")?,
            storage_quota: col(row, "storage_quota")?,
            storage_used: col(row, "storage_used")?,
            trash_used: col(row, "trash_used")?,
            totp_enabled: col(row, "totp_enabled")?,
            failed_login_count: col(row, "failed_login_count")?,
            locked_until: col(row, "locked_until")?,
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl UsersRepository for PostgresUsersRepository {
    async fn create(&self, user: &User, password_hash: Option<&str>) -> Result<()> {
        let pool = &self.pool;
        retry("create user", || async move {
            sqlx::query(
                r#"
                INSERT INTO users (
                    id, username, email, password_hash, is_admin, is_active,
                    storage_quota, storage_used, trash_used, totp_enabled,
                    failed_login_count, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(user.id.to_uuid())
            .bind(&user.username)
            .bind(&user.email)
            .bind(password_hash)
            .bind(user.is_admin)
            .bind(user.is_active)
            .bind(user.storage_quota)
            .bind(user.storage_used)
            .bind(user.trash_used)
            .bind(user.totp_enabled)
            .bind(user.failed_login_count)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(pool)
            .await
        })
        .await?;

        info!("created user: {} ({})", user.username, user.id);
        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        let pool = &self.pool;
        let row = retry("load user by id", || async move {
            sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id.to_uuid())
                .fetch_optional(pool)
                .await
        })
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let pool = &self.pool;
        let row = retry("load user by username", || async move {
            sqlx::query(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
            ))
            .bind(username)
            .fetch_optional(pool)
            .await
        })
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list users", e))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn update_profile(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, is_admin = $3, is_active = $4, storage_quota = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id.to_uuid())
        .bind(&user.email)
        .bind(user.is_admin)
        .bind(user.is_active)
        .bind(user.storage_quota)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update user", e))?;
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.to_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete user", e))?;
        info!("deleted user: {id}");
        Ok(())
    }

    async fn get_password_hash(&self, id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE id = $1")
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("load password hash", e))?;
        row.as_ref()
            .map(|r| col::<Option<String>>(r, "password_hash"))
            .transpose()
            .map(|v| v.flatten())
    }

    async fn set_password_hash(&self, id: UserId, hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id.to_uuid())
            .bind(hash)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("set password hash", e))?;
        Ok(())
    }

    async fn set_smb_password_hash(&self, id: UserId, hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET smb_password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id.to_uuid())
            .bind(hash)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("set smb password hash", e))?;
        Ok(())
    }

    async fn get_totp_secret(&self, id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT totp_secret FROM users WHERE id = $1")
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("load totp secret", e))?;
        row.as_ref()
            .map(|r| col::<Option<String>>(r, "totp_secret"))
            .transpose()
            .map(|v| v.flatten())
    }

    async fn set_totp(&self, id: UserId, secret: Option<&str>, enabled: bool) -> Result<()> {
        sqlx::query(
            "UPDATE users SET totp_secret = $2, totp_enabled = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.to_uuid())
        .bind(secret)
        .bind(enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("set totp", e))?;
        Ok(())
    }

    async fn get_login_state(&self, id: UserId) -> Result<LoginState> {
        let row = sqlx::query(
            "SELECT failed_login_count, last_failed_login, locked_until FROM users WHERE id = $1",
        )
        .bind(id.to_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("load login state", e))?;
        Ok(LoginState {
            failed_count: col(&row, "failed_login_count")?,
            last_failed: col(&row, "last_failed_login")?,
            locked_until: col(&row, "locked_until")?,
        })
    }

    async fn set_login_state(&self, id: UserId, state: LoginState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_count = $2, last_failed_login = $3, locked_until = $4
            WHERE id = $1
            "#,
        )
        .bind(id.to_uuid())
        .bind(state.failed_count)
        .bind(state.last_failed)
        .bind(state.locked_until)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("set login state", e))?;
        Ok(())
    }

    async fn apply_storage_delta(&self, id: UserId, delta: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET storage_used = GREATEST(storage_used + $2, 0) WHERE id = $1",
        )
        .bind(id.to_uuid())
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("apply storage delta", e))?;
        Ok(())
    }

    async fn apply_trash_delta(&self, id: UserId, delta: i64) -> Result<()> {
        sqlx::query("UPDATE users SET trash_used = GREATEST(trash_used + $2, 0) WHERE id = $1")
            .bind(id.to_uuid())
            .bind(delta)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("apply trash delta", e))?;
        Ok(())
    }

    async fn set_usage(&self, id: UserId, storage_used: i64, trash_used: i64) -> Result<()> {
        sqlx::query("UPDATE users SET storage_used = $2, trash_used = $3 WHERE id = $1")
            .bind(id.to_uuid())
            .bind(storage_used)
            .bind(trash_used)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("set usage", e))?;
        Ok(())
    }
}
