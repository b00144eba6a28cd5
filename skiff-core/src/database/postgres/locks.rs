use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::PgPool;

use skiff_model::{FileLock, LockAttempt, UserId};

use super::col;
use crate::database::ports::locks::LocksRepository;
use crate::database::{map_db_err, retry};
use crate::error::{Error, Result};

const LOCK_COLUMNS: &str = "path, locked_by, acquired_at, expires_at, lock_type, reason";

#[derive(Clone, Debug)]
pub struct PostgresLocksRepository {
    pool: PgPool,
}

impl PostgresLocksRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<FileLock> {
        Ok(FileLock {
            path: col(row, "path")?,
            locked_by: UserId(col(row, "locked_by")?),
            acquired_at: col(row, "acquired_at")?,
            expires_at: col(row, "expires_at")?,
            lock_type: col(row, "lock_type")?,
            reason: col(row, "reason")?,
        })
    }
}

#[async_trait]
impl LocksRepository for PostgresLocksRepository {
    async fn try_acquire(&self, lock: &FileLock) -> Result<LockAttempt> {
        let pool = &self.pool;
        retry("acquire lock", || async move {
            let mut tx = pool.begin().await?;

            // Expired rows count as absent; clearing them here keeps the
            // insert-if-absent below a single conflict-free statement.
            sqlx::query("DELETE FROM file_locks WHERE path = $1 AND expires_at <= now()")
                .bind(&lock.path)
                .execute(&mut *tx)
                .await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO file_locks (path, locked_by, acquired_at, expires_at, lock_type, reason)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (path) DO NOTHING
                "#,
            )
            .bind(&lock.path)
            .bind(lock.locked_by.to_uuid())
            .bind(lock.acquired_at)
            .bind(lock.expires_at)
            .bind(&lock.lock_type)
            .bind(&lock.reason)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let attempt = if inserted == 1 {
                None
            } else {
                let row = sqlx::query(&format!(
                    "SELECT {LOCK_COLUMNS} FROM file_locks WHERE path = $1"
                ))
                .bind(&lock.path)
                .fetch_optional(&mut *tx)
                .await?;
                Some(row)
            };

            tx.commit().await?;
            Ok(attempt)
        })
        .await
        .and_then(|existing| match existing {
            None => Ok(LockAttempt::Acquired { lock: lock.clone() }),
            Some(Some(row)) => Ok(LockAttempt::Held {
                lock: Self::map_row(&row)?,
            }),
            // The conflicting row vanished between statements; the caller
            // simply retries.
            Some(None) => Err(Error::Conflict("lock state changed, retry".to_string())),
        })
    }

    async fn get(&self, path: &str) -> Result<Option<FileLock>> {
        let row = sqlx::query(&format!(
            "SELECT {LOCK_COLUMNS} FROM file_locks WHERE path = $1 AND expires_at > now()"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("load lock", e))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn delete_if_holder(&self, path: &str, holder: UserId) -> Result<bool> {
        let pool = &self.pool;
        let affected = retry("release lock", || async move {
            sqlx::query("DELETE FROM file_locks WHERE path = $1 AND locked_by = $2")
                .bind(path)
                .bind(holder.to_uuid())
                .execute(pool)
                .await
                .map(|r| r.rows_affected())
        })
        .await?;
        Ok(affected == 1)
    }

    async fn refresh(
        &self,
        path: &str,
        holder: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE file_locks SET expires_at = $3
            WHERE path = $1 AND locked_by = $2 AND expires_at > now()
            "#,
        )
        .bind(path)
        .bind(holder.to_uuid())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("refresh lock", e))?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let pool = &self.pool;
        retry("sweep expired locks", || async move {
            sqlx::query("DELETE FROM file_locks WHERE expires_at <= now()")
                .execute(pool)
                .await
                .map(|r| r.rows_affected())
        })
        .await
    }
}
