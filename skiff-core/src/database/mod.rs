//! Metadata store: repository ports plus their Postgres implementations.
//!
//! The store is the single serialisation point for permission and quota
//! state. All reads/writes are strongly consistent on one node; callers
//! retry transient failures through [`retry`], and a persistent outage
//! surfaces as the `storage-unavailable` error kind.

pub mod ports;
pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::{Error, Result};
use ports::{
    AclRepository, AnnotationsRepository, AuditRepository, DrivesRepository,
    FileSharesRepository, LocksRepository, NotificationsRepository, SettingsRepository,
    SharesRepository, UsersRepository,
};
use postgres::{
    PostgresAclRepository, PostgresAnnotationsRepository, PostgresAuditRepository,
    PostgresDrivesRepository, PostgresFileSharesRepository, PostgresLocksRepository,
    PostgresNotificationsRepository, PostgresSettingsRepository, PostgresSharesRepository,
    PostgresUsersRepository,
};

/// Backoff schedule for transient failures, per attempt.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(150),
    Duration::from_millis(500),
];

/// Runs `op` up to three times with 50/150/500 ms backoff on transient
/// errors (pool exhaustion, broken connections). Non-transient database
/// errors surface immediately.
pub async fn retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut last = None;
    for (attempt, backoff) in RETRY_BACKOFF.iter().enumerate() {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                warn!(
                    "transient store failure during {what} (attempt {}): {err}",
                    attempt + 1
                );
                last = Some(err);
                tokio::time::sleep(*backoff).await;
            }
            Err(err) => return Err(map_db_err(what, err)),
        }
    }
    Err(Error::StorageUnavailable(format!(
        "{what}: {}",
        last.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

pub(crate) fn map_db_err(what: &str, err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::NotFound(what.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            Error::StorageUnavailable(format!("{what}: {err}"))
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::AlreadyExists(what.to_string())
        }
        _ => Error::Database(format!("{what}: {err}")),
    }
}

/// Facade owning the pool and one repository per aggregate. Fields are trait
/// objects so engines can be exercised against in-memory fakes.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    pub users: Arc<dyn UsersRepository>,
    pub drives: Arc<dyn DrivesRepository>,
    pub acl: Arc<dyn AclRepository>,
    pub locks: Arc<dyn LocksRepository>,
    pub shares: Arc<dyn SharesRepository>,
    pub file_shares: Arc<dyn FileSharesRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub notifications: Arc<dyn NotificationsRepository>,
    pub annotations: Arc<dyn AnnotationsRepository>,
    pub settings: Arc<dyn SettingsRepository>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl Database {
    /// Connects, runs migrations, and builds the repository set.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("connect: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Database(format!("migrate: {e}")))?;

        info!("metadata store ready");
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PostgresUsersRepository::new(pool.clone())),
            drives: Arc::new(PostgresDrivesRepository::new(pool.clone())),
            acl: Arc::new(PostgresAclRepository::new(pool.clone())),
            locks: Arc::new(PostgresLocksRepository::new(pool.clone())),
            shares: Arc::new(PostgresSharesRepository::new(pool.clone())),
            file_shares: Arc::new(PostgresFileSharesRepository::new(pool.clone())),
            audit: Arc::new(PostgresAuditRepository::new(pool.clone())),
            notifications: Arc::new(PostgresNotificationsRepository::new(pool.clone())),
            annotations: Arc::new(PostgresAnnotationsRepository::new(pool.clone())),
            settings: Arc::new(PostgresSettingsRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
