//! Postgres-backed implementations of the repository ports.
//!
//! Queries use the runtime API with explicit row mapping so builds do not
//! need a live database. Single-statement counter updates rely on row-level
//! locking in Postgres for serialisation; multi-statement mutations open an
//! explicit transaction.

mod acl;
mod annotations;
mod audit;
mod drives;
mod file_shares;
mod locks;
mod notifications;
mod settings;
mod shares;
mod users;

pub use acl::PostgresAclRepository;
pub use annotations::PostgresAnnotationsRepository;
pub use audit::PostgresAuditRepository;
pub use drives::PostgresDrivesRepository;
pub use file_shares::PostgresFileSharesRepository;
pub use locks::PostgresLocksRepository;
pub use notifications::PostgresNotificationsRepository;
pub use settings::PostgresSettingsRepository;
pub use shares::PostgresSharesRepository;
pub use users::PostgresUsersRepository;

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::{Error, Result};

/// Column accessor with a readable error instead of a bare sqlx message.
pub(crate) fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| Error::Database(format!("column {name}: {e}")))
}
