use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use skiff_model::{AuditEvent, AuditQuery, NewAuditEvent, UserId};

use super::col;
use crate::database::ports::audit::AuditRepository;
use crate::database::{map_db_err, retry};
use crate::error::Result;

/// Hard cap on one page of audit results.
pub const MAX_AUDIT_PAGE: i64 = 500;

#[derive(Clone, Debug)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<AuditEvent> {
        let actor: Option<uuid::Uuid> = col(row, "actor_id")?;
        Ok(AuditEvent {
            id: col(row, "id")?,
            ts: col(row, "ts")?,
            actor_id: actor.map(UserId),
            ip_addr: col(row, "ip_addr")?,
            event_type: col(row, "event_type")?,
            target: col(row, "target_resource")?,
            details: col(row, "details")?,
        })
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn insert(&self, event: &NewAuditEvent) -> Result<i64> {
        let pool = &self.pool;
        let row = retry("insert audit event", || async move {
            sqlx::query(
                r#"
                INSERT INTO audit_logs (actor_id, ip_addr, event_type, target_resource, details)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(event.actor_id.map(|a| a.to_uuid()))
            .bind(&event.ip_addr)
            .bind(&event.event_type)
            .bind(&event.target)
            .bind(&event.details)
            .fetch_one(pool)
            .await
        })
        .await?;
        row.try_get("id")
            .map_err(|e| map_db_err("read audit id", e))
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let limit = query.limit.unwrap_or(100).clamp(1, MAX_AUDIT_PAGE);
        let offset = query.offset.unwrap_or(0).max(0);
        let category = query.category.as_ref().map(|c| format!("{}.%", c.trim_end_matches('.')));
        let target_prefix = query.target_prefix.as_ref().map(|p| format!("{p}%"));

        let rows = sqlx::query(
            r#"
            SELECT id, ts, actor_id, ip_addr, event_type, target_resource, details
            FROM audit_logs
            WHERE ($1::text IS NULL OR event_type LIKE $1)
              AND ($2::uuid IS NULL OR actor_id = $2)
              AND ($3::timestamptz IS NULL OR ts >= $3)
              AND ($4::timestamptz IS NULL OR ts <= $4)
              AND ($5::text IS NULL OR target_resource LIKE $5)
            ORDER BY id DESC
            OFFSET $6 LIMIT $7
            "#,
        )
        .bind(category)
        .bind(query.actor_id.map(|a| a.to_uuid()))
        .bind(query.from)
        .bind(query.to)
        .bind(target_prefix)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("query audit log", e))?;
        rows.iter().map(Self::map_row).collect()
    }
}
