use async_trait::async_trait;
use skiff_model::{AuditEvent, AuditQuery, NewAuditEvent};

use crate::error::Result;

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends one event, returning its monotonic id. The table is
    /// append-only; there is deliberately no update or delete.
    async fn insert(&self, event: &NewAuditEvent) -> Result<i64>;
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>>;
}
