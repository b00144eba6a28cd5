//! Append-only audit recording.
//!
//! Writes are best-effort: a failed insert never fails the operation that
//! produced the event. The failure itself is logged in-process as
//! `meta.audit_dropped` (log-only, to avoid recursing into the store).

use std::sync::Arc;

use skiff_model::{AuditEvent, AuditQuery, NewAuditEvent};
use tracing::{error, warn};

use crate::database::ports::AuditRepository;
use crate::error::Result;

pub struct AuditRecorder {
    repo: Arc<dyn AuditRepository>,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder").finish()
    }
}

impl AuditRecorder {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    /// Persists one event, swallowing failures.
    pub async fn record(&self, event: NewAuditEvent) {
        if let Err(err) = self.repo.insert(&event).await {
            error!(
                event_type = "meta.audit_dropped",
                dropped = %event.event_type,
                target = %event.target,
                "failed to persist audit event: {err}"
            );
        }
    }

    /// Fire-and-forget variant for paths that must not await the store.
    pub fn record_detached(self: &Arc<Self>, event: NewAuditEvent) {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            recorder.record(event).await;
        });
    }

    pub async fn query(&self, mut query: AuditQuery) -> Result<Vec<AuditEvent>> {
        if let Some(limit) = query.limit {
            if limit > 500 {
                warn!("audit query limit {limit} clamped to 500");
                query.limit = Some(500);
            }
        }
        self.repo.query(&query).await
    }
}
