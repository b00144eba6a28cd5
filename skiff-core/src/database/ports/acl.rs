use async_trait::async_trait;
use skiff_model::{AclEntityType, AclEntry};
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait AclRepository: Send + Sync {
    async fn upsert(&self, entry: &AclEntry) -> Result<()>;
    async fn remove(
        &self,
        path: &str,
        entity_type: AclEntityType,
        entity_id: Uuid,
    ) -> Result<()>;
    /// Entries whose path is exactly one of `paths`. Callers pass the
    /// ancestor chain of a target so the nearest entry can win.
    async fn list_for_paths(&self, paths: &[String]) -> Result<Vec<AclEntry>>;
    /// All public (group, nil-entity) entries; used to index drives visible
    /// without authentication.
    async fn list_public(&self) -> Result<Vec<AclEntry>>;
}
