use async_trait::async_trait;
use skiff_model::{FileAnnotation, UserId};

use crate::error::Result;

/// Per-user annotations (description/tags) and stars on virtual paths.
/// Entries are weak references to paths: they may dangle after a move or
/// delete and are swept lazily.
#[async_trait]
pub trait AnnotationsRepository: Send + Sync {
    async fn upsert(&self, annotation: &FileAnnotation) -> Result<()>;
    async fn get(&self, owner: UserId, path: &str) -> Result<Option<FileAnnotation>>;
    async fn delete(&self, owner: UserId, path: &str) -> Result<()>;

    async fn star(&self, owner: UserId, path: &str) -> Result<()>;
    async fn unstar(&self, owner: UserId, path: &str) -> Result<()>;
    async fn list_starred(&self, owner: UserId) -> Result<Vec<String>>;
}
