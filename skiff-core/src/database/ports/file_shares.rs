use async_trait::async_trait;
use skiff_model::{FileShare, FileShareId, UserId};

use crate::error::Result;

#[async_trait]
pub trait FileSharesRepository: Send + Sync {
    /// Upsert keyed by `(owner, recipient, path)`.
    async fn upsert(&self, share: &FileShare) -> Result<()>;
    async fn get(&self, id: FileShareId) -> Result<Option<FileShare>>;
    async fn delete(&self, id: FileShareId) -> Result<()>;
    async fn list_owned(&self, owner: UserId) -> Result<Vec<FileShare>>;
    async fn list_received(&self, recipient: UserId) -> Result<Vec<FileShare>>;
}
