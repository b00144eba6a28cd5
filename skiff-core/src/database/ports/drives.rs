use async_trait::async_trait;
use skiff_model::{AccessLevel, DriveId, DriveMembership, SharedDrive, UserId};

use crate::error::Result;

#[async_trait]
pub trait DrivesRepository: Send + Sync {
    async fn create(&self, drive: &SharedDrive) -> Result<()>;
    async fn get_by_id(&self, id: DriveId) -> Result<Option<SharedDrive>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<SharedDrive>>;
    async fn list(&self) -> Result<Vec<SharedDrive>>;
    /// Drives the user is a member of, with their membership level.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<(SharedDrive, AccessLevel)>>;
    async fn update(&self, drive: &SharedDrive) -> Result<()>;
    async fn delete(&self, id: DriveId) -> Result<()>;

    /// Upserts a membership row; `(drive, user)` is unique.
    async fn add_member(&self, membership: &DriveMembership) -> Result<()>;
    async fn remove_member(&self, drive: DriveId, user: UserId) -> Result<()>;
    async fn get_membership(&self, drive: DriveId, user: UserId)
        -> Result<Option<DriveMembership>>;
    async fn list_members(&self, drive: DriveId) -> Result<Vec<DriveMembership>>;

    async fn apply_storage_delta(&self, id: DriveId, delta: i64) -> Result<()>;
    async fn set_usage(&self, id: DriveId, storage_used: i64) -> Result<()>;
}
