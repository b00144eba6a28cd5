use async_trait::async_trait;
use skiff_model::{SettingRow, UserId};

use crate::error::Result;

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<SettingRow>>;
    async fn get(&self, key: &str) -> Result<Option<SettingRow>>;
    async fn upsert(&self, key: &str, value: &str, updated_by: Option<UserId>) -> Result<()>;
}
