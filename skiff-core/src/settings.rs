//! Cached accessor over the string-keyed settings table. Reads serve a 30 s
//! snapshot; writes go straight through and refresh the snapshot so the new
//! value is visible immediately on this node.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use skiff_model::{SettingRow, Settings, UserId};

use crate::database::ports::SettingsRepository;
use crate::error::Result;

const SNAPSHOT_TTL: Duration = Duration::from_secs(30);

pub struct SettingsCache {
    repo: Arc<dyn SettingsRepository>,
    /// `None` until the first successful load.
    snapshot: RwLock<(Settings, Option<Instant>)>,
}

impl std::fmt::Debug for SettingsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsCache").finish()
    }
}

impl SettingsCache {
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self {
            repo,
            snapshot: RwLock::new((Settings::default(), None)),
        }
    }

    /// Current settings, at most 30 s stale. Falls back to the last good
    /// snapshot when the store is unreachable.
    pub async fn current(&self) -> Settings {
        {
            let guard = self.snapshot.read();
            if guard.1.is_some_and(|at| at.elapsed() < SNAPSHOT_TTL) {
                return guard.0.clone();
            }
        }
        match self.refresh().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!("settings refresh failed, serving stale snapshot: {err}");
                self.snapshot.read().0.clone()
            }
        }
    }

    pub async fn refresh(&self) -> Result<Settings> {
        let rows = self.repo.load_all().await?;
        let settings = Settings::from_rows(&rows);
        *self.snapshot.write() = (settings.clone(), Some(Instant::now()));
        Ok(settings)
    }

    pub async fn rows(&self) -> Result<Vec<SettingRow>> {
        self.repo.load_all().await
    }

    pub async fn update(&self, key: &str, value: &str, updated_by: Option<UserId>) -> Result<Settings> {
        self.repo.upsert(key, value, updated_by).await?;
        self.refresh().await
    }
}
