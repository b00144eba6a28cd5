//! Periodic maintenance loops: lock sweeping, quota reconciliation, trash
//! retention, share-expiry notification, and SMB log ingestion.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{error, info};

use crate::infra::app_state::AppState;

const LOCK_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const TRASH_REAP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const SHARE_EXPIRY_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SMB_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Watcher events older than this give up waiting for an SMB record.
const SMB_PENDING_MAX_AGE: ChronoDuration = ChronoDuration::seconds(60);

const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const REAP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub fn spawn_all(state: &AppState) {
    spawn_loop("lock-sweep", LOCK_SWEEP_INTERVAL, state.clone(), |state| async move {
        state.locks.sweep_expired().await.map(|_| ())
    });

    spawn_loop(
        "quota-reconcile",
        RECONCILE_INTERVAL,
        state.clone(),
        |state| async move {
            tokio::time::timeout(RECONCILE_TIMEOUT, async {
                state.quota.reconcile(&state.resolver).await?;
                // Staging files beyond a day will never finalise.
                state
                    .uploads
                    .sweep_orphans(ChronoDuration::hours(24))
                    .await?;
                Ok(())
            })
            .await
            .map_err(|_| skiff_core::Error::DeadlineExceeded)?
        },
    );

    spawn_loop("trash-reap", TRASH_REAP_INTERVAL, state.clone(), |state| async move {
        let settings = state.settings.current().await;
        tokio::time::timeout(
            REAP_TIMEOUT,
            state.trash.reap(settings.trash_retention_days.max(1)),
        )
        .await
        .map_err(|_| skiff_core::Error::DeadlineExceeded)?
        .map(|_| ())
    });

    spawn_loop(
        "share-expiry",
        SHARE_EXPIRY_INTERVAL,
        state.clone(),
        |state| async move { state.shares.notify_expiring().await.map(|_| ()) },
    );

    spawn_loop("smb-sync", SMB_SYNC_INTERVAL, state.clone(), |state| async move {
        state.correlator.sync().await?;
        state.correlator.flush_stale(SMB_PENDING_MAX_AGE).await;
        Ok(())
    });

    info!("background jobs scheduled");
}

fn spawn_loop<F, Fut>(name: &'static str, interval: Duration, state: AppState, job: F)
where
    F: Fn(AppState) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = skiff_core::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = job(state.clone()).await {
                error!("{name} job failed: {err}");
            }
        }
    });
}
