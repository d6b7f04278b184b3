//! Top-level lifecycle: the queue, the tiering ticker, and the backup
//! retry ticker, started and stopped as one unit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jobs::queue::{Enqueuer, JobQueue};
use crate::jobs::types::{JobPayload, ObjectBackupPayload};
use crate::repo::{AssetRepository, BackupRepository};
use crate::tiering::TieringSweep;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval between tiering demotion sweeps.
    pub tier_sweep_interval: Duration,
    /// Interval between backup retry passes.
    pub backup_retry_interval: Duration,
    /// Uploads claimed longer ago than this are presumed dead.
    pub backup_stuck_age: Duration,
    /// Retryable backups re-enqueued per pass.
    pub backup_retry_batch: i64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tier_sweep_interval: Duration::from_secs(3600),
            backup_retry_interval: Duration::from_secs(300),
            backup_stuck_age: Duration::from_secs(1800),
            backup_retry_batch: 50,
        }
    }
}

/// Periodic recovery of off-site backups: frees claims abandoned by
/// crashed workers and re-enqueues failed uploads still under the
/// retry cap.
pub struct BackupRetry {
    backups: Arc<dyn BackupRepository>,
    assets: Arc<dyn AssetRepository>,
    enqueuer: Enqueuer,
    stuck_age: Duration,
    batch: i64,
}

impl std::fmt::Debug for BackupRetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRetry")
            .field("stuck_age", &self.stuck_age)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl BackupRetry {
    pub fn new(
        backups: Arc<dyn BackupRepository>,
        assets: Arc<dyn AssetRepository>,
        enqueuer: Enqueuer,
        stuck_age: Duration,
        batch: i64,
    ) -> Self {
        Self {
            backups,
            assets,
            enqueuer,
            stuck_age,
            batch,
        }
    }

    /// One pass. Returns the number of backup jobs re-enqueued.
    pub async fn run_once(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::seconds(self.stuck_age.as_secs() as i64);
        for record in self.backups.stuck_uploading(cutoff).await? {
            warn!(
                backup_id = record.id,
                claimed_by = %record.claimed_by,
                "releasing stale upload claim"
            );
            self.backups.release_claim(record.id).await?;
        }

        let mut enqueued = 0usize;
        for record in self.backups.retryable(self.batch).await? {
            let Some(asset) = self.assets.get_asset(record.asset_id).await? else {
                self.backups
                    .mark_failed(record.id, "asset row no longer exists")
                    .await?;
                continue;
            };
            self.enqueuer
                .enqueue(JobPayload::ObjectBackup(ObjectBackupPayload {
                    asset_id: asset.id,
                    asset_uuid: asset.uuid,
                    backup_id: record.id,
                }))
                .await?;
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(enqueued, "re-enqueued failed backups");
        }
        Ok(enqueued)
    }
}

struct RunningState {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the background machinery of one node.
pub struct Manager {
    queue: Arc<JobQueue>,
    tiering: Arc<TieringSweep>,
    backup_retry: Arc<BackupRetry>,
    config: ManagerConfig,
    running: Mutex<Option<RunningState>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Manager {
    pub fn new(
        queue: Arc<JobQueue>,
        tiering: Arc<TieringSweep>,
        backup_retry: Arc<BackupRetry>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            queue,
            tiering,
            backup_retry,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Start workers and tickers. A second call while running is a
    /// no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        self.queue.start().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = vec![
            spawn_ticker(
                "tiering",
                self.config.tier_sweep_interval,
                stop_rx.clone(),
                {
                    let tiering = self.tiering.clone();
                    move || {
                        let tiering = tiering.clone();
                        async move { tiering.run_once().await.map(|_| ()) }
                    }
                },
            ),
            spawn_ticker(
                "backup-retry",
                self.config.backup_retry_interval,
                stop_rx,
                {
                    let retry = self.backup_retry.clone();
                    move || {
                        let retry = retry.clone();
                        async move { retry.run_once().await.map(|_| ()) }
                    }
                },
            ),
        ];

        info!("manager started");
        *running = Some(RunningState { stop_tx, handles });
    }

    /// Stop tickers and drain the queue. Safe to call when stopped.
    pub async fn stop(&self) {
        let state = self.running.lock().await.take();
        if let Some(state) = state {
            let _ = state.stop_tx.send(true);
            for handle in state.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "ticker task panicked during shutdown");
                }
            }
        }
        self.queue.stop().await;
        info!("manager stopped");
    }
}

fn spawn_ticker<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = pass().await {
                        warn!(ticker = name, error = %e, "periodic pass failed");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(ticker = name, "ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, BackupStatus};
    use crate::jobs::store::{JobStore, MemoryJobStore};
    use crate::repo::{MemoryAssetRepository, MemoryBackupRepository};
    use chrono::Utc;
    use uuid::Uuid;

    fn retry_fixture() -> (
        BackupRetry,
        Arc<MemoryBackupRepository>,
        Arc<MemoryAssetRepository>,
        Arc<MemoryJobStore>,
    ) {
        let backups = Arc::new(MemoryBackupRepository::new());
        let assets = Arc::new(MemoryAssetRepository::new());
        let store = Arc::new(MemoryJobStore::new());
        let retry = BackupRetry::new(
            backups.clone(),
            assets.clone(),
            Enqueuer::new(store.clone()),
            Duration::from_secs(1800),
            50,
        );
        (retry, backups, assets, store)
    }

    fn asset(id: i64) -> Asset {
        Asset {
            id,
            uuid: Uuid::new_v4(),
            relative_path: "original/2026/08/25".into(),
            file_name: format!("a{id}.jpg"),
            file_size: 5,
            storage_pool_id: 1,
            created_at: Utc::now(),
            last_viewed_at: None,
        }
    }

    #[tokio::test]
    async fn failed_backup_is_re_enqueued() {
        let (retry, backups, assets, store) = retry_fixture();
        assets.insert_asset(asset(1));
        let record = backups.create_pending(1, "s3").await.unwrap();
        backups.claim_for_upload(record.id, "s01").await.unwrap();
        backups.mark_failed(record.id, "net down").await.unwrap();

        assert_eq!(retry.run_once().await.unwrap(), 1);
        assert_eq!(store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_claim_is_released() {
        let (retry, backups, _assets, store) = retry_fixture();
        let record = backups.create_pending(1, "s3").await.unwrap();
        backups.claim_for_upload(record.id, "s02").await.unwrap();
        // Age the claim past the stuck cutoff.
        {
            let mut rec = backups.get(record.id).await.unwrap().unwrap();
            rec.updated_at = Utc::now() - chrono::Duration::hours(2);
            backups.insert(rec);
        }

        assert_eq!(retry.run_once().await.unwrap(), 0);
        assert_eq!(
            backups.get(record.id).await.unwrap().unwrap().status,
            BackupStatus::Pending
        );
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn backup_for_deleted_asset_is_abandoned() {
        let (retry, backups, _assets, store) = retry_fixture();
        let record = backups.create_pending(9, "s3").await.unwrap();
        backups.claim_for_upload(record.id, "s01").await.unwrap();
        backups.mark_failed(record.id, "boom").await.unwrap();

        assert_eq!(retry.run_once().await.unwrap(), 0);
        assert_eq!(store.queue_len().await.unwrap(), 0);
        let rec = backups.get(record.id).await.unwrap().unwrap();
        assert_eq!(rec.status, BackupStatus::Failed);
        assert_eq!(rec.retry_count, 2);
    }
}
