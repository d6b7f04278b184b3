//! In-memory job store with the same blocking-dequeue contract as the
//! Redis store. Backs tests and single-node runs without Redis.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::store::JobStore;
use crate::jobs::types::Job;

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    pending: VecDeque<Uuid>,
    processing: Vec<Uuid>,
    stats: HashMap<String, i64>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    wakeup: Notify,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for MemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryJobStore")
            .field("jobs", &inner.jobs.len())
            .field("pending", &inner.pending.len())
            .field("processing", &inner.processing.len())
            .finish()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put_job(&self, job: &Job) -> Result<()> {
        self.lock().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        self.lock().jobs.remove(&id);
        Ok(())
    }

    async fn push_back_pending(&self, id: Uuid) -> Result<()> {
        self.lock().pending.push_back(id);
        self.wakeup.notify_one();
        Ok(())
    }

    async fn move_pending_to_processing(&self, timeout: Duration) -> Result<Option<Uuid>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking the queue so an
            // enqueue between the check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(id) = inner.pending.pop_front() {
                    inner.processing.push(id);
                    return Ok(Some(id));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn remove_processing(&self, id: Uuid) -> Result<()> {
        self.lock().processing.retain(|p| *p != id);
        Ok(())
    }

    async fn list_processing(&self) -> Result<Vec<Uuid>> {
        Ok(self.lock().processing.clone())
    }

    async fn incr_stat(&self, name: &str, delta: i64) -> Result<()> {
        *self.lock().stats.entry(name.to_string()).or_insert(0) += delta;
        Ok(())
    }

    async fn stats(&self) -> Result<HashMap<String, i64>> {
        Ok(self.lock().stats.clone())
    }

    async fn queue_len(&self) -> Result<i64> {
        Ok(self.lock().pending.len() as i64)
    }

    async fn processing_len(&self) -> Result<i64> {
        Ok(self.lock().processing.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobPayload, MoveAssetPayload};

    fn job() -> Job {
        Job::new(JobPayload::MoveAsset(MoveAssetPayload {
            asset_id: 1,
            source_pool_id: 1,
            target_pool_id: 2,
        }))
    }

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let store = MemoryJobStore::new();
        let (a, b) = (job(), job());
        store.put_job(&a).await.unwrap();
        store.put_job(&b).await.unwrap();
        store.push_back_pending(a.id).await.unwrap();
        store.push_back_pending(b.id).await.unwrap();

        let first = store
            .move_pending_to_processing(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first, Some(a.id));
        assert_eq!(store.processing_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_queue_times_out_with_none() {
        let store = MemoryJobStore::new();
        let got = store
            .move_pending_to_processing(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .move_pending_to_processing(Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let j = job();
        store.push_back_pending(j.id).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(j.id));
    }
}
