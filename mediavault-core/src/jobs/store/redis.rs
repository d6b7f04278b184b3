//! Redis-backed job store.
//!
//! `ConnectionManager` multiplexes and reconnects under the hood, so
//! each call clones a handle instead of pooling connections.

use async_trait::async_trait;
use redis::{AsyncCommands, Direction, aio::ConnectionManager};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::jobs::store::{
    JOB_PROCESSING_KEY, JOB_QUEUE_KEY, JOB_STATS_KEY, JobStore, job_key,
};
use crate::jobs::types::{JOB_TTL_SECS, Job};

#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisJobStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis job store at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw)
            .map_err(|e| VaultError::Internal(format!("malformed job id '{raw}': {e}")))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put_job(&self, job: &Job) -> Result<()> {
        let json = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(job_key(job.id), json, JOB_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(job_key(id)).await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(job_key(id)).await?;
        Ok(())
    }

    async fn push_back_pending(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(JOB_QUEUE_KEY, id.to_string()).await?;
        Ok(())
    }

    async fn move_pending_to_processing(&self, timeout: Duration) -> Result<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let moved: Option<String> = conn
            .blmove(
                JOB_QUEUE_KEY,
                JOB_PROCESSING_KEY,
                Direction::Right,
                Direction::Left,
                timeout.as_secs_f64(),
            )
            .await?;
        moved.as_deref().map(Self::parse_id).transpose()
    }

    async fn remove_processing(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(JOB_PROCESSING_KEY, 1, id.to_string())
            .await?;
        Ok(())
    }

    async fn list_processing(&self) -> Result<Vec<Uuid>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(JOB_PROCESSING_KEY, 0, -1).await?;
        raw.iter().map(|s| Self::parse_id(s)).collect()
    }

    async fn incr_stat(&self, name: &str, delta: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hincr::<_, _, _, ()>(JOB_STATS_KEY, name, delta).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<HashMap<String, i64>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(JOB_STATS_KEY).await?)
    }

    async fn queue_len(&self) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(JOB_QUEUE_KEY).await?)
    }

    async fn processing_len(&self) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(JOB_PROCESSING_KEY).await?)
    }
}
