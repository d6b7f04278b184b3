//! Environment-driven configuration for the storage core.

use std::time::Duration;

use crate::jobs::queue::QueueConfig;
use crate::manager::ManagerConfig;
use crate::tiering::TieringConfig;

/// All knobs the core reads from the environment, with defaults good
/// for a single-node development run.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Logical id of this node, matched against pool `node_id`s.
    pub node_id: String,
    /// Shared secret for the internal replicate endpoint. Empty
    /// disables cross-node replication.
    pub replication_secret: String,
    /// Bucket off-site backups are written to.
    pub backup_bucket: String,
    pub queue: QueueConfig,
    pub tiering: TieringConfig,
    pub manager: ManagerConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            node_id: "local".to_string(),
            replication_secret: String::new(),
            backup_bucket: "vault-backups".to_string(),
            queue: QueueConfig::default(),
            tiering: TieringConfig::default(),
            manager: ManagerConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("NODE_ID") {
            config.node_id = v;
        }
        if let Ok(v) = std::env::var("REPLICATION_SECRET") {
            config.replication_secret = v;
        }
        if let Ok(v) = std::env::var("VAULT_BACKUP_BUCKET") {
            config.backup_bucket = v;
        }

        if let Some(v) = env_parse::<usize>("VAULT_WORKER_COUNT") {
            config.queue.workers = v.max(1);
        }
        if let Some(v) = env_secs("VAULT_RETRY_BACKOFF_BASE_SECS") {
            config.queue.retry_backoff_base = v;
        }
        if let Some(v) = env_secs("VAULT_SWEEP_INTERVAL_SECS") {
            config.queue.sweep_interval = v;
        }
        if let Some(v) = env_secs("VAULT_STUCK_MAX_AGE_SECS") {
            config.queue.stuck_max_age = v;
        }

        if let Some(v) = env_parse::<i64>("VAULT_TIER_KEEP_DAYS") {
            config.tiering.keep_days = v;
        }
        if let Some(v) = env_parse::<i64>("VAULT_TIER_NO_VIEWS_DAYS") {
            config.tiering.no_views_days = v;
        }
        if let Some(v) = env_parse::<f64>("VAULT_TIER_MIN_USAGE_PERCENT") {
            config.tiering.min_usage_percent = v;
        }
        if let Some(v) = env_parse::<i64>("VAULT_TIER_MAX_CANDIDATES") {
            config.tiering.max_candidates = v;
        }

        if let Some(v) = env_secs("VAULT_TIER_SWEEP_INTERVAL_SECS") {
            config.manager.tier_sweep_interval = v;
        }
        if let Some(v) = env_secs("VAULT_BACKUP_RETRY_INTERVAL_SECS") {
            config.manager.backup_retry_interval = v;
        }
        if let Some(v) = env_secs("VAULT_BACKUP_STUCK_AGE_SECS") {
            config.manager.backup_stuck_age = v;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
