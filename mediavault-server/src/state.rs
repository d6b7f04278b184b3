use std::sync::Arc;

use mediavault_core::jobs::queue::JobQueue;
use mediavault_core::{PoolRegistry, StorageManager};

/// Shared handler state. Cheap to clone; everything inside is shared.
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    /// Empty means the replicate endpoint is disabled.
    pub replication_secret: String,
    pub registry: PoolRegistry,
    pub storage: StorageManager,
    pub queue: Arc<JobQueue>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}
