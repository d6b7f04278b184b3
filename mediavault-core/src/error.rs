use thiserror::Error;

/// Errors produced by the storage and job-processing core.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage pool {0} not found")]
    PoolNotFound(i64),

    #[error("storage pool '{0}' is not healthy")]
    PoolUnhealthy(String),

    #[error("pool '{pool}' cannot accept file of {size} bytes")]
    InsufficientCapacity { pool: String, size: i64 },

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("replication secret is not configured")]
    MissingReplicationSecret,

    #[error("replication failed: status {status}: {body}")]
    ReplicationStatus { status: u16, body: String },

    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
