//! Object-storage seam for S3-tier pools and off-site backups.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
}

/// Minimal client surface over an S3-compatible store. One client per
/// process; pool `base_path` carries the `bucket/prefix` for S3 pools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// `None` when the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>>;
}

/// Split an S3 pool's `base_path` (`bucket` or `bucket/prefix`) into
/// bucket and key prefix.
pub fn split_bucket_prefix(base_path: &str) -> (&str, &str) {
    let trimmed = base_path.trim_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (trimmed, ""),
    }
}

/// Object key for a relative path under an optional prefix.
pub fn object_key(prefix: &str, relative: &str) -> String {
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix.trim_matches('/'), relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_prefix_splitting() {
        assert_eq!(split_bucket_prefix("media"), ("media", ""));
        assert_eq!(split_bucket_prefix("media/cold"), ("media", "cold"));
        assert_eq!(split_bucket_prefix("/media/cold/"), ("media", "cold"));
    }

    #[test]
    fn key_building() {
        assert_eq!(object_key("", "original/a.jpg"), "original/a.jpg");
        assert_eq!(object_key("cold", "original/a.jpg"), "cold/original/a.jpg");
    }
}
