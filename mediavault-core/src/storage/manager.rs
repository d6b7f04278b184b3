//! File placement across pools: save, delete, and migrate.
//!
//! Every byte written or removed flows a signed delta into the pool's
//! `used_size` so capacity accounting survives concurrent movers. The
//! migrate path is copy-before-delete: the source file is only removed
//! after the target copy is verified, so a crash mid-move leaves a
//! duplicate, never a loss.

use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::domain::StoragePool;
use crate::error::{Result, VaultError};
use crate::registry::PoolRegistry;
use crate::storage::object::{ObjectStorageClient, object_key, split_bucket_prefix};

/// Result of moving one file between pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveFileResult {
    /// File copied and source removed; payload is the byte size moved.
    Moved(i64),
    /// Source file was already gone. Callers treat this as a no-op so
    /// re-delivered move jobs stay idempotent.
    SourceMissing,
}

#[derive(Clone)]
pub struct StorageManager {
    registry: PoolRegistry,
    object: Option<Arc<dyn ObjectStorageClient>>,
}

impl StorageManager {
    pub fn new(registry: PoolRegistry, object: Option<Arc<dyn ObjectStorageClient>>) -> Self {
        Self { registry, object }
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Reject traversal and absolute components, normalize separators.
    pub fn clean_relative_path(relative: &str) -> Result<String> {
        let candidate = relative.replace('\\', "/");
        let trimmed = candidate.trim_matches('/');
        if trimmed.is_empty() {
            return Err(VaultError::InvalidPath(relative.to_string()));
        }
        let path = Path::new(trimmed);
        for component in path.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(VaultError::InvalidPath(relative.to_string())),
            }
        }
        Ok(trimmed.to_string())
    }

    /// Absolute filesystem path of a relative path inside a local/NFS
    /// pool.
    pub fn full_path(pool: &StoragePool, relative: &str) -> Result<PathBuf> {
        if pool.is_s3() {
            return Err(VaultError::InvalidPath(format!(
                "pool '{}' has no filesystem paths",
                pool.name
            )));
        }
        let clean = Self::clean_relative_path(relative)?;
        Ok(Path::new(&pool.base_path).join(clean))
    }

    fn object_client(&self) -> Result<&Arc<dyn ObjectStorageClient>> {
        self.object
            .as_ref()
            .ok_or_else(|| VaultError::Internal("no object storage client configured".into()))
    }

    pub async fn file_exists(&self, pool: &StoragePool, relative: &str) -> Result<bool> {
        let clean = Self::clean_relative_path(relative)?;
        if pool.is_s3() {
            let (bucket, prefix) = split_bucket_prefix(&pool.base_path);
            let info = self
                .object_client()?
                .head(bucket, &object_key(prefix, &clean))
                .await?;
            Ok(info.is_some())
        } else {
            Ok(tokio::fs::try_exists(Self::full_path(pool, &clean)?).await?)
        }
    }

    /// Size of an existing file, or `None` when it is missing.
    pub async fn file_size(&self, pool: &StoragePool, relative: &str) -> Result<Option<i64>> {
        let clean = Self::clean_relative_path(relative)?;
        if pool.is_s3() {
            let (bucket, prefix) = split_bucket_prefix(&pool.base_path);
            let info = self
                .object_client()?
                .head(bucket, &object_key(prefix, &clean))
                .await?;
            Ok(info.map(|i| i.size))
        } else {
            let path = Self::full_path(pool, &clean)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(Some(meta.len() as i64)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }

    /// Write a file into a pool and account for its size. A failed
    /// write removes the partial file before returning the error.
    pub async fn save_file<R>(
        &self,
        pool: &StoragePool,
        relative: &str,
        mut reader: R,
    ) -> Result<i64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let clean = Self::clean_relative_path(relative)?;
        if !pool.is_healthy() {
            return Err(VaultError::PoolUnhealthy(pool.name.clone()));
        }

        let written = if pool.is_s3() {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            let size = buf.len() as i64;
            let (bucket, prefix) = split_bucket_prefix(&pool.base_path);
            self.object_client()?
                .put(bucket, &object_key(prefix, &clean), Bytes::from(buf))
                .await?;
            size
        } else {
            let path = Self::full_path(pool, &clean)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::File::create(&path).await?;
            match tokio::io::copy(&mut reader, &mut file).await {
                Ok(n) => {
                    file.sync_all().await?;
                    n as i64
                }
                Err(e) => {
                    drop(file);
                    if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %cleanup,
                              "failed to remove partial file");
                    }
                    return Err(e.into());
                }
            }
        };

        self.registry.adjust_used_size(pool.id, written).await?;
        debug!(pool = %pool.name, path = %clean, bytes = written, "file saved");
        Ok(written)
    }

    /// Remove a file and release its size from the pool. Missing files
    /// are a no-op.
    pub async fn delete_file(&self, pool: &StoragePool, relative: &str) -> Result<()> {
        let clean = Self::clean_relative_path(relative)?;
        let Some(size) = self.file_size(pool, &clean).await? else {
            return Ok(());
        };

        if pool.is_s3() {
            let (bucket, prefix) = split_bucket_prefix(&pool.base_path);
            self.object_client()?
                .delete(bucket, &object_key(prefix, &clean))
                .await?;
        } else {
            tokio::fs::remove_file(Self::full_path(pool, &clean)?).await?;
        }

        self.registry.adjust_used_size(pool.id, -size).await?;
        debug!(pool = %pool.name, path = %clean, bytes = size, "file deleted");
        Ok(())
    }

    /// Read a whole file into memory. Used for cross-backend copies
    /// and replication uploads of S3-held originals.
    pub async fn read_file(&self, pool: &StoragePool, relative: &str) -> Result<Bytes> {
        let clean = Self::clean_relative_path(relative)?;
        if pool.is_s3() {
            let (bucket, prefix) = split_bucket_prefix(&pool.base_path);
            self.object_client()?
                .get(bucket, &object_key(prefix, &clean))
                .await
        } else {
            let path = Self::full_path(pool, &clean)?;
            Ok(Bytes::from(tokio::fs::read(&path).await?))
        }
    }

    /// Move one file between pools at the same relative path.
    ///
    /// Copy first, verify the copied size, then delete the source.
    /// A failure after the copy leaves both copies in place; rerunning
    /// the job converges because the target write is an overwrite.
    pub async fn migrate(
        &self,
        source: &StoragePool,
        target: &StoragePool,
        relative: &str,
    ) -> Result<MoveFileResult> {
        let clean = Self::clean_relative_path(relative)?;

        let Some(source_size) = self.file_size(source, &clean).await? else {
            return Ok(MoveFileResult::SourceMissing);
        };

        if !target.is_healthy() {
            return Err(VaultError::PoolUnhealthy(target.name.clone()));
        }
        if !target.can_accept(source_size) {
            return Err(VaultError::InsufficientCapacity {
                pool: target.name.clone(),
                size: source_size,
            });
        }

        if source.is_local_fs_pair(target) {
            self.copy_local(source, target, &clean).await?;
        } else {
            let body = self.read_file(source, &clean).await?;
            self.save_file(target, &clean, body.as_ref()).await?;
        }

        let copied = self.file_size(target, &clean).await?.unwrap_or(-1);
        if copied != source_size {
            // Roll the target back so accounting stays truthful.
            self.delete_file(target, &clean).await?;
            return Err(VaultError::ChecksumMismatch(clean));
        }

        self.delete_file(source, &clean).await?;
        debug!(
            source = %source.name,
            target = %target.name,
            path = %clean,
            bytes = source_size,
            "file migrated"
        );
        Ok(MoveFileResult::Moved(source_size))
    }

    /// Filesystem-to-filesystem copy that bypasses buffering the whole
    /// file. Accounts the target's size; the source is untouched.
    async fn copy_local(
        &self,
        source: &StoragePool,
        target: &StoragePool,
        clean: &str,
    ) -> Result<()> {
        let from = Self::full_path(source, clean)?;
        let to = Self::full_path(target, clean)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&from, &to).await {
            Ok(n) => {
                self.registry.adjust_used_size(target.id, n as i64).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&to).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %to.display(), error = %cleanup,
                              "failed to remove partial copy");
                    }
                }
                Err(e.into())
            }
        }
    }
}

impl StoragePool {
    fn is_local_fs_pair(&self, other: &StoragePool) -> bool {
        !self.is_s3() && !other.is_s3()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StorageTier, StorageType};
    use crate::repo::{MemoryPoolRepository, PoolRepository};
    use tempfile::TempDir;

    fn local_pool(id: i64, dir: &TempDir) -> StoragePool {
        StoragePool {
            id,
            name: format!("pool-{id}"),
            base_path: dir.path().to_string_lossy().into_owned(),
            storage_type: StorageType::Local,
            storage_tier: StorageTier::Hot,
            node_id: String::new(),
            upload_api_url: String::new(),
            max_size: 1 << 30,
            used_size: 0,
            is_active: true,
            is_default: false,
            priority: 100,
        }
    }

    fn manager_for(pools: &[StoragePool]) -> (StorageManager, Arc<MemoryPoolRepository>) {
        let repo = Arc::new(MemoryPoolRepository::with_pools(pools.to_vec()));
        let registry = PoolRegistry::new(repo.clone());
        (StorageManager::new(registry, None), repo)
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(StorageManager::clean_relative_path("../etc/passwd").is_err());
        assert!(StorageManager::clean_relative_path("original/../../x").is_err());
        assert!(StorageManager::clean_relative_path("/").is_err());
        assert_eq!(
            StorageManager::clean_relative_path("/original/a.jpg").unwrap(),
            "original/a.jpg"
        );
        assert_eq!(
            StorageManager::clean_relative_path("original\\sub\\a.jpg").unwrap(),
            "original/sub/a.jpg"
        );
    }

    #[tokio::test]
    async fn save_accounts_and_delete_releases() {
        let dir = TempDir::new().unwrap();
        let pool = local_pool(1, &dir);
        let (manager, repo) = manager_for(std::slice::from_ref(&pool));

        let written = manager
            .save_file(&pool, "original/2026/08/a.jpg", &b"hello"[..])
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert!(manager.file_exists(&pool, "original/2026/08/a.jpg").await.unwrap());
        assert_eq!(repo.get(1).await.unwrap().unwrap().used_size, 5);

        manager
            .delete_file(&pool, "original/2026/08/a.jpg")
            .await
            .unwrap();
        assert!(!manager.file_exists(&pool, "original/2026/08/a.jpg").await.unwrap());
        assert_eq!(repo.get(1).await.unwrap().unwrap().used_size, 0);
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        let pool = local_pool(1, &dir);
        let (manager, repo) = manager_for(std::slice::from_ref(&pool));

        manager.delete_file(&pool, "original/ghost.jpg").await.unwrap();
        assert_eq!(repo.get(1).await.unwrap().unwrap().used_size, 0);
    }

    #[tokio::test]
    async fn migrate_moves_bytes_and_accounting() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = local_pool(1, &src_dir);
        let target = local_pool(2, &dst_dir);
        let (manager, repo) = manager_for(&[source.clone(), target.clone()]);

        manager
            .save_file(&source, "original/a.jpg", &b"0123456789"[..])
            .await
            .unwrap();

        let result = manager.migrate(&source, &target, "original/a.jpg").await.unwrap();
        assert_eq!(result, MoveFileResult::Moved(10));

        assert!(!manager.file_exists(&source, "original/a.jpg").await.unwrap());
        assert!(manager.file_exists(&target, "original/a.jpg").await.unwrap());
        assert_eq!(repo.get(1).await.unwrap().unwrap().used_size, 0);
        assert_eq!(repo.get(2).await.unwrap().unwrap().used_size, 10);
    }

    #[tokio::test]
    async fn migrate_rejects_full_target() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = local_pool(1, &src_dir);
        let mut target = local_pool(2, &dst_dir);
        target.max_size = 4;
        let (manager, repo) = manager_for(&[source.clone(), target.clone()]);

        manager
            .save_file(&source, "original/a.jpg", &b"0123456789"[..])
            .await
            .unwrap();

        assert!(matches!(
            manager.migrate(&source, &target, "original/a.jpg").await,
            Err(VaultError::InsufficientCapacity { size: 10, .. })
        ));
        // The source file and its accounting are untouched.
        assert!(manager.file_exists(&source, "original/a.jpg").await.unwrap());
        assert_eq!(repo.get(1).await.unwrap().unwrap().used_size, 10);
        assert_eq!(repo.get(2).await.unwrap().unwrap().used_size, 0);
    }

    #[tokio::test]
    async fn migrate_rejects_unhealthy_target() {
        let src_dir = TempDir::new().unwrap();
        let source = local_pool(1, &src_dir);
        let mut target = local_pool(2, &src_dir);
        target.base_path = "/nonexistent/mediavault-test-pool".into();
        let (manager, _repo) = manager_for(&[source.clone(), target.clone()]);

        manager
            .save_file(&source, "original/a.jpg", &b"hello"[..])
            .await
            .unwrap();

        assert!(matches!(
            manager.migrate(&source, &target, "original/a.jpg").await,
            Err(VaultError::PoolUnhealthy(_))
        ));
        assert!(manager.file_exists(&source, "original/a.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn migrate_missing_source_is_reported_not_failed() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = local_pool(1, &src_dir);
        let target = local_pool(2, &dst_dir);
        let (manager, _repo) = manager_for(&[source.clone(), target.clone()]);

        let result = manager.migrate(&source, &target, "original/gone.jpg").await.unwrap();
        assert_eq!(result, MoveFileResult::SourceMissing);
    }
}
