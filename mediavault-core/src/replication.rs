//! Cross-node file replication client.
//!
//! Pushes one file to a peer node's replicate endpoint as a multipart
//! upload carrying the relative path, byte size, and a SHA-256
//! checksum the receiver verifies before committing the file.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::domain::StoragePool;
use crate::error::{Result, VaultError};

/// Large originals over slow links need room; the timeout covers the
/// whole body transfer.
const REPLICATE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ReplicationTransport {
    client: reqwest::Client,
    secret: String,
}

impl ReplicationTransport {
    pub fn new(secret: String) -> Result<Self> {
        if secret.is_empty() {
            return Err(VaultError::MissingReplicationSecret);
        }
        let client = reqwest::Client::builder()
            .timeout(REPLICATE_TIMEOUT)
            .build()?;
        Ok(Self { client, secret })
    }

    /// Derive the peer's replicate URL from its upload API URL.
    /// `https://node/api/internal/upload` becomes
    /// `https://node/api/internal/replicate`.
    pub fn replicate_url(pool: &StoragePool) -> Result<String> {
        let base = pool.upload_api_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(VaultError::Internal(format!(
                "pool '{}' has no upload API URL",
                pool.name
            )));
        }
        let root = base.strip_suffix("/upload").unwrap_or(base);
        Ok(format!("{root}/replicate"))
    }

    /// Replicate an in-memory body. Used when the source is an object
    /// store and the bytes are already buffered.
    pub async fn replicate_bytes(
        &self,
        target: &StoragePool,
        relative: &str,
        body: Bytes,
    ) -> Result<()> {
        let checksum = hex::encode(Sha256::digest(&body));
        let size = body.len() as i64;
        let part = Part::bytes(body.to_vec()).file_name(file_name_of(relative));
        self.send(target, relative, size, checksum, part).await
    }

    /// Replicate a file from the local filesystem, streaming the body.
    /// The checksum pass reads the file once before the transfer.
    pub async fn replicate_file(
        &self,
        target: &StoragePool,
        relative: &str,
        local_path: &Path,
    ) -> Result<()> {
        let (checksum, size) = hash_file(local_path).await?;
        let file = tokio::fs::File::open(local_path).await?;
        let stream = ReaderStream::new(file);
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), size as u64)
            .file_name(file_name_of(relative));
        self.send(target, relative, size, checksum, part).await
    }

    async fn send(
        &self,
        target: &StoragePool,
        relative: &str,
        size: i64,
        checksum: String,
        file_part: Part,
    ) -> Result<()> {
        let url = Self::replicate_url(target)?;
        debug!(pool = %target.name, path = relative, size, "replicating file");

        let form = Form::new()
            .text("pool_id", target.id.to_string())
            .text("stored_path", relative.to_string())
            .text("size", size.to_string())
            .text("sha256", checksum)
            .part("file", file_part);

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.secret)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::ReplicationStatus {
                status: status.as_u16(),
                body,
            });
        }

        info!(pool = %target.name, path = relative, size, "file replicated");
        Ok(())
    }
}

fn file_name_of(relative: &str) -> String {
    relative
        .rsplit('/')
        .next()
        .unwrap_or(relative)
        .to_string()
}

/// SHA-256 of a file's contents plus its byte size, read in 64 KiB
/// chunks.
pub async fn hash_file(path: &Path) -> Result<(String, i64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total: i64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as i64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StorageTier, StorageType};
    use std::io::Write;

    fn pool_with_url(url: &str) -> StoragePool {
        StoragePool {
            id: 1,
            name: "remote".into(),
            base_path: "/srv/pool".into(),
            storage_type: StorageType::Local,
            storage_tier: StorageTier::Warm,
            node_id: "s02".into(),
            upload_api_url: url.into(),
            max_size: 1 << 40,
            used_size: 0,
            is_active: true,
            is_default: false,
            priority: 100,
        }
    }

    #[test]
    fn replicate_url_derivation() {
        let pool = pool_with_url("https://s02.example.com/api/internal/upload");
        assert_eq!(
            ReplicationTransport::replicate_url(&pool).unwrap(),
            "https://s02.example.com/api/internal/replicate"
        );

        let pool = pool_with_url("https://s02.example.com/api/internal/upload/");
        assert_eq!(
            ReplicationTransport::replicate_url(&pool).unwrap(),
            "https://s02.example.com/api/internal/replicate"
        );

        // No /upload suffix: append under the given base.
        let pool = pool_with_url("https://s02.example.com/api/internal");
        assert_eq!(
            ReplicationTransport::replicate_url(&pool).unwrap(),
            "https://s02.example.com/api/internal/replicate"
        );
    }

    #[test]
    fn missing_url_is_an_error() {
        let pool = pool_with_url("");
        assert!(ReplicationTransport::replicate_url(&pool).is_err());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            ReplicationTransport::new(String::new()),
            Err(VaultError::MissingReplicationSecret)
        ));
    }

    #[tokio::test]
    async fn file_hashing_matches_known_digest() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        let (digest, size) = hash_file(tmp.path()).await.unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
