//! Bridge to the external variant-generation engine.
//!
//! The engine runs as its own service; this node only asks it to
//! process an asset and whether that work has settled. Without a
//! configured engine URL (single-node development) processing is a
//! no-op and everything counts as settled.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use mediavault_core::domain::AssetVariant;
use mediavault_core::error::{Result, VaultError};
use mediavault_core::traits::{AssetProcessor, ProcessingStatus};

#[derive(Debug, Clone)]
pub struct PixelEngine {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    complete: bool,
}

impl PixelEngine {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VAULT_ENGINE_URL")
            .ok()
            .map(|u| u.trim_end_matches('/').to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl AssetProcessor for PixelEngine {
    async fn process(
        &self,
        asset_id: i64,
        pool_id: i64,
        relative_path: &str,
    ) -> Result<Vec<AssetVariant>> {
        let Some(base) = &self.base_url else {
            debug!(asset_id, "no engine configured, skipping variant generation");
            return Ok(Vec::new());
        };

        let response = self
            .client
            .post(format!("{base}/process"))
            .json(&serde_json::json!({
                "asset_id": asset_id,
                "pool_id": pool_id,
                "path": relative_path,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Internal(format!(
                "engine rejected asset {asset_id}: {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ProcessingStatus for PixelEngine {
    async fn is_processing_complete(&self, asset_id: i64) -> Result<bool> {
        let Some(base) = &self.base_url else {
            return Ok(true);
        };

        let response = self
            .client
            .get(format!("{base}/status/{asset_id}"))
            .send()
            .await?;
        if !response.status().is_success() {
            // Treat an unreachable engine as in-flight; movers and the
            // tiering sweep will simply come back later.
            return Ok(false);
        }
        let status: StatusResponse = response.json().await?;
        Ok(status.complete)
    }
}
