//! Seams to the surrounding system.
//!
//! The pixel engine and view-tracking layer live outside this crate;
//! processors talk to them through these traits so tests can swap in
//! mocks.

use async_trait::async_trait;

use crate::domain::AssetVariant;
use crate::error::Result;

/// Variant generation engine. `process` is expected to be idempotent
/// per asset; rerunning it overwrites prior output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetProcessor: Send + Sync {
    /// Generate variants for an asset whose original lives at
    /// `relative_path` inside pool `pool_id`. Returns the variant rows
    /// it created.
    async fn process(
        &self,
        asset_id: i64,
        pool_id: i64,
        relative_path: &str,
    ) -> Result<Vec<AssetVariant>>;
}

/// Answers whether variant generation for an asset has settled.
/// Movers and the tiering sweep skip assets that are mid-processing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessingStatus: Send + Sync {
    async fn is_processing_complete(&self, asset_id: i64) -> Result<bool>;
}
