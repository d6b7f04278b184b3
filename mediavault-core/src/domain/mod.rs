//! Domain records the core operates on.

pub mod asset;
pub mod backup;
pub mod pool;

pub use asset::{Asset, AssetVariant};
pub use backup::{BackupRecord, BackupStatus};
pub use pool::{PoolHealth, StoragePool, StorageTier, StorageType};
