//! Physical file placement: pool-backed filesystems and object stores.

pub mod manager;
pub mod object;

pub use manager::{MoveFileResult, StorageManager};
pub use object::{ObjectInfo, ObjectStorageClient, object_key, split_bucket_prefix};
