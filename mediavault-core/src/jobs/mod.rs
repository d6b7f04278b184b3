//! Durable background jobs: storage, scheduling, and processors.

pub mod processors;
pub mod queue;
pub mod store;
pub mod types;

pub use processors::{ProcessorContext, Processors};
pub use queue::{Enqueuer, JobHandler, JobQueue, QueueConfig, QueueSnapshot};
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
pub use types::{Job, JobPayload, JobStatus, Outcome};
