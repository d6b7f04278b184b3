//! # MediaVault Core
//!
//! Core library for MediaVault, a tiered media storage node: pooled
//! storage with hot/warm/cold placement, a Redis-backed durable job
//! queue, and cross-node file replication.
//!
//! ## Overview
//!
//! - **Storage pools**: capacity-accounted placement across local,
//!   NFS, and S3-backed pools ([`registry`], [`storage`])
//! - **Job queue**: at-least-once background jobs with retries and
//!   stuck-job recovery ([`jobs`])
//! - **Processors**: asset processing, moves, deletes, reconciliation,
//!   and off-site backups ([`jobs::processors`])
//! - **Tiering**: demotion sweeps that age idle assets out of hot
//!   pools ([`tiering`])
//! - **Replication**: checksummed cross-node file transfer
//!   ([`replication`])
//!
//! Binaries wire the Postgres and Redis implementations in
//! [`repo`] and [`jobs::store`]; tests run against the in-memory
//! counterparts.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod registry;
pub mod replication;
pub mod repo;
pub mod storage;
pub mod tiering;
pub mod traits;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use manager::{BackupRetry, Manager, ManagerConfig};
pub use registry::PoolRegistry;
pub use replication::ReplicationTransport;
pub use storage::StorageManager;
pub use tiering::{TieringConfig, TieringSweep};
