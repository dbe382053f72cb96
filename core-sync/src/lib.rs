//! # Replication & Backup Module
//!
//! Moves the kiosk library to other places: OS user folders, peer kiosks
//! and S3-compatible buckets.
//!
//! ## Components
//!
//! - **Instance Registry** (`registry`): Known peer kiosks, persisted in SQLite
//! - **Targets** (`target`): Destinations, their stable keys and the settings document
//! - **Transfer Backends** (`backends`): One backend per target kind
//! - **Replication Orchestrator** (`orchestrator`): Validation, in-progress guard, worker pool, retries and cancellation
//! - **Sync State Tracker** (`tracker`): Durable per-target state machine projection
//! - **Bucket Manager** (`bucket_manager`): Bucket lifecycle, object lock and catalog backups

pub mod backends;
pub mod bucket_manager;
pub mod db;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod target;
pub mod tracker;

pub use backends::{
    CloudObjectUpload, LocalUserCopy, PushContext, PushReport, RemoteInstancePush,
    TransferBackend, TransferItem, TransferPlan, CATALOG_OBJECT_KEY,
};
pub use bucket_manager::{BucketManager, BucketOptions, StorageSummary};
pub use db::{create_pool, DatabaseConfig};
pub use error::{ErrorKind, Result, SyncError};
pub use job::{
    JobId, JobSummary, SyncState, SyncStatus, TargetOutcome, TargetReport, TransferProgress,
};
pub use orchestrator::{
    Backends, JobHandle, OrchestratorDeps, ProgressStream, ReplicationOrchestrator,
};
pub use registry::{
    Instance, InstanceId, InstanceRegistry, InstanceRepository, SqliteInstanceRepository,
};
pub use retry::RetryPolicy;
pub use target::{ReplicationSettings, ReplicationTarget, TargetKey};
pub use tracker::{SqliteSyncStatusRepository, SyncStateTracker, SyncStatusRepository, Transition};
