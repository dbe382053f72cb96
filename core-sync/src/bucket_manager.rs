//! # Bucket Manager
//!
//! Bucket lifecycle and catalog backups on the configured object store.
//!
//! The access grant is probed once by [`BucketManager::connect`]; every other
//! operation is refused with `PermissionDenied` until that probe succeeded.
//!
//! Deleting a bucket never bypasses object lock: if any stored version is
//! still under retention the call fails with `ObjectLocked`, forced or not.

use bridge_traits::object_store::{BucketInfo, BucketSettings, ObjectInfo, ObjectStore};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_library::ContentStore;
use core_runtime::events::{BucketEvent, CoreEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::backends::{TransferPlan, CATALOG_OBJECT_KEY};
use crate::error::{Result, SyncError};
use crate::orchestrator::{JobHandle, ReplicationOrchestrator};
use crate::target::{validate_bucket_name, ReplicationSettings, ReplicationTarget};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOptions {
    pub versioning: bool,
    /// Implies versioning
    pub object_lock: bool,
    /// Stored as the bucket's default retention, so any uploader writing
    /// into it later applies the same period. The configured default applies
    /// when unset
    pub retention: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSummary {
    pub buckets_count: u64,
    /// Current object versions only
    pub total_objects: u64,
    pub total_size: u64,
}

pub struct BucketManager {
    store: Arc<dyn ObjectStore>,
    orchestrator: Arc<ReplicationOrchestrator>,
    content: Arc<ContentStore>,
    clock: Arc<dyn Clock>,
    event_bus: Option<Arc<EventBus>>,
    connected: AtomicBool,
}

impl BucketManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        orchestrator: Arc<ReplicationOrchestrator>,
        content: Arc<ContentStore>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            content,
            clock: Arc::new(SystemClock),
            event_bus: None,
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Probe the access grant.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        match self.store.probe().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!("Object store access grant accepted");
                Ok(())
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(error = %e, "Object store probe failed");
                Err(e.into())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied(
                "object store not connected; call connect() first".to_string(),
            ))
        }
    }

    #[instrument(skip(self, options), fields(versioning = options.versioning, object_lock = options.object_lock))]
    pub async fn create_bucket(&self, name: &str, options: BucketOptions) -> Result<BucketInfo> {
        self.ensure_connected()?;
        validate_bucket_name(name)?;

        let settings = BucketSettings {
            versioning: options.versioning || options.object_lock,
            object_lock: options.object_lock,
            default_retention: options.retention,
        };
        let info = self.store.create_bucket(name, settings).await?;

        self.emit(BucketEvent::Created {
            name: info.name.clone(),
            versioning: info.versioning_enabled,
            object_lock: info.object_lock_enabled,
        });
        info!(bucket = name, "Bucket created");
        Ok(info)
    }

    /// Delete a bucket. With `force`, every stored version is removed first.
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, name: &str, force: bool) -> Result<()> {
        self.ensure_connected()?;

        let versions = self.store.list_object_versions(name, None).await?;
        let now = self.clock.now();
        for version in &versions {
            if let Some(until) = self.retained_until(name, version).await? {
                if until > now {
                    return Err(SyncError::ObjectLocked(format!(
                        "{}/{} is retained until {}",
                        name,
                        version.key,
                        until.to_rfc3339()
                    )));
                }
            }
        }

        if !versions.is_empty() && !force {
            return Err(SyncError::NotEmpty(format!(
                "bucket '{}' holds {} object versions",
                name,
                versions.len()
            )));
        }

        for version in &versions {
            self.store
                .delete_object(name, &version.key, version.version_id.as_deref())
                .await?;
        }
        self.store.delete_bucket(name).await?;

        self.emit(BucketEvent::Deleted {
            name: name.to_string(),
            objects_removed: versions.len() as u64,
        });
        info!(bucket = name, removed = versions.len(), "Bucket deleted");
        Ok(())
    }

    async fn retained_until(&self, bucket: &str, version: &ObjectInfo) -> Result<Option<DateTime<Utc>>> {
        if version.retain_until.is_some() {
            return Ok(version.retain_until);
        }
        Ok(self
            .store
            .object_retention(bucket, &version.key, version.version_id.as_deref())
            .await?)
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.ensure_connected()?;
        Ok(self.store.list_buckets().await?)
    }

    pub async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        self.ensure_connected()?;
        Ok(self.store.list_objects(bucket, prefix).await?)
    }

    pub async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>> {
        self.ensure_connected()?;
        Ok(self.store.list_object_versions(bucket, prefix).await?)
    }

    /// Delete one version, or the latest when `version_id` is `None`.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        self.ensure_connected()?;
        Ok(self.store.delete_object(bucket, key, version_id).await?)
    }

    /// Queue a backup of the whole library: the catalog snapshot, every file
    /// it references and their covers.
    #[instrument(skip(self))]
    pub async fn create_backup(&self, bucket: &str) -> Result<JobHandle> {
        self.ensure_connected()?;
        validate_bucket_name(bucket)?;

        let snapshot = self.content.snapshot().await;
        let catalog = serde_json::to_vec_pretty(&snapshot)?;
        let files = snapshot.files.len() as u64;

        let settings = ReplicationSettings {
            include_covers: true,
            ..ReplicationSettings::default()
        };
        let plan = TransferPlan::for_files(snapshot.files, &settings)
            .with_inline(CATALOG_OBJECT_KEY, catalog.into());

        let handle = self
            .orchestrator
            .replicate_plan(plan, vec![ReplicationTarget::cloud_bucket(bucket)])
            .await?;

        self.emit(BucketEvent::BackupQueued {
            bucket: bucket.to_string(),
            job_id: handle.job_id().to_string(),
            files,
        });
        info!(bucket, files, job_id = %handle.job_id(), "Catalog backup queued");
        Ok(handle)
    }

    pub async fn summary(&self) -> Result<StorageSummary> {
        self.ensure_connected()?;

        let buckets = self.store.list_buckets().await?;
        let mut summary = StorageSummary {
            buckets_count: buckets.len() as u64,
            ..StorageSummary::default()
        };
        for bucket in &buckets {
            for object in self.store.list_objects(&bucket.name, None).await? {
                summary.total_objects += 1;
                summary.total_size += object.size_bytes;
            }
        }
        Ok(summary)
    }

    fn emit(&self, event: BucketEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Bucket(event)).ok();
        }
    }
}
