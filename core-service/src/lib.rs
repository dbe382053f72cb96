//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges of a [`CoreConfig`] (HTTP,
//! filesystem, OS users, health probe, object store) into the replication
//! engine. Desktop kiosks enable the `desktop-shims` feature, which fills in
//! the `bridge-desktop` adapters the host did not inject.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .data_dir("/var/lib/kiosk")
//!     .cloud(CloudConfig::new("https://gateway.storjshare.io", grant))
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//!
//! let file = core.content().ingest(bytes, "Artist - Title.mp3", None).await?;
//! let job = core
//!     .orchestrator()
//!     .replicate(&[file.id], core.local_user_targets().await?, settings)
//!     .await?;
//! let summary = job.wait().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    object_store::ObjectStore,
    peer::PeerTransport,
    users::{HealthProbe, InstanceStatus, UserDirectory},
};
use bytes::Bytes;
use core_library::{ContentStore, LibraryFile};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{
    create_pool, Backends, BucketManager, CloudObjectUpload, DatabaseConfig, InstanceRegistry,
    JobHandle, LocalUserCopy, OrchestratorDeps, RemoteInstancePush, ReplicationOrchestrator,
    ReplicationSettings, ReplicationTarget, SqliteInstanceRepository, SqliteSyncStatusRepository,
    SyncError, SyncStateTracker, SyncStatus,
};
use provider_peer::HttpPeerTransport;
use provider_s3::S3ObjectStore;
use tracing::{info, instrument, warn};

/// Result of [`CoreService::ingest`].
#[derive(Debug)]
pub struct IngestOutcome {
    pub file: LibraryFile,
    /// Replication started because `auto_sync` was on
    pub job: Option<JobHandle>,
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    event_bus: Arc<EventBus>,
    content: Arc<ContentStore>,
    registry: Arc<InstanceRegistry>,
    orchestrator: Arc<ReplicationOrchestrator>,
    buckets: Option<Arc<BucketManager>>,
    user_directory: Option<Arc<dyn UserDirectory>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
}

impl CoreService {
    /// Open the library and the replication database and start the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.event_buffer));
        let fs = config.file_system.clone();

        let content = Arc::new(
            ContentStore::open(fs.clone(), &config.data_dir)
                .await?
                .with_event_bus(event_bus.clone()),
        );

        if let Some(parent) = config.database_path.parent() {
            fs.create_dir_all(parent).await?;
        }
        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let registry = Arc::new(
            InstanceRegistry::open(Arc::new(SqliteInstanceRepository::new(pool.clone())))
                .await?
                .with_event_bus(event_bus.clone()),
        );
        let tracker = Arc::new(
            SyncStateTracker::open(Arc::new(SqliteSyncStatusRepository::new(pool))).await?,
        );

        let replication = config.replication.clone();
        let peer_transport: Arc<dyn PeerTransport> = match &config.peer_transport {
            Some(transport) => transport.clone(),
            None => Arc::new(HttpPeerTransport::from_config(
                config.http_client.clone(),
                &config.peer,
            )),
        };
        let object_store: Option<Arc<dyn ObjectStore>> =
            match (&config.object_store, &config.cloud) {
                (Some(store), _) => Some(store.clone()),
                (None, Some(cloud)) => Some(Arc::new(S3ObjectStore::from_config(
                    config.http_client.clone(),
                    cloud,
                ))),
                (None, None) => None,
            };

        let uploader = object_store.as_ref().map(|store| {
            Arc::new(CloudObjectUpload::new(
                store.clone(),
                content.clone(),
                Arc::new(bridge_traits::time::SystemClock),
                replication.multipart_threshold_bytes,
                replication.object_lock_retention,
            ))
        });

        let backends = Backends {
            local: Arc::new(LocalUserCopy::new(
                fs.clone(),
                content.clone(),
                replication.chunk_size_bytes,
            )),
            remote: Some(Arc::new(RemoteInstancePush::new(
                registry.clone(),
                peer_transport,
                content.clone(),
                replication.chunk_size_bytes,
            ))),
            cloud: uploader.map(|u| u as Arc<dyn core_sync::TransferBackend>),
        };

        let orchestrator = Arc::new(ReplicationOrchestrator::start(OrchestratorDeps {
            content: content.clone(),
            registry: registry.clone(),
            tracker,
            backends,
            config: replication,
            event_bus: Some(event_bus.clone()),
        }));

        let buckets = object_store.map(|store| {
            Arc::new(
                BucketManager::new(store, orchestrator.clone(), content.clone())
                    .with_event_bus(event_bus.clone()),
            )
        });

        info!(
            cloud = buckets.is_some(),
            users = config.user_directory.is_some(),
            "Core service ready"
        );
        Ok(Self {
            event_bus,
            content,
            registry,
            orchestrator,
            buckets,
            user_directory: config.user_directory,
            health_probe: config.health_probe,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.content
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<ReplicationOrchestrator> {
        &self.orchestrator
    }

    /// The bucket manager, when a cloud object store is configured.
    pub fn buckets(&self) -> Result<&Arc<BucketManager>> {
        self.buckets
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "ObjectStore".to_string(),
                message: "No cloud endpoint configured. Use .cloud() or .object_store()."
                    .to_string(),
            })
    }

    /// One target per OS user account the host reports.
    pub async fn local_user_targets(&self) -> Result<Vec<ReplicationTarget>> {
        let directory = self
            .user_directory
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "UserDirectory".to_string(),
                message: "No user directory provided. Inject one with .user_directory()."
                    .to_string(),
            })?;
        Ok(directory
            .list_users()
            .await?
            .iter()
            .map(ReplicationTarget::local_user)
            .collect())
    }

    /// Probe every registered instance and cache the results.
    pub async fn refresh_health(&self) -> Result<()> {
        let probe = self
            .health_probe
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "HealthProbe".to_string(),
                message: "No health probe provided. Inject one with .health_probe()."
                    .to_string(),
            })?;
        self.registry.refresh_health(probe.as_ref()).await?;
        Ok(())
    }

    /// Store an upload. With `auto_sync`, the new file is replicated to every
    /// local user and every instance not known to be offline.
    ///
    /// A failure to start the replication never fails the ingest.
    #[instrument(skip(self, data, settings), fields(size = data.len()))]
    pub async fn ingest(
        &self,
        data: Bytes,
        file_name: &str,
        declared_mime: Option<&str>,
        settings: &ReplicationSettings,
    ) -> Result<IngestOutcome> {
        let file = self.content.ingest(data, file_name, declared_mime).await?;
        if !settings.auto_sync {
            return Ok(IngestOutcome { file, job: None });
        }

        let targets = self.auto_sync_targets().await;
        if targets.is_empty() {
            return Ok(IngestOutcome { file, job: None });
        }

        let job = match self
            .orchestrator
            .replicate(&[file.id], targets, *settings)
            .await
        {
            Ok(job) => Some(job),
            Err(SyncError::AlreadyInProgress { target_keys }) => {
                warn!(?target_keys, "Skipping auto-sync, targets busy");
                None
            }
            Err(e) => {
                warn!(error = %e, "Auto-sync could not be started");
                None
            }
        };
        Ok(IngestOutcome { file, job })
    }

    async fn auto_sync_targets(&self) -> Vec<ReplicationTarget> {
        let mut targets = match self.local_user_targets().await {
            Ok(users) => users,
            Err(CoreError::CapabilityMissing { .. }) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Could not list OS users for auto-sync");
                Vec::new()
            }
        };
        targets.extend(
            self.registry
                .list()
                .into_iter()
                .filter(|instance| instance.status != InstanceStatus::Offline)
                .map(|instance| ReplicationTarget::remote_instance(instance.id)),
        );
        targets
    }

    /// Every tracked target.
    pub fn sync_status(&self) -> Vec<SyncStatus> {
        self.orchestrator.tracker().all()
    }

    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}
