//! # Core Configuration Module
//!
//! Builder-based configuration for the replication engine. Capabilities are
//! injected as bridge trait objects; numeric knobs carry kiosk-friendly
//! defaults. Validation is fail-fast: `build()` refuses a configuration that
//! would only blow up later inside a worker.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, CloudConfig};
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/var/lib/kiosk")
//!     .cloud(CloudConfig::new("https://gateway.storjshare.io", grant))
//!     .max_parallelism(3)
//!     .build()?;
//! ```
//!
//! With the `desktop-shims` feature the reqwest HTTP client and tokio file
//! system are filled in when not provided.

use crate::error::{Error, Result};
use bridge_traits::{
    FileSystemAccess, HealthProbe, HttpClient, ObjectStore, PeerTransport, UserDirectory,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff for transient transfer failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err(Error::Config(
                "Retry backoff factor must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::Config(format!(
                "Retry base delay ({:?}) exceeds the cap ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        if self.max_retries > 10 {
            return Err(Error::Config(
                "More than 10 retries per target is not supported".to_string(),
            ));
        }
        Ok(())
    }
}

/// Orchestrator and backend tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationConfig {
    /// Worker tasks; each owns one target push at a time.
    pub max_parallelism: usize,
    /// Chunk size for local copies and peer uploads.
    pub chunk_size_bytes: usize,
    /// Files above this size go through multipart upload; also the part size.
    pub multipart_threshold_bytes: usize,
    /// Per-job progress buffer; the oldest samples are dropped beyond it.
    pub progress_buffer: usize,
    pub retry: RetryConfig,
    /// Retention applied to versions written into object-locked buckets.
    pub object_lock_retention: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 3,
            chunk_size_bytes: 256 * 1024,
            multipart_threshold_bytes: 8 * 1024 * 1024,
            progress_buffer: 64,
            retry: RetryConfig::default(),
            object_lock_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallelism == 0 || self.max_parallelism > 16 {
            return Err(Error::Config(
                "max_parallelism must be between 1 and 16".to_string(),
            ));
        }
        if self.chunk_size_bytes < 4 * 1024 || self.chunk_size_bytes > 64 * 1024 * 1024 {
            return Err(Error::Config(
                "chunk_size_bytes must be between 4 KiB and 64 MiB".to_string(),
            ));
        }
        // S3 rejects non-final parts under 5 MiB.
        if self.multipart_threshold_bytes < 5 * 1024 * 1024 {
            return Err(Error::Config(
                "multipart_threshold_bytes must be at least 5 MiB".to_string(),
            ));
        }
        if self.progress_buffer == 0 {
            return Err(Error::Config(
                "progress_buffer must hold at least one sample".to_string(),
            ));
        }
        if self.object_lock_retention.is_zero() {
            return Err(Error::Config(
                "object_lock_retention must be greater than zero".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// S3-compatible gateway and its opaque access grant.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub endpoint: String,
    pub access_grant: String,
}

impl CloudConfig {
    pub fn new(endpoint: impl Into<String>, access_grant: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_grant: access_grant.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(Error::Config(format!(
                "Cloud endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.access_grant.trim().is_empty() {
            return Err(Error::Config("Cloud access grant cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("endpoint", &self.endpoint)
            .field("access_grant", &"***")
            .finish()
    }
}

/// Credentials presented to peer instances.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConfig")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Core configuration.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root of the content store (blobs, covers, catalog.json).
    pub data_dir: PathBuf,
    /// SQLite file for the instance registry and sync status.
    pub database_path: PathBuf,
    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub user_directory: Option<Arc<dyn UserDirectory>>,
    pub health_probe: Option<Arc<dyn HealthProbe>>,
    /// Overrides the HTTP peer transport built from `http_client`.
    pub peer_transport: Option<Arc<dyn PeerTransport>>,
    /// Overrides the S3 client built from `cloud`.
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub cloud: Option<CloudConfig>,
    pub peer: PeerConfig,
    pub replication: ReplicationConfig,
    pub event_buffer: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("database_path", &self.database_path)
            .field("user_directory", &self.user_directory.is_some())
            .field("health_probe", &self.health_probe.is_some())
            .field("peer_transport", &self.peer_transport.is_some())
            .field("object_store", &self.object_store.is_some())
            .field("cloud", &self.cloud)
            .field("peer", &self.peer)
            .field("replication", &self.replication)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(Error::Config("Event buffer must be at least 1".to_string()));
        }
        if let Some(cloud) = &self.cloud {
            cloud.validate()?;
        }
        self.replication.validate()
    }

    /// Whether cloud buckets can be used at all.
    pub fn has_cloud(&self) -> bool {
        self.object_store.is_some() || self.cloud.is_some()
    }
}

#[cfg(feature = "desktop-shims")]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client provided. Enable the 'desktop-shims' feature for the \
                  reqwest client or inject a host implementation with .http_client()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn default_file_system(data_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_data_directory(
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_file_system(_data_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "No file system provided. Enable the 'desktop-shims' feature for the \
                  tokio implementation or inject one with .file_system()."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    database_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    user_directory: Option<Arc<dyn UserDirectory>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    peer_transport: Option<Arc<dyn PeerTransport>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    cloud: Option<CloudConfig>,
    peer: PeerConfig,
    replication: ReplicationConfig,
    event_buffer: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Defaults to `{data_dir}/replication.db`.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn user_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.user_directory = Some(directory);
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    pub fn peer_transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.peer_transport = Some(transport);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn cloud(mut self, cloud: CloudConfig) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn peer_auth_token(mut self, token: impl Into<String>) -> Self {
        self.peer.auth_token = Some(token.into());
        self
    }

    pub fn replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    pub fn max_parallelism(mut self, workers: usize) -> Self {
        self.replication.max_parallelism = workers;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.replication.retry = retry;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Validates and assembles the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the data directory is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] when a required bridge has no implementation
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;
        let database_path = self
            .database_path
            .unwrap_or_else(|| data_dir.join("replication.db"));

        let http_client = match self.http_client {
            Some(client) => client,
            None => default_http_client()?,
        };
        let file_system = match self.file_system {
            Some(fs) => fs,
            None => default_file_system(&data_dir)?,
        };

        let config = CoreConfig {
            data_dir,
            database_path,
            http_client,
            file_system,
            user_directory: self.user_directory,
            health_probe: self.health_probe,
            peer_transport: self.peer_transport,
            object_store: self.object_store,
            cloud: self.cloud,
            peer: self.peer,
            replication: self.replication,
            event_buffer: self
                .event_buffer
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}
