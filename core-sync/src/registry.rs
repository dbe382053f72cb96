//! # Instance Registry
//!
//! Peer kiosk instances this kiosk can push its library to.
//!
//! Base URLs are normalized (lowercased, no trailing `/`) and must be unique.
//! Registration never contacts the peer; reachability is a cached signal
//! written by [`InstanceRegistry::update_status`] or
//! [`InstanceRegistry::refresh_health`].

use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::users::{HealthProbe, InstanceStatus};
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, EventBus, RegistryEvent};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Unique identifier for a peer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::invalid_input("instance_id", e.to_string()))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    /// Normalized base URL
    pub base_url: String,
    pub status: InstanceStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lowercase, strip the trailing `/`, require http(s) with a host.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let invalid = |reason: &str| SyncError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }

    Ok(parsed.as_str().to_lowercase().trim_end_matches('/').to_string())
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Instance>>;

    async fn upsert(&self, instance: &Instance) -> Result<()>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: InstanceId) -> Result<bool>;
}

pub struct SqliteInstanceRepository {
    pool: SqlitePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct InstanceRow {
    id: String,
    name: String,
    base_url: String,
    status: String,
    last_checked_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<InstanceRow> for Instance {
    type Error = SyncError;

    fn try_from(row: InstanceRow) -> Result<Self> {
        Ok(Instance {
            id: InstanceId::from_string(&row.id)
                .map_err(|_| SyncError::Database(format!("Invalid instance id: {}", row.id)))?,
            name: row.name,
            base_url: row.base_url,
            status: InstanceStatus::parse(&row.status),
            last_checked_at: row.last_checked_at.and_then(DateTime::from_timestamp_millis),
            created_at: DateTime::from_timestamp_millis(row.created_at).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl InstanceRepository for SqliteInstanceRepository {
    async fn load_all(&self) -> Result<Vec<Instance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, name, base_url, status, last_checked_at, created_at
            FROM instances
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Instance::try_from).collect()
    }

    async fn upsert(&self, instance: &Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, name, base_url, status, last_checked_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                status = excluded.status,
                last_checked_at = excluded.last_checked_at
            "#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.name)
        .bind(&instance.base_url)
        .bind(instance.status.as_str())
        .bind(instance.last_checked_at.map(|t| t.timestamp_millis()))
        .bind(instance.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: InstanceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Registry
// ============================================================================

pub struct InstanceRegistry {
    instances: RwLock<HashMap<InstanceId, Instance>>,
    repository: Arc<dyn InstanceRepository>,
    event_bus: Option<Arc<EventBus>>,
    clock: Arc<dyn Clock>,
}

impl InstanceRegistry {
    /// Load every persisted instance.
    pub async fn open(repository: Arc<dyn InstanceRepository>) -> Result<Self> {
        let loaded = repository.load_all().await?;
        info!(instances = loaded.len(), "Instance registry loaded");

        Ok(Self {
            instances: RwLock::new(loaded.into_iter().map(|i| (i.id, i)).collect()),
            repository,
            event_bus: None,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[instrument(skip(self))]
    pub async fn register(&self, name: &str, url: &str) -> Result<Instance> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::invalid_input("name", "cannot be empty"));
        }
        let base_url = normalize_base_url(url)?;

        let instance = Instance {
            id: InstanceId::new(),
            name: name.to_string(),
            base_url: base_url.clone(),
            status: InstanceStatus::Unknown,
            last_checked_at: None,
            created_at: self.clock.now(),
        };

        {
            let mut instances = self.instances.write();
            if instances.values().any(|i| i.base_url == base_url) {
                return Err(SyncError::AlreadyRegistered { base_url });
            }
            instances.insert(instance.id, instance.clone());
        }

        if let Err(e) = self.repository.upsert(&instance).await {
            self.instances.write().remove(&instance.id);
            return Err(e);
        }

        info!(instance_id = %instance.id, base_url = %instance.base_url, "Instance registered");
        self.emit(RegistryEvent::InstanceRegistered {
            instance_id: instance.id.to_string(),
            name: instance.name.clone(),
            base_url: instance.base_url.clone(),
        });
        Ok(instance)
    }

    /// Idempotent; returns whether the instance existed.
    pub async fn remove(&self, id: InstanceId) -> Result<bool> {
        let removed = self.instances.write().remove(&id);
        self.repository.delete(id).await?;

        if removed.is_some() {
            info!(instance_id = %id, "Instance removed");
            self.emit(RegistryEvent::InstanceRemoved {
                instance_id: id.to_string(),
            });
        }
        Ok(removed.is_some())
    }

    /// All instances, sorted by name.
    pub fn list(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self.instances.read().values().cloned().collect();
        instances.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.base_url.cmp(&b.base_url))
        });
        instances
    }

    pub fn get(&self, id: InstanceId) -> Option<Instance> {
        self.instances.read().get(&id).cloned()
    }

    /// Cache a health signal for an instance.
    pub async fn update_status(&self, id: InstanceId, status: InstanceStatus) -> Result<Instance> {
        let now = self.clock.now();
        let (updated, changed) = {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(&id)
                .ok_or_else(|| SyncError::not_found("instance", id))?;
            let changed = instance.status != status;
            instance.status = status;
            instance.last_checked_at = Some(now);
            (instance.clone(), changed)
        };

        self.repository.upsert(&updated).await?;

        if changed {
            debug!(instance_id = %id, status = status.as_str(), "Instance health changed");
            self.emit(RegistryEvent::StatusChanged {
                instance_id: id.to_string(),
                status: status.as_str().to_string(),
            });
        }
        Ok(updated)
    }

    /// Probe every instance concurrently and cache the results.
    pub async fn refresh_health(
        &self,
        probe: &dyn HealthProbe,
    ) -> Result<Vec<(InstanceId, InstanceStatus)>> {
        let targets: Vec<(InstanceId, String)> = self
            .list()
            .into_iter()
            .map(|i| (i.id, i.base_url))
            .collect();

        let probes = targets.iter().map(|(id, url)| async move {
            let status = probe.probe(url).await;
            (*id, status)
        });
        let results = join_all(probes).await;

        for (id, status) in &results {
            match self.update_status(*id, *status).await {
                Ok(_) => {}
                // Removed while the probe was in flight.
                Err(SyncError::NotFound { .. }) => {}
                Err(e) => warn!(instance_id = %id, error = %e, "Failed to store health status"),
            }
        }
        Ok(results)
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Registry(event)).ok();
        }
    }
}
