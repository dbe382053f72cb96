//! # Sync State Tracker
//!
//! The durable per-target projection of replication state. The orchestrator
//! writes every transition here directly; event bus messages only mirror it.
//!
//! Reads are synchronous and never wait on a job. The map lock is never held
//! across an `.await`; persistence happens after the in-memory update.

use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::DateTime;
use parking_lot::RwLock;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::job::{JobId, SyncState, SyncStatus};
use crate::target::TargetKey;

/// Message stored for records left in flight by a crash.
pub const INTERRUPTED: &str = "interrupted";

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait SyncStatusRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<SyncStatus>>;

    async fn upsert(&self, status: &SyncStatus) -> Result<()>;
}

pub struct SqliteSyncStatusRepository {
    pool: SqlitePool,
}

impl SqliteSyncStatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncStatusRow {
    target_key: String,
    target_label: String,
    state: String,
    files_count: i64,
    last_sync_at: Option<i64>,
    last_error: Option<String>,
    last_job_id: Option<String>,
    updated_at: i64,
}

impl TryFrom<SyncStatusRow> for SyncStatus {
    type Error = SyncError;

    fn try_from(row: SyncStatusRow) -> Result<Self> {
        Ok(SyncStatus {
            target_key: TargetKey::new(row.target_key),
            target_label: row.target_label,
            state: row.state.parse()?,
            files_count: row.files_count.max(0) as u64,
            last_sync_at: row.last_sync_at.and_then(DateTime::from_timestamp_millis),
            last_error: row.last_error,
            last_job_id: row
                .last_job_id
                .as_deref()
                .map(JobId::from_string)
                .transpose()?,
            updated_at: DateTime::from_timestamp_millis(row.updated_at).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl SyncStatusRepository for SqliteSyncStatusRepository {
    async fn load_all(&self) -> Result<Vec<SyncStatus>> {
        let rows = sqlx::query_as::<_, SyncStatusRow>(
            r#"
            SELECT target_key, target_label, state, files_count,
                   last_sync_at, last_error, last_job_id, updated_at
            FROM sync_status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncStatus::try_from).collect()
    }

    async fn upsert(&self, status: &SyncStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (
                target_key, target_label, state, files_count,
                last_sync_at, last_error, last_job_id, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(target_key) DO UPDATE SET
                target_label = excluded.target_label,
                state = excluded.state,
                files_count = excluded.files_count,
                last_sync_at = excluded.last_sync_at,
                last_error = excluded.last_error,
                last_job_id = excluded.last_job_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(status.target_key.as_str())
        .bind(&status.target_label)
        .bind(status.state.as_str())
        .bind(status.files_count as i64)
        .bind(status.last_sync_at.map(|t| t.timestamp_millis()))
        .bind(&status.last_error)
        .bind(status.last_job_id.map(|id| id.to_string()))
        .bind(status.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// State change applied by the orchestrator to a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    Complete { files_count: u64 },
    Fail { message: String },
    Cancel,
}

impl Transition {
    fn target_state(&self) -> SyncState {
        match self {
            Transition::Start => SyncState::Syncing,
            Transition::Complete { .. } => SyncState::Completed,
            Transition::Fail { .. } => SyncState::Error,
            Transition::Cancel => SyncState::Cancelled,
        }
    }
}

pub struct SyncStateTracker {
    statuses: RwLock<HashMap<TargetKey, SyncStatus>>,
    repository: Option<Arc<dyn SyncStatusRepository>>,
    clock: Arc<dyn Clock>,
}

impl SyncStateTracker {
    /// Tracker without persistence.
    pub fn in_memory() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            repository: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Load persisted records. Anything left pending or syncing by a previous
    /// process is marked as an interrupted error.
    pub async fn open(repository: Arc<dyn SyncStatusRepository>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut statuses = HashMap::new();
        let mut interrupted = Vec::new();

        for mut status in repository.load_all().await? {
            if status.state.is_in_flight() {
                status.state = SyncState::Error;
                status.last_error = Some(INTERRUPTED.to_string());
                status.updated_at = clock.now();
                interrupted.push(status.clone());
            }
            statuses.insert(status.target_key.clone(), status);
        }

        for status in &interrupted {
            warn!(target_key = %status.target_key, "Replication was interrupted by a restart");
            repository.upsert(status).await?;
        }
        info!(targets = statuses.len(), "Sync state tracker loaded");

        Ok(Self {
            statuses: RwLock::new(statuses),
            repository: Some(repository),
            clock,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Move every listed target to `Pending` for `job_id`, or none of them.
    ///
    /// Fails with `AlreadyInProgress` naming every target that is pending or
    /// syncing.
    pub async fn try_begin(&self, targets: &[(TargetKey, String)], job_id: JobId) -> Result<()> {
        let now = self.clock.now();
        let updated: Vec<SyncStatus> = {
            let mut statuses = self.statuses.write();

            let busy: Vec<String> = targets
                .iter()
                .filter(|(key, _)| {
                    statuses
                        .get(key)
                        .map_or(false, |status| status.state.is_in_flight())
                })
                .map(|(key, _)| key.to_string())
                .collect();
            if !busy.is_empty() {
                return Err(SyncError::AlreadyInProgress { target_keys: busy });
            }

            targets
                .iter()
                .map(|(key, label)| {
                    let status = statuses
                        .entry(key.clone())
                        .or_insert_with(|| SyncStatus::idle(key.clone(), label.clone(), now));
                    status.state = SyncState::Pending;
                    status.target_label = label.clone();
                    status.last_job_id = Some(job_id);
                    status.updated_at = now;
                    status.clone()
                })
                .collect()
        };

        for status in &updated {
            self.persist(status).await;
        }
        Ok(())
    }

    /// Apply one orchestrator transition.
    pub async fn apply(&self, key: &TargetKey, transition: Transition) -> Result<SyncStatus> {
        let now = self.clock.now();
        let updated = {
            let mut statuses = self.statuses.write();
            let status = statuses
                .get_mut(key)
                .ok_or_else(|| SyncError::not_found("sync status", key))?;
            status.state = status.state.transition(transition.target_state())?;
            status.updated_at = now;

            match transition {
                Transition::Start => {
                    status.last_error = None;
                }
                Transition::Complete { files_count } => {
                    status.files_count = files_count;
                    status.last_sync_at = Some(now);
                    status.last_error = None;
                }
                Transition::Fail { message } => {
                    status.last_error = Some(message);
                }
                Transition::Cancel => {}
            }
            status.clone()
        };

        debug!(target_key = %key, state = %updated.state, "Sync state updated");
        self.persist(&updated).await;
        Ok(updated)
    }

    /// Return a finished target to `Idle`.
    pub async fn reset(&self, key: &TargetKey) -> Result<SyncStatus> {
        let now = self.clock.now();
        let updated = {
            let mut statuses = self.statuses.write();
            let status = statuses
                .get_mut(key)
                .ok_or_else(|| SyncError::not_found("sync status", key))?;
            if !status.state.is_terminal() {
                return Err(SyncError::InvalidStateTransition {
                    from: status.state.to_string(),
                    to: SyncState::Idle.to_string(),
                    reason: "only finished targets can be reset".to_string(),
                });
            }
            status.state = SyncState::Idle;
            status.last_error = None;
            status.updated_at = now;
            status.clone()
        };

        self.persist(&updated).await;
        Ok(updated)
    }

    pub fn get(&self, key: &TargetKey) -> Option<SyncStatus> {
        self.statuses.read().get(key).cloned()
    }

    /// Most recently updated record carrying this label.
    pub fn find_by_label(&self, label: &str) -> Option<SyncStatus> {
        self.statuses
            .read()
            .values()
            .filter(|status| status.target_label == label)
            .max_by_key(|status| status.updated_at)
            .cloned()
    }

    /// Every record, ordered by key.
    pub fn all(&self) -> Vec<SyncStatus> {
        let mut all: Vec<SyncStatus> = self.statuses.read().values().cloned().collect();
        all.sort_by(|a, b| a.target_key.cmp(&b.target_key));
        all
    }

    pub fn is_in_flight(&self, key: &TargetKey) -> bool {
        self.statuses
            .read()
            .get(key)
            .map_or(false, |status| status.state.is_in_flight())
    }

    async fn persist(&self, status: &SyncStatus) {
        if let Some(repository) = &self.repository {
            if let Err(e) = repository.upsert(status).await {
                warn!(target_key = %status.target_key, error = %e, "Failed to persist sync status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn key(k: &str) -> TargetKey {
        TargetKey::new(k)
    }

    fn targets(keys: &[&str]) -> Vec<(TargetKey, String)> {
        keys.iter()
            .map(|k| (key(k), k.split(':').nth(1).unwrap_or(k).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_try_begin_is_all_or_nothing() {
        let tracker = SyncStateTracker::in_memory();
        tracker
            .try_begin(&targets(&["user:ana"]), JobId::new())
            .await
            .unwrap();

        let err = tracker
            .try_begin(&targets(&["user:bia", "user:ana"]), JobId::new())
            .await
            .unwrap_err();
        match err {
            SyncError::AlreadyInProgress { target_keys } => {
                assert_eq!(target_keys, vec!["user:ana".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(tracker.get(&key("user:bia")).is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let tracker = SyncStateTracker::in_memory();
        let k = key("bucket:meu-bucket");
        let job = JobId::new();
        tracker.try_begin(&targets(&["bucket:meu-bucket"]), job).await.unwrap();
        assert!(tracker.is_in_flight(&k));

        tracker.apply(&k, Transition::Start).await.unwrap();
        assert_eq!(tracker.get(&k).unwrap().state, SyncState::Syncing);

        let done = tracker
            .apply(&k, Transition::Complete { files_count: 5 })
            .await
            .unwrap();
        assert_eq!(done.state, SyncState::Completed);
        assert_eq!(done.files_count, 5);
        assert_eq!(done.last_job_id, Some(job));
        assert!(done.last_sync_at.is_some());
        assert!(!tracker.is_in_flight(&k));

        // A finished target can be picked up again.
        tracker.try_begin(&targets(&["bucket:meu-bucket"]), JobId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let tracker = SyncStateTracker::in_memory();
        let k = key("user:ana");
        tracker.try_begin(&targets(&["user:ana"]), JobId::new()).await.unwrap();
        let err = tracker
            .apply(&k, Transition::Complete { files_count: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_reset_requires_terminal_state() {
        let tracker = SyncStateTracker::in_memory();
        let k = key("user:ana");
        tracker.try_begin(&targets(&["user:ana"]), JobId::new()).await.unwrap();
        assert!(tracker.reset(&k).await.is_err());

        tracker.apply(&k, Transition::Cancel).await.unwrap();
        let status = tracker.reset(&k).await.unwrap();
        assert_eq!(status.state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_find_by_label() {
        let tracker = SyncStateTracker::in_memory();
        tracker
            .try_begin(&[(key("instance:1"), "Loja2".to_string())], JobId::new())
            .await
            .unwrap();
        assert_eq!(
            tracker.find_by_label("Loja2").unwrap().target_key,
            key("instance:1")
        );
        assert!(tracker.find_by_label("Loja3").is_none());
    }

    #[tokio::test]
    async fn test_reload_marks_in_flight_as_interrupted() {
        let pool = create_test_pool().await.unwrap();
        let repo = Arc::new(SqliteSyncStatusRepository::new(pool));

        {
            let tracker = SyncStateTracker::open(repo.clone()).await.unwrap();
            tracker
                .try_begin(&targets(&["user:ana", "user:bia"]), JobId::new())
                .await
                .unwrap();
            tracker.apply(&key("user:ana"), Transition::Start).await.unwrap();
            tracker.apply(&key("user:bia"), Transition::Cancel).await.unwrap();
        }

        let reopened = SyncStateTracker::open(repo).await.unwrap();
        let ana = reopened.get(&key("user:ana")).unwrap();
        assert_eq!(ana.state, SyncState::Error);
        assert_eq!(ana.last_error.as_deref(), Some(INTERRUPTED));

        let bia = reopened.get(&key("user:bia")).unwrap();
        assert_eq!(bia.state, SyncState::Cancelled);
        assert_eq!(reopened.all().len(), 2);
    }
}
