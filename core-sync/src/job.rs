//! # Replication State Machine
//!
//! Per-target lifecycle and per-job results.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Pending → Syncing → Completed
//!          │          ├────→ Error
//!          │          └────→ Cancelled
//!          └─────────────→ Cancelled / Error
//!
//! Completed / Error / Cancelled → Idle | Pending
//! ```
//!
//! Every record lives in the [`SyncStateTracker`](crate::tracker::SyncStateTracker);
//! a job only ever moves the records of its own targets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorKind, Result, SyncError};
use crate::target::TargetKey;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a replication job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::invalid_input("job_id", e.to_string()))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Pending,
    Syncing,
    Completed,
    Error,
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Completed | SyncState::Error | SyncState::Cancelled
        )
    }

    /// Pending or syncing: the target is owned by a job.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SyncState::Pending | SyncState::Syncing)
    }

    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Idle, Pending)
                | (Pending, Syncing)
                | (Pending, Cancelled)
                | (Pending, Error)
                | (Syncing, Completed)
                | (Syncing, Error)
                | (Syncing, Cancelled)
                | (Completed | Error | Cancelled, Idle | Pending)
        )
    }

    pub fn transition(self, next: SyncState) -> Result<SyncState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
                reason: if self.is_in_flight() && next.is_in_flight() {
                    "target is already owned by a job".to_string()
                } else {
                    "transition not allowed".to_string()
                },
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Pending => "pending",
            SyncState::Syncing => "syncing",
            SyncState::Completed => "completed",
            SyncState::Error => "error",
            SyncState::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(SyncState::Idle),
            "pending" => Ok(SyncState::Pending),
            "syncing" => Ok(SyncState::Syncing),
            "completed" => Ok(SyncState::Completed),
            "error" => Ok(SyncState::Error),
            "cancelled" => Ok(SyncState::Cancelled),
            other => Err(SyncError::Database(format!("unknown sync state '{other}'"))),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known replication state of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub target_key: TargetKey,
    /// Username, instance display name or bucket name
    pub target_label: String,
    pub state: SyncState,
    /// Files present on the target after the last completed run
    pub files_count: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_job_id: Option<JobId>,
    pub updated_at: DateTime<Utc>,
}

impl SyncStatus {
    pub fn idle(target_key: TargetKey, target_label: String, now: DateTime<Utc>) -> Self {
        Self {
            target_key,
            target_label,
            state: SyncState::Idle,
            files_count: 0,
            last_sync_at: None,
            last_error: None,
            last_job_id: None,
            updated_at: now,
        }
    }
}

// ============================================================================
// Job Results
// ============================================================================

/// Ephemeral progress sample for one file of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub job_id: JobId,
    pub target_key: TargetKey,
    pub file_name: String,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub percentage: f32,
}

impl TransferProgress {
    pub fn new(
        job_id: JobId,
        target_key: TargetKey,
        file_name: String,
        bytes_sent: u64,
        bytes_total: u64,
    ) -> Self {
        let percentage = if bytes_total == 0 {
            100.0
        } else {
            (bytes_sent as f64 / bytes_total as f64 * 100.0) as f32
        };
        Self {
            job_id,
            target_key,
            file_name,
            bytes_sent,
            bytes_total,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Completed {
        files_count: u64,
        files_transferred: u64,
        files_skipped: u64,
        attempts: u32,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },
    Cancelled {
        attempts: u32,
    },
}

impl TargetOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            TargetOutcome::Completed { attempts, .. }
            | TargetOutcome::Failed { attempts, .. }
            | TargetOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TargetOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target_key: TargetKey,
    pub target_label: String,
    pub outcome: TargetOutcome,
}

/// Per-target breakdown of a finished job, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub outcomes: Vec<TargetReport>,
}

impl JobSummary {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Cancelled { .. }))
    }

    pub fn outcome(&self, key: &TargetKey) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|report| &report.target_key == key)
            .map(|report| &report.outcome)
    }

    fn count(&self, predicate: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}
