//! # Event Bus System
//!
//! Typed, broadcast-based notifications for observers of the replication
//! engine (UI, scheduler, audit log).
//!
//! ```text
//! ┌───────────────┐   emit    ┌──────────┐  subscribe  ┌────────────┐
//! │ ContentStore  ├──────────>│          ├────────────>│ UI         │
//! ├───────────────┤           │ EventBus │             ├────────────┤
//! │ Orchestrator  ├──────────>│ (tokio   ├────────────>│ Audit log  │
//! ├───────────────┤           │broadcast)│             └────────────┘
//! │ BucketManager ├──────────>│          │
//! └───────────────┘           └──────────┘
//! ```
//!
//! The bus is lossy by construction: a subscriber that falls behind receives
//! `RecvError::Lagged(n)` and the oldest events are gone. Nothing that must
//! survive (terminal sync state) depends on it; the sync state tracker is
//! updated directly and the bus only mirrors those transitions.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
//!
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//! bus.emit(CoreEvent::Library(LibraryEvent::TrackDeleted {
//!     track_id: "6f1c...".to_string(),
//! }))
//! .ok();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Library(LibraryEvent),
    Registry(RegistryEvent),
    Replication(ReplicationEvent),
    Bucket(BucketEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Registry(e) => e.description(),
            CoreEvent::Replication(e) => e.description(),
            CoreEvent::Bucket(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Replication(ReplicationEvent::TargetFailed { .. }) => EventSeverity::Error,
            CoreEvent::Replication(ReplicationEvent::TargetRetrying { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Replication(ReplicationEvent::TargetCancelled { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Replication(ReplicationEvent::JobFinished { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Replication(ReplicationEvent::Progress { .. }) => EventSeverity::Debug,
            CoreEvent::Registry(RegistryEvent::StatusChanged { .. }) => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    TrackAdded {
        track_id: String,
        title: String,
        content_hash: String,
    },
    TrackUpdated {
        track_id: String,
    },
    TrackDeleted {
        track_id: String,
    },
    PlaylistCreated {
        playlist_id: String,
        name: String,
    },
    /// `change_type` is `tracks_added` or `tracks_removed`.
    PlaylistUpdated {
        playlist_id: String,
        change_type: String,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::TrackAdded { .. } => "Track added to library",
            LibraryEvent::TrackUpdated { .. } => "Track metadata re-extracted",
            LibraryEvent::TrackDeleted { .. } => "Track removed from library",
            LibraryEvent::PlaylistCreated { .. } => "Playlist created",
            LibraryEvent::PlaylistUpdated { .. } => "Playlist updated",
        }
    }
}

// ============================================================================
// Instance Registry Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RegistryEvent {
    InstanceRegistered {
        instance_id: String,
        name: String,
        base_url: String,
    },
    InstanceRemoved {
        instance_id: String,
    },
    StatusChanged {
        instance_id: String,
        status: String,
    },
}

impl RegistryEvent {
    fn description(&self) -> &str {
        match self {
            RegistryEvent::InstanceRegistered { .. } => "Peer instance registered",
            RegistryEvent::InstanceRemoved { .. } => "Peer instance removed",
            RegistryEvent::StatusChanged { .. } => "Peer instance health changed",
        }
    }
}

// ============================================================================
// Replication Events
// ============================================================================

/// Mirror of the orchestrator's per-target state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ReplicationEvent {
    JobQueued {
        job_id: String,
        target_keys: Vec<String>,
    },
    TargetStarted {
        job_id: String,
        target_key: String,
        attempt: u32,
    },
    Progress {
        job_id: String,
        target_key: String,
        file_name: String,
        bytes_sent: u64,
        bytes_total: u64,
        percentage: f32,
    },
    TargetRetrying {
        job_id: String,
        target_key: String,
        attempt: u32,
        delay_ms: u64,
        message: String,
    },
    TargetCompleted {
        job_id: String,
        target_key: String,
        files_count: u64,
        files_skipped: u64,
    },
    TargetFailed {
        job_id: String,
        target_key: String,
        message: String,
        attempts: u32,
    },
    TargetCancelled {
        job_id: String,
        target_key: String,
    },
    JobFinished {
        job_id: String,
        completed: usize,
        failed: usize,
        cancelled: usize,
    },
}

impl ReplicationEvent {
    fn description(&self) -> &str {
        match self {
            ReplicationEvent::JobQueued { .. } => "Replication job queued",
            ReplicationEvent::TargetStarted { .. } => "Target transfer started",
            ReplicationEvent::Progress { .. } => "Transfer in progress",
            ReplicationEvent::TargetRetrying { .. } => "Transient failure, retrying target",
            ReplicationEvent::TargetCompleted { .. } => "Target replicated successfully",
            ReplicationEvent::TargetFailed { .. } => "Target replication failed",
            ReplicationEvent::TargetCancelled { .. } => "Target replication cancelled",
            ReplicationEvent::JobFinished { .. } => "Replication job finished",
        }
    }

    /// Target key the event refers to, if it is target-scoped.
    pub fn target_key(&self) -> Option<&str> {
        match self {
            ReplicationEvent::TargetStarted { target_key, .. }
            | ReplicationEvent::Progress { target_key, .. }
            | ReplicationEvent::TargetRetrying { target_key, .. }
            | ReplicationEvent::TargetCompleted { target_key, .. }
            | ReplicationEvent::TargetFailed { target_key, .. }
            | ReplicationEvent::TargetCancelled { target_key, .. } => Some(target_key),
            ReplicationEvent::JobQueued { .. } | ReplicationEvent::JobFinished { .. } => None,
        }
    }
}

// ============================================================================
// Bucket Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum BucketEvent {
    Created {
        name: String,
        versioning: bool,
        object_lock: bool,
    },
    Deleted {
        name: String,
        objects_removed: u64,
    },
    BackupQueued {
        bucket: String,
        job_id: String,
        files: u64,
    },
}

impl BucketEvent {
    fn description(&self) -> &str {
        match self {
            BucketEvent::Created { .. } => "Bucket created",
            BucketEvent::Deleted { .. } => "Bucket deleted",
            BucketEvent::BackupQueued { .. } => "Catalog backup queued",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber backlog before lagging kicks in.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Errors only when nobody is subscribed; emitters ignore that with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(64);
/// let replication_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Replication(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` when `n` events were dropped for this subscriber,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Some(Err(RecvError::Closed))
                }
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(job: &str, sent: u64) -> CoreEvent {
        CoreEvent::Replication(ReplicationEvent::Progress {
            job_id: job.to_string(),
            target_key: "instance:1".to_string(),
            file_name: "a.mp3".to_string(),
            bytes_sent: sent,
            bytes_total: 100,
            percentage: sent as f32,
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_an_error() {
        let bus = EventBus::new(8);
        assert!(bus.emit(progress("j", 1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = CoreEvent::Bucket(BucketEvent::Created {
            name: "meu-bucket".to_string(),
            versioning: true,
            object_lock: false,
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_stream_filter_skips_other_domains() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|e| matches!(e, CoreEvent::Replication(_)));

        bus.emit(CoreEvent::Library(LibraryEvent::TrackDeleted {
            track_id: "t".to_string(),
        }))
        .unwrap();
        bus.emit(progress("j", 5)).unwrap();

        match stream.recv().await.unwrap() {
            CoreEvent::Replication(ReplicationEvent::Progress { bytes_sent, .. }) => {
                assert_eq!(bytes_sent, 5)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_loses_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for sent in 1..=5 {
            bus.emit(progress("j", sent)).unwrap();
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        match rx.recv().await.unwrap() {
            CoreEvent::Replication(ReplicationEvent::Progress { bytes_sent, .. }) => {
                assert_eq!(bytes_sent, 4)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_severity_and_target_key() {
        let failed = ReplicationEvent::TargetFailed {
            job_id: "j".to_string(),
            target_key: "user:maria".to_string(),
            message: "permission denied".to_string(),
            attempts: 1,
        };
        assert_eq!(failed.target_key(), Some("user:maria"));
        assert_eq!(
            CoreEvent::Replication(failed).severity(),
            EventSeverity::Error
        );

        let finished = CoreEvent::Replication(ReplicationEvent::JobFinished {
            job_id: "j".to_string(),
            completed: 3,
            failed: 1,
            cancelled: 0,
        });
        assert_eq!(finished.severity(), EventSeverity::Warning);
        assert_eq!(finished.description(), "Replication job finished");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CoreEvent::Registry(RegistryEvent::InstanceRegistered {
            instance_id: "id".to_string(),
            name: "Loja2".to_string(),
            base_url: "https://10.0.0.5/api".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Registry");
        assert_eq!(json["payload"]["event"], "InstanceRegistered");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
