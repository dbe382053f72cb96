//! # Transfer Backends
//!
//! One backend per kind of [`ReplicationTarget`]. A backend performs a single
//! attempt; retries, state tracking and scheduling belong to the orchestrator.
//!
//! Backends must check [`PushContext::check_cancelled`] between chunks and
//! return [`SyncError::Cancelled`] when the target's token fires, after
//! cleaning up anything partially written.

pub mod cloud_object;
pub mod local_user;
pub mod remote_instance;

pub use cloud_object::CloudObjectUpload;
pub use local_user::LocalUserCopy;
pub use remote_instance::RemoteInstancePush;

use async_trait::async_trait;
use bytes::Bytes;
use core_library::LibraryFile;
use core_runtime::events::{CoreEvent, EventBus, ReplicationEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::job::{JobId, TransferProgress};
use crate::target::{ReplicationSettings, ReplicationTarget, TargetKey};

/// Object key of the catalog document written by backups.
pub const CATALOG_OBJECT_KEY: &str = "catalog/catalog.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferItem {
    Track(LibraryFile),
    /// Embedded cover art stored in the content store
    Cover { cover_ref: String },
    /// Document generated at plan time, such as a catalog snapshot
    Inline { key: String, data: Bytes },
}

impl TransferItem {
    pub fn display_name(&self) -> String {
        match self {
            TransferItem::Track(file) => file.display_name(),
            TransferItem::Cover { cover_ref } => cover_ref.clone(),
            TransferItem::Inline { key, .. } => key.clone(),
        }
    }
}

/// A fileset expanded into the items a backend has to deliver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    items: Vec<TransferItem>,
    compress: bool,
}

impl TransferPlan {
    /// Tracks in fileset order, followed by their covers when requested.
    pub fn for_files(files: Vec<LibraryFile>, settings: &ReplicationSettings) -> Self {
        let mut covers: Vec<String> = Vec::new();
        if settings.include_covers {
            for cover in files.iter().filter_map(|f| f.cover_ref.as_ref()) {
                if !covers.contains(cover) {
                    covers.push(cover.clone());
                }
            }
        }

        let mut items: Vec<TransferItem> = files.into_iter().map(TransferItem::Track).collect();
        items.extend(
            covers
                .into_iter()
                .map(|cover_ref| TransferItem::Cover { cover_ref }),
        );

        Self {
            items,
            compress: settings.compress_transfer,
        }
    }

    pub fn with_inline(mut self, key: impl Into<String>, data: Bytes) -> Self {
        self.items.push(TransferItem::Inline {
            key: key.into(),
            data,
        });
        self
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    pub fn tracks(&self) -> impl Iterator<Item = &LibraryFile> {
        self.items.iter().filter_map(|item| match item {
            TransferItem::Track(file) => Some(file),
            _ => None,
        })
    }

    pub fn track_count(&self) -> u64 {
        self.tracks().count() as u64
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of one successful push. Counters cover tracks only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Tracks present on the target after the push
    pub files_count: u64,
    pub files_transferred: u64,
    /// Tracks already present with identical content
    pub files_skipped: u64,
    pub bytes_transferred: u64,
}

impl PushReport {
    pub fn transferred(&mut self, bytes: u64) {
        self.files_count += 1;
        self.files_transferred += 1;
        self.bytes_transferred += bytes;
    }

    pub fn skipped(&mut self) {
        self.files_count += 1;
        self.files_skipped += 1;
    }
}

/// Publishes progress into the job's bounded stream and onto the event bus.
///
/// Never blocks: the broadcast channel drops the oldest samples for slow
/// receivers.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    target_key: TargetKey,
    sender: broadcast::Sender<TransferProgress>,
    event_bus: Option<Arc<EventBus>>,
}

impl ProgressSink {
    pub fn new(
        job_id: JobId,
        target_key: TargetKey,
        sender: broadcast::Sender<TransferProgress>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            job_id,
            target_key,
            sender,
            event_bus,
        }
    }

    pub fn report(&self, file_name: &str, bytes_sent: u64, bytes_total: u64) {
        let progress = TransferProgress::new(
            self.job_id,
            self.target_key.clone(),
            file_name.to_string(),
            bytes_sent,
            bytes_total,
        );

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Replication(ReplicationEvent::Progress {
                job_id: self.job_id.to_string(),
                target_key: self.target_key.to_string(),
                file_name: progress.file_name.clone(),
                bytes_sent,
                bytes_total,
                percentage: progress.percentage,
            }))
            .ok();
        }
        // No receivers is fine.
        self.sender.send(progress).ok();
    }
}

/// Everything a backend needs for one attempt at one target.
#[derive(Clone)]
pub struct PushContext {
    pub job_id: JobId,
    pub target_key: TargetKey,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
    /// 1-based
    pub attempt: u32,
}

impl PushContext {
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Deliver every item of `plan` to `target`.
    async fn push(
        &self,
        plan: &TransferPlan,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<PushReport>;

    /// Write the replication settings document on the target.
    async fn push_settings(
        &self,
        settings: &ReplicationSettings,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<()>;

    /// Called once the target reached a terminal state, whatever the outcome.
    /// Backends drop per-target state kept across attempts here.
    async fn release(&self, _target: &ReplicationTarget, _target_key: &TargetKey) {}
}

pub(crate) fn wrong_target(backend: &str, target: &ReplicationTarget) -> SyncError {
    SyncError::invalid_input(
        "target",
        format!("{backend} cannot deliver to {}", target.key()),
    )
}

/// Encode the settings document pushed to every target kind.
pub(crate) fn settings_document(settings: &ReplicationSettings) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec_pretty(settings)?))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Utc;
    use core_library::FileId;

    pub fn library_file(title: &str, content: &[u8]) -> LibraryFile {
        LibraryFile {
            id: FileId::new(),
            title: title.to_string(),
            artist: "Daft Punk".to_string(),
            album: "Discovery".to_string(),
            duration_seconds: 200,
            size_bytes: content.len() as u64,
            content_hash: format!("{:016x}", fnv(content)).repeat(4),
            cover_ref: None,
            extension: "mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Cheap deterministic fingerprint; tests only need distinct hashes.
    fn fnv(data: &[u8]) -> u64 {
        data.iter().fold(0xcbf29ce484222325u64, |hash, byte| {
            (hash ^ *byte as u64).wrapping_mul(0x100000001b3)
        })
    }

    pub fn context(target_key: &str) -> (PushContext, broadcast::Receiver<TransferProgress>) {
        let (sender, receiver) = broadcast::channel(256);
        let job_id = JobId::new();
        let key = TargetKey::new(target_key);
        let ctx = PushContext {
            job_id,
            target_key: key.clone(),
            progress: ProgressSink::new(job_id, key, sender, None),
            cancel: CancellationToken::new(),
            attempt: 1,
        };
        (ctx, receiver)
    }

    #[test]
    fn test_plan_collects_unique_covers() {
        let mut a = library_file("A", b"a");
        a.cover_ref = Some("c1.jpg".into());
        let mut b = library_file("B", b"b");
        b.cover_ref = Some("c1.jpg".into());

        let plan = TransferPlan::for_files(vec![a.clone(), b], &ReplicationSettings::default());
        assert_eq!(plan.items().len(), 3);
        assert_eq!(plan.track_count(), 2);

        let no_covers = ReplicationSettings {
            include_covers: false,
            ..Default::default()
        };
        let plan = TransferPlan::for_files(vec![a], &no_covers);
        assert_eq!(plan.items().len(), 1);
    }
}
