//! Remote instance push
//!
//! Pushes tracks to a peer kiosk over [`PeerTransport`]. Covers are not sent;
//! the peer extracts them from the tracks' embedded tags on ingest.
//!
//! A transfer session survives transient failures: the session id is kept
//! per target, so the next attempt reopens it. Files the peer has already
//! committed are reported back as present and never re-sent. When the peer
//! advertises `resumable`, partially received files continue at the
//! acknowledged offset; otherwise the current file restarts from zero.
//!
//! A session still open when the target reaches a terminal state is aborted
//! in [`TransferBackend::release`], so exhausted retries and cancellation
//! during backoff never leave a stale session behind.

use async_trait::async_trait;
use bridge_traits::peer::{ManifestEntry, PeerSession, PeerTransport, TransferManifest};
use core_library::{ContentSource, LibraryFile};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    settings_document, wrong_target, PushContext, PushReport, TransferBackend, TransferPlan,
};
use crate::error::{Result, SyncError};
use crate::registry::{Instance, InstanceId, InstanceRegistry};
use crate::target::{ReplicationSettings, ReplicationTarget, TargetKey};

/// Consecutive acks that do not advance the offset before the peer is
/// considered stuck.
const MAX_STALLED_ACKS: u32 = 3;

pub struct RemoteInstancePush {
    registry: Arc<InstanceRegistry>,
    transport: Arc<dyn PeerTransport>,
    source: Arc<dyn ContentSource>,
    chunk_size: usize,
    /// Open session per target, kept across attempts
    sessions: Mutex<HashMap<TargetKey, String>>,
}

impl RemoteInstancePush {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        transport: Arc<dyn PeerTransport>,
        source: Arc<dyn ContentSource>,
        chunk_size: usize,
    ) -> Self {
        Self {
            registry,
            transport,
            source,
            chunk_size: chunk_size.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, instance_id: InstanceId) -> Result<Instance> {
        self.registry
            .get(instance_id)
            .ok_or_else(|| SyncError::not_found("instance", instance_id))
    }

    fn manifest(plan: &TransferPlan, resume_session: Option<String>) -> TransferManifest {
        TransferManifest {
            entries: plan
                .tracks()
                .map(|file| ManifestEntry {
                    content_hash: file.content_hash.clone(),
                    file_name: file.display_name(),
                    size_bytes: file.size_bytes,
                })
                .collect(),
            compress: plan.compress(),
            resume_session,
        }
    }

    async fn send_file(
        &self,
        base_url: &str,
        session: &PeerSession,
        file: &LibraryFile,
        ctx: &PushContext,
    ) -> Result<u64> {
        let data = self.source.load_content(file).await?;
        let total = data.len() as u64;
        let label = file.display_name();

        let mut offset = if session.resumable {
            session
                .offsets
                .get(&file.content_hash)
                .copied()
                .filter(|offset| *offset <= total)
                .unwrap_or(0)
        } else {
            0
        };
        let resumed_at = offset;
        if offset > 0 {
            debug!(file = %label, offset, "Resuming partially received file");
        }
        ctx.progress.report(&label, offset, total);

        let mut stalled = 0u32;
        while offset < total {
            if ctx.check_cancelled().is_err() {
                self.abort(base_url, &session.session_id, &ctx.target_key).await;
                return Err(SyncError::Cancelled);
            }

            let end = (offset + self.chunk_size as u64).min(total);
            let chunk = data.slice(offset as usize..end as usize);
            let ack = self
                .transport
                .upload_chunk(base_url, &session.session_id, &file.content_hash, offset, chunk)
                .await?;
            if ack.committed_offset <= offset {
                stalled += 1;
                if stalled >= MAX_STALLED_ACKS {
                    warn!(file = %label, offset, "Peer stopped advancing the committed offset");
                    return Err(SyncError::Backend(format!(
                        "peer did not advance past offset {offset} of {label} after {stalled} chunks"
                    )));
                }
                continue;
            }
            stalled = 0;
            offset = ack.committed_offset.min(total);
            ctx.progress.report(&label, offset, total);
        }

        self.transport
            .finalize_file(base_url, &session.session_id, &file.content_hash)
            .await?;
        Ok(total - resumed_at)
    }

    /// Session currently held open for `key`, if any.
    pub fn open_session(&self, key: &TargetKey) -> Option<String> {
        self.sessions.lock().get(key).cloned()
    }

    async fn abort(&self, base_url: &str, session_id: &str, key: &TargetKey) {
        self.sessions.lock().remove(key);
        if let Err(e) = self.transport.abort_transfer(base_url, session_id).await {
            warn!(session_id, error = %e, "Failed to abort peer transfer");
        }
    }
}

#[async_trait]
impl TransferBackend for RemoteInstancePush {
    #[instrument(skip_all, fields(target = %ctx.target_key, attempt = ctx.attempt))]
    async fn push(
        &self,
        plan: &TransferPlan,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<PushReport> {
        let ReplicationTarget::RemoteInstance { instance_id } = target else {
            return Err(wrong_target("remote instance push", target));
        };
        let instance = self.resolve(*instance_id)?;
        ctx.check_cancelled()?;

        let previous = self.sessions.lock().get(&ctx.target_key).cloned();
        let session = self
            .transport
            .begin_transfer(&instance.base_url, &Self::manifest(plan, previous))
            .await?;
        self.sessions
            .lock()
            .insert(ctx.target_key.clone(), session.session_id.clone());

        let present: HashSet<&str> = session.present.iter().map(String::as_str).collect();
        let mut report = PushReport::default();

        for file in plan.tracks() {
            if ctx.check_cancelled().is_err() {
                self.abort(&instance.base_url, &session.session_id, &ctx.target_key)
                    .await;
                return Err(SyncError::Cancelled);
            }

            if present.contains(file.content_hash.as_str()) {
                ctx.progress
                    .report(&file.display_name(), file.size_bytes, file.size_bytes);
                report.skipped();
                continue;
            }

            match self.send_file(&instance.base_url, &session, file, ctx).await {
                Ok(bytes) => report.transferred(bytes),
                Err(e) if e.is_retryable() => {
                    debug!(session_id = %session.session_id, "Leaving peer session open for retry");
                    return Err(e);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    self.abort(&instance.base_url, &session.session_id, &ctx.target_key)
                        .await;
                    return Err(e);
                }
            }
        }

        self.transport
            .complete_transfer(&instance.base_url, &session.session_id)
            .await?;
        self.sessions.lock().remove(&ctx.target_key);

        info!(
            instance = %instance.name,
            transferred = report.files_transferred,
            skipped = report.files_skipped,
            "Peer push finished"
        );
        Ok(report)
    }

    async fn push_settings(
        &self,
        settings: &ReplicationSettings,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<()> {
        let ReplicationTarget::RemoteInstance { instance_id } = target else {
            return Err(wrong_target("remote instance push", target));
        };
        let instance = self.resolve(*instance_id)?;
        ctx.check_cancelled()?;

        let document: serde_json::Value = serde_json::from_slice(&settings_document(settings)?)?;
        self.transport
            .push_settings(&instance.base_url, &document)
            .await?;
        ctx.progress.report("settings", 1, 1);
        Ok(())
    }

    async fn release(&self, target: &ReplicationTarget, target_key: &TargetKey) {
        let removed = self.sessions.lock().remove(target_key);
        let Some(session_id) = removed else {
            return;
        };
        let ReplicationTarget::RemoteInstance { instance_id } = target else {
            return;
        };
        match self.registry.get(*instance_id) {
            Some(instance) => {
                debug!(%session_id, target = %target_key, "Aborting leftover peer session");
                if let Err(e) = self
                    .transport
                    .abort_transfer(&instance.base_url, &session_id)
                    .await
                {
                    warn!(%session_id, error = %e, "Failed to abort peer transfer");
                }
            }
            None => debug!(%session_id, "Instance removed, dropping peer session"),
        }
    }
}
