//! # Replication Orchestrator
//!
//! Fans a fileset (or a settings document) out to a list of targets.
//!
//! ## Overview
//!
//! ```text
//!  replicate()          ┌──────────────┐   WorkItem    ┌──────────┐
//!  ──validate──guard──> │ shared queue ├──────────────>│ worker 1 │──┐
//!                       └──────────────┘               │ worker 2 │──┤ Finished
//!                              │ Register              │ worker N │──┤
//!                              v                       └──────────┘  │
//!                       ┌──────────────┐ <───────────────────────────┘
//!                       │ coordinator  ├──watch──> JobHandle::wait()
//!                       └──────────────┘
//! ```
//!
//! - Validation and the in-progress guard run before anything is queued; a
//!   failure there rejects the whole call.
//! - Each target of a job is one work item. `max_parallelism` workers pull
//!   from one shared queue, so a job never holds more than that many pushes.
//! - Workers drive the per-target state machine through the
//!   [`SyncStateTracker`] directly; the event bus only mirrors it.
//! - The coordination loop collects per-target reports and publishes the
//!   [`JobSummary`] through a `watch` channel once every target finished.
//!
//! ## Cancellation
//!
//! ```text
//! root (shutdown) ─> job (JobHandle::cancel) ─> target (JobHandle::cancel_target)
//! ```

use core_library::{ContentStore, FileId};
use core_runtime::config::ReplicationConfig;
use core_runtime::events::{CoreEvent, EventBus, ReplicationEvent};
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle as TaskHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backends::{PushContext, PushReport, ProgressSink, TransferBackend, TransferPlan};
use crate::error::{Result, SyncError};
use crate::job::{JobId, JobSummary, TargetOutcome, TargetReport, TransferProgress};
use crate::registry::InstanceRegistry;
use crate::retry::{sleep_or_cancel, RetryPolicy};
use crate::target::{ReplicationSettings, ReplicationTarget, TargetKey};
use crate::tracker::{SyncStateTracker, Transition};

/// Transfer backend per target kind. Peer and cloud support are optional.
#[derive(Clone)]
pub struct Backends {
    pub local: Arc<dyn TransferBackend>,
    pub remote: Option<Arc<dyn TransferBackend>>,
    pub cloud: Option<Arc<dyn TransferBackend>>,
}

impl Backends {
    fn for_target(&self, target: &ReplicationTarget) -> Result<Arc<dyn TransferBackend>> {
        let backend = match target {
            ReplicationTarget::LocalUser { .. } => Some(&self.local),
            ReplicationTarget::RemoteInstance { .. } => self.remote.as_ref(),
            ReplicationTarget::CloudBucket { .. } => self.cloud.as_ref(),
        };
        backend.cloned().ok_or_else(|| {
            SyncError::invalid_input(
                "target",
                format!("no backend configured for {}", target.key()),
            )
        })
    }
}

/// Collaborators of the orchestrator.
pub struct OrchestratorDeps {
    pub content: Arc<ContentStore>,
    pub registry: Arc<InstanceRegistry>,
    pub tracker: Arc<SyncStateTracker>,
    pub backends: Backends,
    pub config: ReplicationConfig,
    pub event_bus: Option<Arc<EventBus>>,
}

/// What every target of a job receives.
#[derive(Debug)]
enum JobPayload {
    Files(TransferPlan),
    Settings(ReplicationSettings),
}

struct WorkItem {
    job_id: JobId,
    index: usize,
    target: ReplicationTarget,
    target_key: TargetKey,
    backend: Arc<dyn TransferBackend>,
    payload: Arc<JobPayload>,
    progress: ProgressSink,
    cancel: CancellationToken,
}

enum CoordinatorMessage {
    Register {
        job_id: JobId,
        targets: Vec<(TargetKey, String)>,
        summary: watch::Sender<Option<JobSummary>>,
    },
    Finished {
        job_id: JobId,
        index: usize,
        outcome: TargetOutcome,
    },
}

struct PreparedTarget {
    target: ReplicationTarget,
    key: TargetKey,
    label: String,
    backend: Arc<dyn TransferBackend>,
}

/// State shared by the workers.
struct Shared {
    tracker: Arc<SyncStateTracker>,
    retry: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl Shared {
    fn emit(&self, event: ReplicationEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Replication(event)).ok();
        }
    }
}

pub struct ReplicationOrchestrator {
    content: Arc<ContentStore>,
    registry: Arc<InstanceRegistry>,
    backends: Backends,
    config: ReplicationConfig,
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<WorkItem>,
    coordinator: mpsc::UnboundedSender<CoordinatorMessage>,
    root: CancellationToken,
    tasks: parking_lot::Mutex<Vec<TaskHandle<()>>>,
}

impl ReplicationOrchestrator {
    /// Spawn the coordination loop and the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(deps: OrchestratorDeps) -> Self {
        let OrchestratorDeps {
            content,
            registry,
            tracker,
            backends,
            config,
            event_bus,
        } = deps;

        let shared = Arc::new(Shared {
            tracker,
            retry: RetryPolicy::new(config.retry),
            event_bus,
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<WorkItem>();
        let (coordinator_tx, coordinator_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(AsyncMutex::new(queue_rx));

        let workers = config.max_parallelism.max(1);
        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(coordination_loop(
            coordinator_rx,
            shared.clone(),
        )));
        for worker_id in 0..workers {
            tasks.push(tokio::spawn(worker_loop(
                worker_id,
                queue_rx.clone(),
                coordinator_tx.clone(),
                shared.clone(),
            )));
        }
        info!(workers, "Replication orchestrator started");

        Self {
            content,
            registry,
            backends,
            config,
            shared,
            queue: queue_tx,
            coordinator: coordinator_tx,
            root: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(tasks),
        }
    }

    pub fn tracker(&self) -> &Arc<SyncStateTracker> {
        &self.shared.tracker
    }

    /// Replicate the given library files to every target.
    #[instrument(skip(self, files, targets, settings), fields(files = files.len(), targets = targets.len()))]
    pub async fn replicate(
        &self,
        files: &[FileId],
        targets: Vec<ReplicationTarget>,
        settings: ReplicationSettings,
    ) -> Result<JobHandle> {
        let prepared = self.prepare(targets)?;
        let files = self.content.get_many(files).await?;
        let plan = TransferPlan::for_files(files, &settings);
        self.submit(JobPayload::Files(plan), prepared).await
    }

    /// Push the replication settings document to every target.
    #[instrument(skip(self, settings, targets), fields(targets = targets.len()))]
    pub async fn replicate_config(
        &self,
        settings: ReplicationSettings,
        targets: Vec<ReplicationTarget>,
    ) -> Result<JobHandle> {
        let prepared = self.prepare(targets)?;
        self.submit(JobPayload::Settings(settings), prepared).await
    }

    /// Replicate a prebuilt plan, such as a catalog backup.
    pub async fn replicate_plan(
        &self,
        plan: TransferPlan,
        targets: Vec<ReplicationTarget>,
    ) -> Result<JobHandle> {
        let prepared = self.prepare(targets)?;
        self.submit(JobPayload::Files(plan), prepared).await
    }

    /// Cancel every running and queued job. New jobs are rejected afterwards.
    pub fn shutdown(&self) {
        info!("Shutting down replication orchestrator");
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Validate targets, collapse duplicates and resolve labels and backends.
    fn prepare(&self, targets: Vec<ReplicationTarget>) -> Result<Vec<PreparedTarget>> {
        if targets.is_empty() {
            return Err(SyncError::invalid_input(
                "targets",
                "at least one target is required",
            ));
        }

        let mut seen = HashSet::new();
        let mut prepared = Vec::with_capacity(targets.len());
        for target in targets {
            target.validate()?;
            let key = target.key();
            if !seen.insert(key.clone()) {
                debug!(target_key = %key, "Collapsing duplicate target");
                continue;
            }

            let label = match &target {
                ReplicationTarget::LocalUser { username, .. } => username.clone(),
                ReplicationTarget::RemoteInstance { instance_id } => self
                    .registry
                    .get(*instance_id)
                    .ok_or_else(|| SyncError::not_found("instance", instance_id))?
                    .name,
                ReplicationTarget::CloudBucket { bucket_name } => bucket_name.clone(),
            };
            let backend = self.backends.for_target(&target)?;
            prepared.push(PreparedTarget {
                target,
                key,
                label,
                backend,
            });
        }
        Ok(prepared)
    }

    async fn submit(&self, payload: JobPayload, targets: Vec<PreparedTarget>) -> Result<JobHandle> {
        if self.root.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let job_id = JobId::new();
        let labelled: Vec<(TargetKey, String)> = targets
            .iter()
            .map(|t| (t.key.clone(), t.label.clone()))
            .collect();
        self.shared.tracker.try_begin(&labelled, job_id).await?;

        let job_token = self.root.child_token();
        let (progress_tx, progress_rx) = broadcast::channel(self.config.progress_buffer.max(1));
        let (summary_tx, summary_rx) = watch::channel(None);

        if self
            .coordinator
            .send(CoordinatorMessage::Register {
                job_id,
                targets: labelled.clone(),
                summary: summary_tx,
            })
            .is_err()
        {
            self.release(&labelled).await;
            return Err(SyncError::Backend("replication coordinator stopped".to_string()));
        }

        let target_keys: Vec<TargetKey> = labelled.iter().map(|(key, _)| key.clone()).collect();
        self.shared.emit(ReplicationEvent::JobQueued {
            job_id: job_id.to_string(),
            target_keys: target_keys.iter().map(ToString::to_string).collect(),
        });
        info!(%job_id, targets = target_keys.len(), "Replication job queued");

        let payload = Arc::new(payload);
        let mut target_tokens = HashMap::new();
        for (index, prepared) in targets.into_iter().enumerate() {
            let cancel = job_token.child_token();
            target_tokens.insert(prepared.key.clone(), cancel.clone());

            let item = WorkItem {
                job_id,
                index,
                progress: ProgressSink::new(
                    job_id,
                    prepared.key.clone(),
                    progress_tx.clone(),
                    self.shared.event_bus.clone(),
                ),
                target: prepared.target,
                target_key: prepared.key,
                backend: prepared.backend,
                payload: payload.clone(),
                cancel,
            };
            if let Err(e) = self.queue.send(item) {
                // Workers are gone; report the target so the job still finishes.
                let item = e.0;
                error!(target_key = %item.target_key, "Replication queue closed");
                self.shared
                    .tracker
                    .apply(&item.target_key, Transition::Cancel)
                    .await
                    .ok();
                self.coordinator
                    .send(CoordinatorMessage::Finished {
                        job_id,
                        index,
                        outcome: TargetOutcome::Cancelled { attempts: 0 },
                    })
                    .ok();
            }
        }

        Ok(JobHandle {
            job_id,
            target_keys,
            cancel: job_token,
            target_tokens,
            first_progress: parking_lot::Mutex::new(Some(progress_rx.resubscribe())),
            progress_template: progress_rx,
            summary: summary_rx,
        })
    }

    async fn release(&self, targets: &[(TargetKey, String)]) {
        for (key, _) in targets {
            self.shared.tracker.apply(key, Transition::Cancel).await.ok();
        }
    }
}

impl Drop for ReplicationOrchestrator {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

async fn worker_loop(
    worker_id: usize,
    queue: Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>>,
    coordinator: mpsc::UnboundedSender<CoordinatorMessage>,
    shared: Arc<Shared>,
) {
    loop {
        let item = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(item) = item else {
            debug!(worker_id, "Replication worker stopping");
            break;
        };

        let job_id = item.job_id;
        let index = item.index;
        let outcome = run_target(&shared, item).await;
        if coordinator
            .send(CoordinatorMessage::Finished {
                job_id,
                index,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
}

#[instrument(skip_all, fields(job_id = %item.job_id, target = %item.target_key))]
async fn run_target(shared: &Shared, item: WorkItem) -> TargetOutcome {
    let outcome = drive_target(shared, &item).await;
    item.backend.release(&item.target, &item.target_key).await;
    outcome
}

async fn drive_target(shared: &Shared, item: &WorkItem) -> TargetOutcome {
    let job_id = item.job_id.to_string();
    let key = &item.target_key;

    if item.cancel.is_cancelled() {
        finish_cancelled(shared, item, 0).await;
        return TargetOutcome::Cancelled { attempts: 0 };
    }

    // The tracker owns the state machine; a target it refuses to start is
    // never pushed.
    if let Err(e) = shared.tracker.apply(key, Transition::Start).await {
        return finish_failed(shared, item, e, 0).await;
    }

    let max_attempts = shared.retry.max_attempts();
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        shared.emit(ReplicationEvent::TargetStarted {
            job_id: job_id.clone(),
            target_key: key.to_string(),
            attempt,
        });

        let ctx = PushContext {
            job_id: item.job_id,
            target_key: key.clone(),
            progress: item.progress.clone(),
            cancel: item.cancel.clone(),
            attempt,
        };
        let result = match item.payload.as_ref() {
            JobPayload::Files(plan) => item.backend.push(plan, &item.target, &ctx).await,
            JobPayload::Settings(settings) => item
                .backend
                .push_settings(settings, &item.target, &ctx)
                .await
                .map(|()| settings_report(shared, key)),
        };

        match result {
            Ok(report) => break Ok(report),
            Err(e) if item.cancel.is_cancelled() => break Err(e),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = shared.retry.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                shared.emit(ReplicationEvent::TargetRetrying {
                    job_id: job_id.clone(),
                    target_key: key.to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    message: e.to_string(),
                });
                if let Err(cancelled) = sleep_or_cancel(delay, &item.cancel).await {
                    break Err(cancelled);
                }
            }
            Err(e) => break Err(e),
        }
    };

    match result {
        Ok(report) => {
            if let Err(e) = shared
                .tracker
                .apply(
                    key,
                    Transition::Complete {
                        files_count: report.files_count,
                    },
                )
                .await
            {
                warn!(error = %e, "Could not mark target as completed");
            }
            shared.emit(ReplicationEvent::TargetCompleted {
                job_id,
                target_key: key.to_string(),
                files_count: report.files_count,
                files_skipped: report.files_skipped,
            });
            info!(
                files = report.files_count,
                skipped = report.files_skipped,
                attempts = attempt,
                "Target replicated"
            );
            TargetOutcome::Completed {
                files_count: report.files_count,
                files_transferred: report.files_transferred,
                files_skipped: report.files_skipped,
                attempts: attempt,
            }
        }
        Err(e) if matches!(e, SyncError::Cancelled) || item.cancel.is_cancelled() => {
            finish_cancelled(shared, item, attempt).await;
            TargetOutcome::Cancelled { attempts: attempt }
        }
        Err(e) => finish_failed(shared, item, e, attempt).await,
    }
}

async fn finish_failed(
    shared: &Shared,
    item: &WorkItem,
    error: SyncError,
    attempts: u32,
) -> TargetOutcome {
    let message = error.to_string();
    if let Err(apply_err) = shared
        .tracker
        .apply(
            &item.target_key,
            Transition::Fail {
                message: message.clone(),
            },
        )
        .await
    {
        warn!(error = %apply_err, "Could not mark target as failed");
    }
    shared.emit(ReplicationEvent::TargetFailed {
        job_id: item.job_id.to_string(),
        target_key: item.target_key.to_string(),
        message: message.clone(),
        attempts,
    });
    error!(attempts, error = %message, "Target replication failed");
    TargetOutcome::Failed {
        kind: error.kind(),
        message,
        attempts,
    }
}

/// A settings push leaves the target's file count untouched.
fn settings_report(shared: &Shared, key: &TargetKey) -> PushReport {
    PushReport {
        files_count: shared
            .tracker
            .get(key)
            .map_or(0, |status| status.files_count),
        ..PushReport::default()
    }
}

async fn finish_cancelled(shared: &Shared, item: &WorkItem, attempts: u32) {
    if let Err(e) = shared
        .tracker
        .apply(&item.target_key, Transition::Cancel)
        .await
    {
        warn!(error = %e, "Could not mark target as cancelled");
    }
    shared.emit(ReplicationEvent::TargetCancelled {
        job_id: item.job_id.to_string(),
        target_key: item.target_key.to_string(),
    });
    info!(attempts, "Target replication cancelled");
}

// ============================================================================
// Coordination Loop
// ============================================================================

struct RunningJob {
    targets: Vec<(TargetKey, String)>,
    outcomes: Vec<Option<TargetOutcome>>,
    summary: watch::Sender<Option<JobSummary>>,
}

async fn coordination_loop(
    mut inbox: mpsc::UnboundedReceiver<CoordinatorMessage>,
    shared: Arc<Shared>,
) {
    let mut jobs: HashMap<JobId, RunningJob> = HashMap::new();

    while let Some(message) = inbox.recv().await {
        match message {
            CoordinatorMessage::Register {
                job_id,
                targets,
                summary,
            } => {
                let outcomes = vec![None; targets.len()];
                jobs.insert(
                    job_id,
                    RunningJob {
                        targets,
                        outcomes,
                        summary,
                    },
                );
            }
            CoordinatorMessage::Finished {
                job_id,
                index,
                outcome,
            } => {
                let Some(job) = jobs.get_mut(&job_id) else {
                    warn!(%job_id, "Result for unknown job");
                    continue;
                };
                if let Some(slot) = job.outcomes.get_mut(index) {
                    *slot = Some(outcome);
                }
                if job.outcomes.iter().all(Option::is_some) {
                    if let Some(job) = jobs.remove(&job_id) {
                        publish(&shared, job_id, job);
                    }
                }
            }
        }
    }
    debug!("Replication coordinator stopping");
}

fn publish(shared: &Shared, job_id: JobId, job: RunningJob) {
    let outcomes = job
        .targets
        .into_iter()
        .zip(job.outcomes)
        .filter_map(|((target_key, target_label), outcome)| {
            outcome.map(|outcome| TargetReport {
                target_key,
                target_label,
                outcome,
            })
        })
        .collect();
    let summary = JobSummary { job_id, outcomes };

    shared.emit(ReplicationEvent::JobFinished {
        job_id: job_id.to_string(),
        completed: summary.completed(),
        failed: summary.failed(),
        cancelled: summary.cancelled(),
    });
    info!(
        %job_id,
        completed = summary.completed(),
        failed = summary.failed(),
        cancelled = summary.cancelled(),
        "Replication job finished"
    );
    job.summary.send_replace(Some(summary));
}

// ============================================================================
// Job Handle
// ============================================================================

/// Caller's view of a queued job.
pub struct JobHandle {
    job_id: JobId,
    target_keys: Vec<TargetKey>,
    cancel: CancellationToken,
    target_tokens: HashMap<TargetKey, CancellationToken>,
    /// Receiver created with the job, so the first subscriber sees every sample
    first_progress: parking_lot::Mutex<Option<broadcast::Receiver<TransferProgress>>>,
    progress_template: broadcast::Receiver<TransferProgress>,
    summary: watch::Receiver<Option<JobSummary>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Deduplicated target keys, in request order.
    pub fn target_keys(&self) -> &[TargetKey] {
        &self.target_keys
    }

    /// Cancel every target of the job.
    pub fn cancel(&self) {
        debug!(job_id = %self.job_id, "Cancelling job");
        self.cancel.cancel();
    }

    /// Cancel one target; the others keep running. Returns false for a key
    /// that is not part of the job.
    pub fn cancel_target(&self, key: &TargetKey) -> bool {
        match self.target_tokens.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Progress samples of this job. Ends when every target finished.
    pub fn progress(&self) -> ProgressStream {
        let receiver = self
            .first_progress
            .lock()
            .take()
            .unwrap_or_else(|| self.progress_template.resubscribe());
        ProgressStream { receiver }
    }

    pub fn is_finished(&self) -> bool {
        self.summary.borrow().is_some()
    }

    /// Wait for every target to reach a terminal state.
    pub async fn wait(&self) -> Result<JobSummary> {
        let mut summary = self.summary.clone();
        let finished = summary
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SyncError::Backend("replication coordinator stopped".to_string()))?
            .clone();
        finished.ok_or_else(|| SyncError::Backend("job summary missing".to_string()))
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("target_keys", &self.target_keys)
            .finish()
    }
}

/// Bounded, lossy progress feed. Lag gaps are skipped.
pub struct ProgressStream {
    receiver: broadcast::Receiver<TransferProgress>,
}

impl ProgressStream {
    pub async fn next(&mut self) -> Option<TransferProgress> {
        loop {
            match self.receiver.recv().await {
                Ok(progress) => return Some(progress),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress receiver lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = TransferProgress> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|progress| (progress, stream))
        })
    }
}
