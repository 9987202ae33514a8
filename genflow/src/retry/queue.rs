//! The single-concurrency retry queue.

use super::{
    ArtifactProcessor, BatchRetryRequest, BatchRetryResponse, ProcessOutcome, QueueStatus, RetryJob,
};
use crate::cancellation::CancellationToken;
use crate::core::{GenflowEvent, QualityStatus, RetryJobStatus};
use crate::errors::Result;
use crate::events::{EventSink, NoOpEventSink};
use crate::ports::ArtifactRepository;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STOP_REASON: &str = "retry queue stopped";

/// The job being processed.
struct InFlight {
    job: RetryJob,
    cancel: Arc<CancellationToken>,
    task: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<RetryJob>,
    current: Option<InFlight>,
    history: Vec<RetryJob>,
    drain: Option<JoinHandle<()>>,
    /// Bumped by `stop` so a drain task started earlier exits.
    epoch: u64,
    /// Returns the artifact of a job abandoned by `stop` to `retry_pending`.
    release: Option<Shared<BoxFuture<'static, ()>>>,
    processed: usize,
    failed: usize,
}

struct QueueInner {
    processor: Arc<dyn ArtifactProcessor>,
    artifacts: Arc<dyn ArtifactRepository>,
    sink: Arc<dyn EventSink>,
    state: Mutex<QueueState>,
    busy: watch::Sender<bool>,
}

/// In-memory FIFO of retry jobs, processed one at a time.
///
/// Adding jobs starts a drain task when none is running; concurrent adds only
/// append. Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("processor", &self.inner.processor.name())
            .field("status", &self.get_queue_status())
            .finish()
    }
}

impl RetryQueue {
    /// Creates an idle queue.
    #[must_use]
    pub fn new(processor: Arc<dyn ArtifactProcessor>, artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self::with_event_sink(processor, artifacts, Arc::new(NoOpEventSink))
    }

    /// Creates an idle queue publishing to `sink`.
    #[must_use]
    pub fn with_event_sink(
        processor: Arc<dyn ArtifactProcessor>,
        artifacts: Arc<dyn ArtifactRepository>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                processor,
                artifacts,
                sink,
                state: Mutex::new(QueueState::default()),
                busy,
            }),
        }
    }

    /// Queues one job per target artifact and starts draining.
    ///
    /// An empty target list is a validation error and queues nothing.
    /// Artifacts are marked `retry_pending`; a failed mark is logged and
    /// left for the processor to report. An artifact that is `processing` or
    /// already targeted by a queued job keeps its status until its new job
    /// runs.
    pub async fn add_batch_retry_job(&self, request: BatchRetryRequest) -> Result<BatchRetryResponse> {
        request.validate()?;
        let jobs = request.into_jobs();
        let queued_jobs = jobs.len();

        let targeted: HashSet<Uuid> = {
            let state = self.inner.state.lock();
            state
                .current
                .iter()
                .map(|c| c.job.artifact_id)
                .chain(state.pending.iter().map(|j| j.artifact_id))
                .collect()
        };
        for job in &jobs {
            if targeted.contains(&job.artifact_id) {
                debug!(artifact_id = %job.artifact_id, "Artifact already queued");
                continue;
            }
            self.mark_retry_pending(job.artifact_id).await;
        }

        {
            let mut state = self.inner.state.lock();
            state.pending.extend(jobs);
            let running = state.drain.as_ref().is_some_and(|h| !h.is_finished());
            if !running {
                let queue = self.clone();
                let epoch = state.epoch;
                state.drain = Some(tokio::spawn(async move { queue.drain(epoch).await }));
                self.inner.busy.send_replace(true);
            }
        }

        info!(queued_jobs, "Retry batch queued");
        Ok(BatchRetryResponse {
            success: true,
            queued_jobs,
        })
    }

    async fn mark_retry_pending(&self, artifact_id: Uuid) {
        let artifacts = &self.inner.artifacts;
        match artifacts.get(artifact_id).await {
            Ok(Some(artifact)) if artifact.quality_status == QualityStatus::Processing => {
                debug!(artifact_id = %artifact_id, "Artifact is processing; status left to its job");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(artifact_id = %artifact_id, error = %err, "Could not read artifact");
                return;
            }
        }
        if let Err(err) = artifacts
            .update_quality_status(artifact_id, QualityStatus::RetryPending, None)
            .await
        {
            warn!(artifact_id = %artifact_id, error = %err, "Could not mark artifact retry_pending");
        }
    }

    /// Counts jobs by status.
    pub fn get_queue_status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        let mut status = QueueStatus {
            pending: state.pending.len(),
            processing: usize::from(state.current.is_some()),
            is_processing: state.drain.is_some(),
            ..QueueStatus::default()
        };
        for job in &state.history {
            match job.status {
                RetryJobStatus::Completed => status.completed += 1,
                RetryJobStatus::Failed => status.failed += 1,
                RetryJobStatus::Pending | RetryJobStatus::Processing => {}
            }
        }
        status.total = status.pending + status.processing + state.history.len();
        status
    }

    /// Clears pending jobs and history and aborts the in-flight job.
    ///
    /// The aborted job's result is never persisted and its artifact goes
    /// back to `retry_pending`. Returns the number of jobs dropped, the
    /// in-flight one included.
    pub fn stop(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        let mut dropped = state.pending.len();
        state.pending.clear();
        state.history.clear();
        state.processed = 0;
        state.failed = 0;

        if let Some(current) = state.current.take() {
            current.cancel.cancel(STOP_REASON);
            if let Some(task) = current.task {
                task.abort();
            }
            state.release = self.spawn_release(current.job.artifact_id);
            dropped += 1;
        }
        if let Some(drain) = state.drain.take() {
            drain.abort();
        }
        self.inner.busy.send_replace(false);
        drop(state);

        info!(dropped, "Retry queue stopped");
        dropped
    }

    fn spawn_release(&self, artifact_id: Uuid) -> Option<Shared<BoxFuture<'static, ()>>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(artifact_id = %artifact_id, "No runtime to release abandoned artifact");
            return None;
        };
        let artifacts = self.inner.artifacts.clone();
        let task = runtime.spawn(release_artifact(artifacts, artifact_id));
        Some(task.map(|_| ()).boxed().shared())
    }

    async fn await_release(&self) {
        let release = self.inner.state.lock().release.clone();
        if let Some(release) = release {
            release.await;
        }
    }

    /// Removes completed jobs from the history. Returns how many.
    pub fn clear_completed_jobs(&self) -> usize {
        let mut state = self.inner.state.lock();
        let before = state.history.len();
        state
            .history
            .retain(|job| job.status != RetryJobStatus::Completed);
        before - state.history.len()
    }

    /// Every known job: history, then the in-flight job, then pending.
    pub fn jobs(&self) -> Vec<RetryJob> {
        let state = self.inner.state.lock();
        state
            .history
            .iter()
            .chain(state.current.as_ref().map(|c| &c.job))
            .chain(state.pending.iter())
            .cloned()
            .collect()
    }

    /// Pending jobs plus the in-flight one.
    pub fn len(&self) -> usize {
        let state = self.inner.state.lock();
        state.pending.len() + usize::from(state.current.is_some())
    }

    /// Returns true when nothing is pending or processing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completes once no drain task is running and any artifact abandoned
    /// by `stop` is released.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
        self.await_release().await;
    }

    async fn drain(self, epoch: u64) {
        debug!("Retry queue draining");
        self.await_release().await;
        loop {
            let Some((job, cancel)) = self.next_job(epoch) else {
                return;
            };

            let processor = self.inner.processor.clone();
            let task_job = job.clone();
            let task_cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                processor.process_image(&task_job, &task_cancel).await
            });
            {
                let mut state = self.inner.state.lock();
                if state.epoch != epoch {
                    handle.abort();
                    return;
                }
                if let Some(current) = state.current.as_mut() {
                    current.task = Some(handle.abort_handle());
                }
            }

            let result = match handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => return,
                Err(err) => {
                    self.terminate(epoch, job, &err.to_string());
                    return;
                }
            };

            self.finish_job(epoch, job, result);
        }
    }

    /// Pops the next job, or marks the queue idle and reports the drain.
    fn next_job(&self, epoch: u64) -> Option<(RetryJob, Arc<CancellationToken>)> {
        let mut state = self.inner.state.lock();
        if state.epoch != epoch {
            return None;
        }

        if let Some(mut job) = state.pending.pop_front() {
            job.begin();
            let cancel = Arc::new(CancellationToken::new());
            state.current = Some(InFlight {
                job: job.clone(),
                cancel: cancel.clone(),
                task: None,
            });
            return Some((job, cancel));
        }

        let processed = std::mem::take(&mut state.processed);
        let failed = std::mem::take(&mut state.failed);
        state.drain = None;
        drop(state);

        info!(processed, failed, "Retry queue drained");
        self.inner
            .sink
            .try_emit(GenflowEvent::QueueCompleted { processed, failed });
        self.mark_idle(epoch);
        None
    }

    /// Clears `busy` unless an add started a new drain in the meantime.
    fn mark_idle(&self, epoch: u64) {
        let state = self.inner.state.lock();
        if state.epoch == epoch && state.drain.is_none() {
            self.inner.busy.send_replace(false);
        }
    }

    fn finish_job(&self, epoch: u64, mut job: RetryJob, result: Result<ProcessOutcome>) {
        match result {
            Ok(outcome) if outcome.success => job.complete(),
            Ok(outcome) => job.fail(
                outcome.error.unwrap_or_else(|| "retry failed".to_string()),
                outcome.qc_reason,
            ),
            Err(err) => {
                warn!(job_id = %job.id, artifact_id = %job.artifact_id, error = %err, "Retry job failed");
                job.fail(err.to_string(), Some(err.quality_reason().to_string()));
            }
        }

        let event = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.current = None;
            state.processed += 1;
            if job.status == RetryJobStatus::Failed {
                state.failed += 1;
            }
            let event = GenflowEvent::QueueProgress {
                job_id: job.id,
                artifact_id: job.artifact_id,
                status: job.status,
                qc_reason: job.qc_reason.clone(),
                error: job.error.clone(),
                processed: state.processed,
                remaining: state.pending.len(),
            };
            state.history.push(job);
            event
        };
        self.inner.sink.try_emit(event);
    }

    /// Ends the loop after the processor task panicked.
    fn terminate(&self, epoch: u64, mut job: RetryJob, message: &str) {
        error!(job_id = %job.id, error = %message, "Retry processor task panicked");
        {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            job.fail(message, None);
            state.current = None;
            state.history.push(job);
            state.drain = None;
            state.processed = 0;
            state.failed = 0;
        }
        self.inner.sink.try_emit(GenflowEvent::QueueError {
            error: message.to_string(),
        });
        self.mark_idle(epoch);
    }
}

async fn release_artifact(artifacts: Arc<dyn ArtifactRepository>, artifact_id: Uuid) {
    match artifacts.get(artifact_id).await {
        Ok(Some(artifact)) if artifact.quality_status == QualityStatus::Processing => {}
        Ok(_) => return,
        Err(err) => {
            warn!(artifact_id = %artifact_id, error = %err, "Could not read abandoned artifact");
            return;
        }
    }
    match artifacts
        .update_quality_status(artifact_id, QualityStatus::RetryPending, None)
        .await
    {
        Ok(()) => debug!(artifact_id = %artifact_id, "Abandoned artifact released"),
        Err(err) => warn!(artifact_id = %artifact_id, error = %err, "Could not release abandoned artifact"),
    }
}
