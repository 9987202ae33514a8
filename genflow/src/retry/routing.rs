//! Capability routing between two interchangeable implementations.
//!
//! The preferred implementation is chosen once from [`RoutingFlags`]. With
//! fallback enabled, an error from the preferred one is logged and the
//! identical call is replayed against the other, unless the error would make
//! the replay fail the same way.

use super::{
    ArtifactProcessor, BatchRetryRequest, BatchRetryResponse, ProcessOutcome, QueueStatus,
    RetryJob, RetryQueue,
};
use crate::cancellation::CancellationToken;
use crate::config::{Route, RoutingFlags};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// The retry-queue surface.
#[async_trait]
pub trait RetryQueueApi: Send + Sync {
    /// Implementation name used in logs.
    fn name(&self) -> &str;

    /// Queues a batch.
    async fn add_batch_retry_job(&self, request: BatchRetryRequest) -> Result<BatchRetryResponse>;

    /// Counts jobs by status.
    fn get_queue_status(&self) -> QueueStatus;

    /// Clears the queue and aborts the in-flight job. Returns the jobs dropped.
    fn stop(&self) -> usize;

    /// Removes completed jobs from the history.
    fn clear_completed_jobs(&self) -> usize;
}

#[async_trait]
impl RetryQueueApi for RetryQueue {
    fn name(&self) -> &str {
        "retry-queue"
    }

    async fn add_batch_retry_job(&self, request: BatchRetryRequest) -> Result<BatchRetryResponse> {
        Self::add_batch_retry_job(self, request).await
    }

    fn get_queue_status(&self) -> QueueStatus {
        Self::get_queue_status(self)
    }

    fn stop(&self) -> usize {
        Self::stop(self)
    }

    fn clear_completed_jobs(&self) -> usize {
        Self::clear_completed_jobs(self)
    }
}

/// Processor that replays failed calls against an alternate.
pub struct FallbackProcessor {
    preferred: Arc<dyn ArtifactProcessor>,
    alternate: Arc<dyn ArtifactProcessor>,
    fallbacks: AtomicUsize,
}

impl FallbackProcessor {
    /// Wraps `preferred`, replaying on `alternate`.
    #[must_use]
    pub fn new(preferred: Arc<dyn ArtifactProcessor>, alternate: Arc<dyn ArtifactProcessor>) -> Self {
        Self {
            preferred,
            alternate,
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Number of calls replayed so far.
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ArtifactProcessor for FallbackProcessor {
    fn name(&self) -> &str {
        self.preferred.name()
    }

    async fn process_image(
        &self,
        job: &RetryJob,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        match self.preferred.process_image(job, cancel).await {
            Err(err) if err.is_replay_safe() => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    preferred = self.preferred.name(),
                    alternate = self.alternate.name(),
                    job_id = %job.id,
                    error = %err,
                    "Processor failed, replaying on alternate"
                );
                self.alternate.process_image(job, cancel).await
            }
            other => other,
        }
    }
}

/// Queue that replays failed adds against an alternate.
///
/// Status reads sum both queues; control calls reach both.
pub struct FallbackQueue {
    preferred: Arc<dyn RetryQueueApi>,
    alternate: Arc<dyn RetryQueueApi>,
    fallbacks: AtomicUsize,
}

impl FallbackQueue {
    /// Wraps `preferred`, replaying on `alternate`.
    #[must_use]
    pub fn new(preferred: Arc<dyn RetryQueueApi>, alternate: Arc<dyn RetryQueueApi>) -> Self {
        Self {
            preferred,
            alternate,
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Number of calls replayed so far.
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RetryQueueApi for FallbackQueue {
    fn name(&self) -> &str {
        self.preferred.name()
    }

    async fn add_batch_retry_job(&self, request: BatchRetryRequest) -> Result<BatchRetryResponse> {
        match self.preferred.add_batch_retry_job(request.clone()).await {
            Err(err) if err.is_replay_safe() => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    preferred = self.preferred.name(),
                    alternate = self.alternate.name(),
                    error = %err,
                    "Retry queue failed, replaying on alternate"
                );
                self.alternate.add_batch_retry_job(request).await
            }
            other => other,
        }
    }

    fn get_queue_status(&self) -> QueueStatus {
        let a = self.preferred.get_queue_status();
        let b = self.alternate.get_queue_status();
        QueueStatus {
            pending: a.pending + b.pending,
            processing: a.processing + b.processing,
            completed: a.completed + b.completed,
            failed: a.failed + b.failed,
            total: a.total + b.total,
            is_processing: a.is_processing || b.is_processing,
        }
    }

    fn stop(&self) -> usize {
        self.preferred.stop() + self.alternate.stop()
    }

    fn clear_completed_jobs(&self) -> usize {
        self.preferred.clear_completed_jobs() + self.alternate.clear_completed_jobs()
    }
}

fn order<T: ?Sized>(route: Route, primary: Arc<T>, alternate: Arc<T>) -> (Arc<T>, Arc<T>) {
    match route {
        Route::Primary => (primary, alternate),
        Route::Alternate => (alternate, primary),
    }
}

/// Picks the processor implementation the flags prefer.
#[must_use]
pub fn route_processor(
    flags: &RoutingFlags,
    primary: Arc<dyn ArtifactProcessor>,
    alternate: Arc<dyn ArtifactProcessor>,
) -> Arc<dyn ArtifactProcessor> {
    let (preferred, other) = order(flags.processor, primary, alternate);
    if flags.fallback {
        Arc::new(FallbackProcessor::new(preferred, other))
    } else {
        preferred
    }
}

/// Picks the queue implementation the flags prefer.
#[must_use]
pub fn route_queue(
    flags: &RoutingFlags,
    primary: Arc<dyn RetryQueueApi>,
    alternate: Arc<dyn RetryQueueApi>,
) -> Arc<dyn RetryQueueApi> {
    let (preferred, other) = order(flags.queue, primary, alternate);
    if flags.fallback {
        Arc::new(FallbackQueue::new(preferred, other))
    } else {
        preferred
    }
}
