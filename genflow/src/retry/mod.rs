//! Re-processing of existing artifacts.
//!
//! This module provides:
//! - Batch retry requests and the jobs they expand into
//! - The retry processor that re-runs the stage pipeline for one artifact
//! - A single-drain background queue
//! - Routing between interchangeable processor and queue implementations

mod job;
mod processor;
mod queue;
mod routing;

pub use job::{BatchRetryRequest, BatchRetryResponse, QueueStatus, RetryJob};
pub use processor::{ArtifactProcessor, ProcessOutcome, RetryProcessor};
pub use queue::RetryQueue;
pub use routing::{route_processor, route_queue, FallbackProcessor, FallbackQueue, RetryQueueApi};
