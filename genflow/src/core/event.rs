//! The fixed event vocabulary emitted by runs and the retry queue.

use super::{RetryJobStatus, RunStatus, StageName};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The step a run is currently in, reported with progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStep {
    /// Checking configuration.
    Validating,
    /// Resolving the prompt for the next item.
    Prompting,
    /// Waiting on the generation provider.
    Generating,
    /// Running one post-processing stage.
    Processing(StageName),
    /// Waiting on the quality gate.
    QualityCheck,
    /// Writing records.
    Persisting,
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Prompting => write!(f, "prompting"),
            Self::Generating => write!(f, "generating"),
            Self::Processing(stage) => write!(f, "processing:{stage}"),
            Self::QualityCheck => write!(f, "quality-check"),
            Self::Persisting => write!(f, "persisting"),
        }
    }
}

/// An event published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GenflowEvent {
    /// A run moved to a new step.
    Progress {
        /// The run.
        run_id: Uuid,
        /// The current step.
        step: ProgressStep,
        /// One-based index of the current item.
        count: u32,
        /// Total items in the run.
        total: u32,
    },
    /// An item resolved successfully.
    ItemCompleted {
        /// The run.
        run_id: Uuid,
        /// One-based item index.
        item: u32,
        /// Artifacts persisted for the item.
        artifact_ids: Vec<Uuid>,
    },
    /// An item failed.
    ItemFailed {
        /// The run.
        run_id: Uuid,
        /// One-based item index.
        item: u32,
        /// Fixed-vocabulary reason.
        reason: String,
        /// Underlying error message.
        error: Option<String>,
    },
    /// A run reached a terminal status without an error.
    RunCompleted {
        /// The run.
        run_id: Uuid,
        /// Completed or stopped.
        status: RunStatus,
        /// Successful items.
        successful_items: u32,
        /// Failed items.
        failed_items: u32,
        /// Total items.
        total_items: u32,
    },
    /// A run was aborted by an error.
    RunError {
        /// The run, if it was created.
        run_id: Option<Uuid>,
        /// Error message.
        error: String,
    },
    /// A retry job finished.
    QueueProgress {
        /// The job.
        job_id: Uuid,
        /// The artifact it targeted.
        artifact_id: Uuid,
        /// Terminal job status.
        status: RetryJobStatus,
        /// Fixed-vocabulary reason for a failed job.
        qc_reason: Option<String>,
        /// Error message for a failed job.
        error: Option<String>,
        /// Jobs finished since the queue last went idle.
        processed: usize,
        /// Jobs left in the queue.
        remaining: usize,
    },
    /// The queue drained.
    QueueCompleted {
        /// Jobs finished during the drain.
        processed: usize,
        /// How many of them failed.
        failed: usize,
    },
    /// The processing loop terminated unexpectedly.
    QueueError {
        /// Error message.
        error: String,
    },
}

impl GenflowEvent {
    /// Returns the event type tag.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::ItemCompleted { .. } => "item-completed",
            Self::ItemFailed { .. } => "item-failed",
            Self::RunCompleted { .. } => "run-completed",
            Self::RunError { .. } => "run-error",
            Self::QueueProgress { .. } => "queue-progress",
            Self::QueueCompleted { .. } => "queue-completed",
            Self::QueueError { .. } => "queue-error",
        }
    }

    /// Returns true for events that end a run or a queue drain.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. }
                | Self::RunError { .. }
                | Self::QueueCompleted { .. }
                | Self::QueueError { .. }
        )
    }

    /// Serializes the event payload.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
