//! Run, artifact, and retry-job status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started.
    #[default]
    Pending,
    /// Items are being generated.
    Running,
    /// Every item resolved.
    Completed,
    /// Aborted by an error.
    Failed,
    /// Stopped on request.
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl RunStatus {
    /// Returns true if the run can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// The quality status of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    /// Not yet assessed.
    #[default]
    Pending,
    /// Passed every gate.
    Approved,
    /// Rejected by the quality gate or a hard stage failure.
    QcFailed,
    /// Queued for a retry.
    RetryPending,
    /// Being re-processed.
    Processing,
    /// The retry itself failed.
    FailedRetry,
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::QcFailed => write!(f, "qc_failed"),
            Self::RetryPending => write!(f, "retry_pending"),
            Self::Processing => write!(f, "processing"),
            Self::FailedRetry => write!(f, "failed_retry"),
        }
    }
}

impl QualityStatus {
    /// Returns true if `next` is a legal successor of this status.
    ///
    /// Writing the same status again is always allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Approved | Self::QcFailed),
            Self::Approved | Self::QcFailed | Self::FailedRetry => next == Self::RetryPending,
            Self::RetryPending => next == Self::Processing,
            Self::Processing => matches!(
                next,
                Self::Approved | Self::FailedRetry | Self::RetryPending
            ),
        }
    }

    /// Returns true if the artifact can be queued for a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.can_transition_to(Self::RetryPending)
    }
}

/// The status of a queued retry job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryJobStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Currently delegated to the processor.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for RetryJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RetryJobStatus {
    /// Returns true if the job has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Running.to_string(), "running");
        assert_eq!(RunStatus::Stopped.to_string(), "stopped");
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_quality_status_serialize() {
        let json = serde_json::to_string(&QualityStatus::QcFailed).unwrap();
        assert_eq!(json, r#""qc_failed""#);

        let parsed: QualityStatus = serde_json::from_str(r#""failed_retry""#).unwrap();
        assert_eq!(parsed, QualityStatus::FailedRetry);
    }

    #[test]
    fn test_quality_status_generation_transitions() {
        assert!(QualityStatus::Pending.can_transition_to(QualityStatus::Approved));
        assert!(QualityStatus::Pending.can_transition_to(QualityStatus::QcFailed));
        assert!(!QualityStatus::Pending.can_transition_to(QualityStatus::Processing));
    }

    #[test]
    fn test_quality_status_retry_transitions() {
        assert!(QualityStatus::QcFailed.can_transition_to(QualityStatus::RetryPending));
        assert!(QualityStatus::RetryPending.can_transition_to(QualityStatus::Processing));
        assert!(QualityStatus::Processing.can_transition_to(QualityStatus::Approved));
        assert!(QualityStatus::Processing.can_transition_to(QualityStatus::FailedRetry));
        assert!(!QualityStatus::RetryPending.can_transition_to(QualityStatus::Approved));
        assert!(!QualityStatus::FailedRetry.can_transition_to(QualityStatus::Approved));
    }

    #[test]
    fn test_quality_status_retryable() {
        assert!(QualityStatus::Approved.is_retryable());
        assert!(QualityStatus::FailedRetry.is_retryable());
        assert!(!QualityStatus::Pending.is_retryable());
        assert!(QualityStatus::RetryPending.is_retryable());
    }

    #[test]
    fn test_retry_job_status() {
        assert_eq!(RetryJobStatus::default(), RetryJobStatus::Pending);
        assert!(RetryJobStatus::Failed.is_terminal());
        assert!(!RetryJobStatus::Processing.is_terminal());
    }
}
