//! Retry jobs, batch requests and queue status.

use crate::core::{FailPolicy, ModifiedSettings, RetryJobStatus};
use crate::errors::ValidationError;
use crate::utils::{generate_uuid, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A request to re-process a set of artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRetryRequest {
    /// Artifacts to re-process, in order.
    pub artifact_ids: Vec<Uuid>,
    /// Re-use each artifact's stored settings snapshot verbatim.
    #[serde(default = "default_use_original")]
    pub use_original_settings: bool,
    /// Settings merged over safe defaults when not using the originals.
    #[serde(default)]
    pub modified_settings: Option<ModifiedSettings>,
    /// Regenerate metadata after processing.
    #[serde(default)]
    pub include_metadata: bool,
    /// Which stage failures are hard.
    #[serde(default)]
    pub fail_policy: FailPolicy,
}

fn default_use_original() -> bool {
    true
}

impl BatchRetryRequest {
    /// Retries the artifacts with their original settings.
    #[must_use]
    pub fn new(artifact_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            artifact_ids: artifact_ids.into_iter().collect(),
            use_original_settings: true,
            modified_settings: None,
            include_metadata: false,
            fail_policy: FailPolicy::lenient(),
        }
    }

    /// Retries with `settings` merged over safe defaults instead.
    #[must_use]
    pub fn with_modified_settings(mut self, settings: ModifiedSettings) -> Self {
        self.use_original_settings = false;
        self.modified_settings = Some(settings);
        self
    }

    /// Regenerates metadata.
    #[must_use]
    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }

    /// Sets the fail policy.
    #[must_use]
    pub fn with_fail_policy(mut self, policy: FailPolicy) -> Self {
        self.fail_policy = policy;
        self
    }

    /// Rejects an empty target list.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.artifact_ids.is_empty() {
            return Err(ValidationError::new("Invalid retry request")
                .with_field("artifact_ids", "must not be empty"));
        }
        Ok(())
    }

    /// Expands the request into one job per target, in order.
    ///
    /// Every job shares one settings payload.
    #[must_use]
    pub fn into_jobs(self) -> Vec<RetryJob> {
        let batch_id = generate_uuid();
        let settings = self.modified_settings.map(Arc::new);

        self.artifact_ids
            .into_iter()
            .map(|artifact_id| RetryJob {
                id: generate_uuid(),
                artifact_id,
                batch_id,
                use_original_settings: self.use_original_settings,
                modified_settings: settings.clone(),
                include_metadata: self.include_metadata,
                fail_policy: self.fail_policy.clone(),
                status: RetryJobStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                error: None,
                qc_reason: None,
            })
            .collect()
    }
}

/// Answer of `add_batch_retry_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRetryResponse {
    /// Whether the batch was queued.
    pub success: bool,
    /// Number of jobs queued.
    pub queued_jobs: usize,
}

/// One artifact to re-process. Owned and mutated by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryJob {
    /// Job identifier.
    pub id: Uuid,
    /// Target artifact.
    pub artifact_id: Uuid,
    /// Batch the job was queued with.
    pub batch_id: Uuid,
    /// Re-use the stored settings snapshot.
    pub use_original_settings: bool,
    /// Settings payload shared across the batch.
    pub modified_settings: Option<Arc<ModifiedSettings>>,
    /// Regenerate metadata.
    pub include_metadata: bool,
    /// Which stage failures are hard.
    pub fail_policy: FailPolicy,
    /// Current status.
    pub status: RetryJobStatus,
    /// When the job was queued.
    pub created_at: Timestamp,
    /// When processing began.
    pub started_at: Option<Timestamp>,
    /// When processing ended.
    pub finished_at: Option<Timestamp>,
    /// Error of a failed job.
    pub error: Option<String>,
    /// Quality reason of a failed job.
    pub qc_reason: Option<String>,
}

impl RetryJob {
    pub(crate) fn begin(&mut self) {
        self.status = RetryJobStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self) {
        self.status = RetryJobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>, qc_reason: Option<String>) {
        self.status = RetryJobStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
        self.qc_reason = qc_reason;
    }
}

/// Counts by status. Reading it never changes the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Waiting jobs.
    pub pending: usize,
    /// 0 or 1.
    pub processing: usize,
    /// Jobs that completed since the history was last cleared.
    pub completed: usize,
    /// Jobs that failed since the history was last cleared.
    pub failed: usize,
    /// Every job the queue knows about.
    pub total: usize,
    /// Whether a drain task is running.
    pub is_processing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_rejected() {
        let err = BatchRetryRequest::new(Vec::new()).validate().unwrap_err();
        assert_eq!(err.fields[0].field, "artifact_ids");
    }

    #[test]
    fn test_jobs_share_settings_payload() {
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let jobs = BatchRetryRequest::new(ids)
            .with_modified_settings(ModifiedSettings {
                sharpening: Some(2.0),
                ..ModifiedSettings::default()
            })
            .into_jobs();

        assert_eq!(jobs.len(), 3);
        let first = jobs[0].modified_settings.as_ref().unwrap();
        for job in &jobs {
            assert!(Arc::ptr_eq(first, job.modified_settings.as_ref().unwrap()));
            assert_eq!(job.batch_id, jobs[0].batch_id);
            assert_eq!(job.status, RetryJobStatus::Pending);
            assert!(!job.use_original_settings);
        }
    }

    #[test]
    fn test_every_target_gets_a_job() {
        let id = Uuid::new_v4();
        let jobs = BatchRetryRequest::new([id, id]).into_jobs();
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].id, jobs[1].id);
    }

    #[test]
    fn test_request_defaults_from_json() {
        let id = Uuid::new_v4();
        let request: BatchRetryRequest =
            serde_json::from_value(serde_json::json!({ "artifact_ids": [id] })).unwrap();

        assert!(request.use_original_settings);
        assert!(!request.include_metadata);
        assert!(!request.fail_policy.enabled);
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = BatchRetryRequest::new([Uuid::new_v4()]).into_jobs().remove(0);
        job.begin();
        assert_eq!(job.status, RetryJobStatus::Processing);
        assert!(job.started_at.is_some());

        job.fail("boom", Some("not_found".into()));
        assert_eq!(job.status, RetryJobStatus::Failed);
        assert_eq!(job.qc_reason.as_deref(), Some("not_found"));
        assert!(job.finished_at.is_some());
    }
}
