//! Re-processing of a single artifact.

use super::RetryJob;
use crate::cancellation::CancellationToken;
use crate::config::{JobConfig, StageTimeouts};
use crate::core::{
    Artifact, ArtifactMetadata, ArtifactPatch, ModifiedSettings, ProcessingSettings,
    QualityStatus, StageName,
};
use crate::errors::{GenflowError, NotFoundError, Result};
use crate::pipeline::{StageOutcome, StagePipeline, StageRequest};
use crate::ports::{ArtifactRepository, MetadataContext, StagePorts};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of re-processing one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Whether the artifact ended approved.
    pub success: bool,
    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fixed-vocabulary reason for a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qc_reason: Option<String>,
    /// Stages that ran, in order.
    pub steps: Vec<StageName>,
}

/// Re-processes the artifact a retry job targets.
///
/// `Ok` with `success == false` means the artifact was processed and ended
/// `failed_retry`. `Err` means the job could not be carried out at all.
#[async_trait]
pub trait ArtifactProcessor: Send + Sync {
    /// Implementation name used in logs.
    fn name(&self) -> &str;

    /// Processes one job.
    ///
    /// Once `cancel` fires no result is persisted, and an artifact already
    /// marked `processing` goes back to `retry_pending`.
    async fn process_image(&self, job: &RetryJob, cancel: &CancellationToken)
        -> Result<ProcessOutcome>;
}

struct Retried {
    steps: Vec<StageName>,
    final_path: PathBuf,
    metadata: Option<ArtifactMetadata>,
}

/// Re-runs the stage pipeline against the stored artifact.
#[derive(Clone)]
pub struct RetryProcessor {
    artifacts: Arc<dyn ArtifactRepository>,
    pipeline: StagePipeline,
    output_dir: PathBuf,
    work_dir: PathBuf,
}

impl std::fmt::Debug for RetryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProcessor")
            .field("pipeline", &self.pipeline)
            .field("output_dir", &self.output_dir)
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

impl RetryProcessor {
    /// Creates a processor placing results in `output_dir`.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        ports: StagePorts,
        output_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            artifacts,
            pipeline: StagePipeline::new(ports, StageTimeouts::default()),
            output_dir: output_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Creates a processor using a job configuration's directories and
    /// timeouts.
    #[must_use]
    pub fn from_config(
        artifacts: Arc<dyn ArtifactRepository>,
        ports: StagePorts,
        config: &JobConfig,
    ) -> Self {
        Self::new(
            artifacts,
            ports,
            config.file_paths.output_directory.clone(),
            config.file_paths.temp_directory.clone(),
        )
        .with_timeouts(config.timeouts)
    }

    /// Replaces the stage timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.pipeline = self.pipeline.with_timeouts(timeouts);
        self
    }

    /// Resolves the settings a job runs with.
    #[must_use]
    pub fn effective_settings(job: &RetryJob, artifact: &Artifact) -> ProcessingSettings {
        if job.use_original_settings {
            artifact.processing_settings.clone()
        } else {
            job.modified_settings
                .as_deref()
                .map_or_else(ProcessingSettings::safe_defaults, ModifiedSettings::resolve)
        }
    }

    async fn mark_processing(&self, artifact: &Artifact) -> Result<()> {
        let status = artifact.quality_status;
        if status == QualityStatus::Processing {
            return Ok(());
        }
        if status != QualityStatus::RetryPending {
            self.artifacts
                .update_quality_status(artifact.id, QualityStatus::RetryPending, artifact.reason())
                .await?;
        }
        self.artifacts
            .update_quality_status(artifact.id, QualityStatus::Processing, None)
            .await
    }

    async fn release(&self, artifact_id: Uuid) {
        match self
            .artifacts
            .update_quality_status(artifact_id, QualityStatus::RetryPending, None)
            .await
        {
            Ok(()) => debug!(artifact_id = %artifact_id, "Cancelled retry released artifact"),
            Err(err) => warn!(artifact_id = %artifact_id, error = %err, "Could not release cancelled artifact"),
        }
    }

    async fn run_stages(
        &self,
        job: &RetryJob,
        artifact: &Artifact,
        request: &StageRequest<'_>,
    ) -> Result<Retried> {
        let processed = self
            .pipeline
            .process(&artifact.working_path, request)
            .await?;
        let mut steps = processed.steps.clone();

        let mut metadata = None;
        if job.include_metadata {
            let context = MetadataContext {
                prompt: artifact.prompt.clone(),
                keyword: None,
            };
            if let StageOutcome::Done(generated) = self
                .pipeline
                .metadata(&processed.path, &context, request)
                .await?
            {
                steps.push(StageName::Metadata);
                metadata = Some(generated);
            }
        }

        let file_name = artifact
            .final_path
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map_or_else(|| format!("{}.png", artifact.id.simple()), String::from);
        let final_path = match self
            .pipeline
            .place(&processed.path, &self.output_dir, &file_name, request)
            .await?
        {
            StageOutcome::Done(path) => {
                steps.push(StageName::FinalPlacement);
                path
            }
            StageOutcome::Skipped(_) => processed.path.clone(),
        };

        Ok(Retried {
            steps,
            final_path,
            metadata,
        })
    }
}

#[async_trait]
impl ArtifactProcessor for RetryProcessor {
    fn name(&self) -> &str {
        "retry-processor"
    }

    async fn process_image(
        &self,
        job: &RetryJob,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        cancel.check()?;
        let artifact = self
            .artifacts
            .get(job.artifact_id)
            .await?
            .ok_or_else(|| NotFoundError::new("artifact", job.artifact_id))?;

        info!(job_id = %job.id, artifact_id = %artifact.id, original_settings = job.use_original_settings, "Retrying artifact");
        self.mark_processing(&artifact).await?;

        let settings = Self::effective_settings(job, &artifact);
        let request = StageRequest {
            settings: &settings,
            policy: &job.fail_policy,
            metadata_active: job.include_metadata,
            work_dir: &self.work_dir,
            cancel,
            on_stage: None,
        };

        let (mut patch, outcome) = match self.run_stages(job, &artifact, &request).await {
            Ok(retried) => {
                let mut patch = ArtifactPatch::new()
                    .with_status(QualityStatus::Approved)
                    .with_reason(None)
                    .with_final_path(Some(retried.final_path));
                if let Some(metadata) = retried.metadata {
                    patch = patch.with_metadata(metadata);
                }
                let outcome = ProcessOutcome {
                    success: true,
                    error: None,
                    qc_reason: None,
                    steps: retried.steps,
                };
                (patch, outcome)
            }
            Err(err @ GenflowError::Cancelled(_)) => {
                self.release(artifact.id).await;
                return Err(err);
            }
            Err(err) => {
                let reason = err.quality_reason();
                warn!(job_id = %job.id, artifact_id = %artifact.id, reason = %reason, error = %err, "Retry failed");
                let patch = ArtifactPatch::new()
                    .with_status(QualityStatus::FailedRetry)
                    .with_reason(Some(&reason));
                let outcome = ProcessOutcome {
                    success: false,
                    error: Some(err.to_string()),
                    qc_reason: Some(reason.to_string()),
                    steps: Vec::new(),
                };
                (patch, outcome)
            }
        };

        if !job.use_original_settings {
            patch = patch.with_settings(settings.clone());
        }

        if let Err(err) = cancel.check() {
            self.release(artifact.id).await;
            return Err(err);
        }
        self.artifacts.update(artifact.id, &patch).await?;
        debug!(job_id = %job.id, success = outcome.success, steps = ?outcome.steps, "Retry persisted");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailPolicy, ImageFormat};
    use crate::errors::PersistenceError;
    use crate::ports::{ImageOps, MockArtifactRepository};
    use crate::retry::BatchRetryRequest;
    use crate::testing::TestPorts;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn processor(ports: &TestPorts) -> RetryProcessor {
        RetryProcessor::new(ports.artifacts.clone(), ports.stage_ports(), "/out", "/work")
    }

    fn job(request: BatchRetryRequest) -> RetryJob {
        request.into_jobs().remove(0)
    }

    fn enhancing() -> ProcessingSettings {
        ProcessingSettings {
            image_enhancement: true,
            sharpening: 7.5,
            ..ProcessingSettings::safe_defaults()
        }
    }

    #[tokio::test]
    async fn test_original_settings_are_left_untouched() {
        let ports = TestPorts::new();
        let artifact = ports.seed_artifact(QualityStatus::QcFailed, enhancing());
        let before = serde_json::to_vec(&artifact.processing_settings).unwrap();

        let outcome = processor(&ports)
            .process_image(&job(BatchRetryRequest::new([artifact.id])), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.steps, vec![StageName::Enhancement, StageName::FinalPlacement]);

        let stored = ports.artifacts.snapshot(artifact.id).unwrap();
        assert_eq!(stored.quality_status, QualityStatus::Approved);
        assert!(stored.quality_reason.is_none());
        assert_eq!(serde_json::to_vec(&stored.processing_settings).unwrap(), before);
        assert!(stored.final_path.unwrap().starts_with("/out"));
    }

    #[tokio::test]
    async fn test_modified_settings_become_snapshot() {
        let ports = TestPorts::new();
        let artifact = ports.seed_artifact(QualityStatus::Approved, enhancing());
        let request = BatchRetryRequest::new([artifact.id]).with_modified_settings(ModifiedSettings {
            image_convert: Some(true),
            convert_to: Some(ImageFormat::Jpg),
            sharpening: Some(99.0),
            ..ModifiedSettings::default()
        });

        let outcome = processor(&ports)
            .process_image(&job(request), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.steps, vec![StageName::Conversion, StageName::FinalPlacement]);
        let stored = ports.artifacts.snapshot(artifact.id).unwrap();
        assert!(stored.processing_settings.image_convert);
        assert!(!stored.processing_settings.image_enhancement);
        assert!((stored.processing_settings.sharpening - 10.0).abs() < f64::EPSILON);
        assert_eq!(stored.final_path.unwrap().extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn test_hard_failure_marks_failed_retry() {
        let ports = TestPorts::new();
        ports.image_ops.fail_on("sharpen");
        let artifact = ports.seed_artifact(QualityStatus::QcFailed, enhancing());
        let request = BatchRetryRequest::new([artifact.id])
            .with_fail_policy(FailPolicy::strict([StageName::Enhancement]));

        let outcome = processor(&ports)
            .process_image(&job(request), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.qc_reason.as_deref(), Some("processing_failed:enhancement"));
        let stored = ports.artifacts.snapshot(artifact.id).unwrap();
        assert_eq!(stored.quality_status, QualityStatus::FailedRetry);
        assert_eq!(stored.quality_reason.as_deref(), Some("processing_failed:enhancement"));
    }

    #[tokio::test]
    async fn test_soft_failure_places_working_file() {
        let ports = TestPorts::new();
        ports.image_ops.fail_on("sharpen");
        let artifact = ports.seed_artifact(QualityStatus::QcFailed, enhancing());
        let request = BatchRetryRequest::new([artifact.id])
            .with_fail_policy(FailPolicy::strict([StageName::Conversion]));

        let outcome = processor(&ports)
            .process_image(&job(request), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.steps, vec![StageName::FinalPlacement]);
        assert_eq!(ports.image_ops.calls(), vec!["read", "sharpen", "place"]);

        let stored = ports.artifacts.snapshot(artifact.id).unwrap();
        assert_eq!(stored.quality_status, QualityStatus::Approved);
        assert!(stored.quality_reason.is_none());
        let final_path = stored.final_path.unwrap();
        assert!(final_path.starts_with("/out"));
        assert_eq!(final_path.extension().unwrap(), "png");
        let placed = ImageOps::read(&*ports.image_ops, &final_path).await.unwrap();
        assert_eq!(placed, format!("image:{}", artifact.working_path.display()).into_bytes());
    }

    #[tokio::test]
    async fn test_metadata_regenerated_on_request() {
        let ports = TestPorts::new();
        let artifact = ports.seed_artifact(QualityStatus::Approved, ProcessingSettings::safe_defaults());

        let outcome = processor(&ports)
            .process_image(
                &job(BatchRetryRequest::new([artifact.id]).with_metadata()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.steps.contains(&StageName::Metadata));
        assert_eq!(ports.metadata.call_count(), 1);
        let stored = ports.artifacts.snapshot(artifact.id).unwrap();
        assert_eq!(stored.metadata.unwrap().title, "a lighthouse at dusk");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let ports = TestPorts::new();

        let err = processor(&ports)
            .process_image(&job(BatchRetryRequest::new([uuid::Uuid::new_v4()])), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.quality_reason().to_string(), "not_found");
    }

    #[tokio::test]
    async fn test_cancelled_job_writes_nothing() {
        let ports = TestPorts::new();
        let artifact = ports.seed_artifact(QualityStatus::RetryPending, ProcessingSettings::safe_defaults());
        let writes = ports.artifacts.write_count();
        let cancel = CancellationToken::new();
        cancel.cancel("retry queue stopped");

        let err = processor(&ports)
            .process_image(&job(BatchRetryRequest::new([artifact.id])), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GenflowError::Cancelled(_)));
        assert_eq!(ports.artifacts.write_count(), writes);
    }

    #[tokio::test]
    async fn test_cancel_mid_stage_releases_artifact() {
        let ports = TestPorts::new();
        ports.image_ops.delay_on("sharpen", Duration::from_millis(100));
        let artifact = ports.seed_artifact(QualityStatus::QcFailed, enhancing());
        let cancel = Arc::new(CancellationToken::new());

        let processor = processor(&ports);
        let retry = job(BatchRetryRequest::new([artifact.id]));
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { processor.process_image(&retry, &task_cancel).await });

        for _ in 0..100 {
            if ports.artifacts.snapshot(artifact.id).unwrap().quality_status == QualityStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel("retry queue stopped");

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, GenflowError::Cancelled(_)));
        let stored = ports.artifacts.snapshot(artifact.id).unwrap();
        assert_eq!(stored.quality_status, QualityStatus::RetryPending);
        assert_eq!(stored.final_path, artifact.final_path);
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces() {
        let ports = TestPorts::new();
        let artifact = ports.seed_artifact(QualityStatus::RetryPending, ProcessingSettings::safe_defaults());
        let stored = artifact.clone();

        let mut repo = MockArtifactRepository::new();
        repo.expect_get()
            .returning(move |_| Ok(Some(stored.clone())));
        repo.expect_update_quality_status()
            .times(1)
            .returning(|_, _, _| Ok(()));
        repo.expect_update()
            .times(1)
            .returning(|id, _| Err(PersistenceError::new("artifact", id, "database is locked").into()));

        let processor = RetryProcessor::new(Arc::new(repo), ports.stage_ports(), "/out", "/work");
        let err = processor
            .process_image(&job(BatchRetryRequest::new([artifact.id])), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.quality_reason().to_string(), "persistence_failed");
    }
}
