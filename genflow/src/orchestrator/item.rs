//! Per-item execution of a run.

use super::{LoopEnd, Orchestrator, PromptPlan, ResolvedPrompt};
use crate::cancellation::CancellationToken;
use crate::config::JobConfig;
use crate::core::{
    Artifact, GenflowEvent, ProgressStep, QualityReason, QualityStatus, StageName,
};
use crate::errors::{GenflowError, ProviderError, Result};
use crate::pipeline::{
    evaluate_quality, with_retry, QualityDecision, RetryConfig, StageOutcome, StagePipeline,
    StageRequest,
};
use crate::ports::{GenerationRequest, MetadataContext};
use crate::utils::{artifact_file_name, extension_or_png};
use futures::future::join_all;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How one item resolved.
#[derive(Debug)]
enum ItemOutcome {
    Completed(Vec<Uuid>),
    Failed {
        reason: QualityReason,
        error: Option<String>,
    },
    /// A stop arrived mid-item; the item is not counted.
    Interrupted,
}

impl ItemOutcome {
    fn failed(reason: QualityReason, error: Option<String>) -> Self {
        Self::Failed { reason, error }
    }

    fn into_event(self, run_id: Uuid, item: u32) -> Option<GenflowEvent> {
        match self {
            Self::Completed(artifact_ids) => {
                debug!(run_id = %run_id, item, artifacts = artifact_ids.len(), "Item completed");
                Some(GenflowEvent::ItemCompleted {
                    run_id,
                    item,
                    artifact_ids,
                })
            }
            Self::Failed { reason, error } => {
                warn!(run_id = %run_id, item, reason = %reason, error = ?error, "Item failed");
                Some(GenflowEvent::ItemFailed {
                    run_id,
                    item,
                    reason: reason.to_string(),
                    error,
                })
            }
            Self::Interrupted => None,
        }
    }
}

/// Inputs shared by every step of one item.
struct ItemContext<'a> {
    run_id: Uuid,
    index: u32,
    total: u32,
    config: &'a JobConfig,
    pipeline: &'a StagePipeline,
    stop: &'a CancellationToken,
}

impl ItemContext<'_> {
    /// One-based item number.
    fn item(&self) -> u32 {
        self.index + 1
    }
}

/// Separates cancellation from failures that become a quality reason.
fn failure_reason(err: GenflowError) -> Result<QualityReason> {
    match err {
        GenflowError::Cancelled(_) => Err(err),
        other => Ok(other.quality_reason()),
    }
}

fn reject(mut artifact: Artifact, reason: QualityReason) -> Artifact {
    artifact.quality_status = QualityStatus::QcFailed;
    artifact.quality_reason = Some(reason.to_string());
    artifact.final_path = None;
    artifact
}

impl Orchestrator {
    /// Runs every item of the run in order.
    ///
    /// Only run-record persistence failures abort the loop; everything else
    /// fails the single item.
    pub(super) async fn execute(
        &self,
        run_id: Uuid,
        config: &JobConfig,
        plan: &PromptPlan,
        stop: &CancellationToken,
    ) -> Result<LoopEnd> {
        let total = config.generation.total_items();
        let pipeline = StagePipeline::new(self.inner.stage_ports.clone(), config.timeouts);
        let mut rng = plan.rng();

        for index in 0..total {
            if stop.is_cancelled() {
                info!(run_id = %run_id, item = index + 1, "Run stopped at item boundary");
                return Ok(LoopEnd::Stopped);
            }

            let ctx = ItemContext {
                run_id,
                index,
                total,
                config,
                pipeline: &pipeline,
                stop,
            };
            self.progress(run_id, ProgressStep::Prompting, ctx.item(), total);
            let prompt = plan.resolve(index, &mut rng);
            let seed = plan.seed_for(index, &mut rng);

            let outcome = match self.run_item(&ctx, &prompt, seed).await {
                Ok(outcome) => outcome,
                Err(GenflowError::Cancelled(_)) => ItemOutcome::Interrupted,
                Err(err) => ItemOutcome::failed(err.quality_reason(), Some(err.to_string())),
            };
            if matches!(outcome, ItemOutcome::Interrupted) {
                info!(run_id = %run_id, item = ctx.item(), "Run stopped mid-item");
                return Ok(LoopEnd::Stopped);
            }

            let success = matches!(outcome, ItemOutcome::Completed(_));
            let Some(run) = self.record_item(success) else {
                return Ok(LoopEnd::Stopped);
            };
            self.persist_statistics(&run).await?;

            if let Some(event) = outcome.into_event(run_id, ctx.item()) {
                self.inner.sink.try_emit(event);
            }
        }

        Ok(LoopEnd::Finished)
    }

    async fn run_item(
        &self,
        ctx: &ItemContext<'_>,
        prompt: &ResolvedPrompt,
        seed: u32,
    ) -> Result<ItemOutcome> {
        let generation = &ctx.config.generation;
        let request = GenerationRequest {
            run_id: ctx.run_id,
            item_index: ctx.index,
            variation: ctx.index % generation.variations.max(1),
            prompt: prompt.text.clone(),
            seed,
            model: generation.model.clone(),
            dimensions: generation.dimensions,
            format: generation.format,
        };

        self.progress(ctx.run_id, ProgressStep::Generating, ctx.item(), ctx.total);
        let urls = match self.generate(ctx, &request).await {
            Ok(urls) if urls.is_empty() => {
                return Ok(ItemOutcome::failed(
                    QualityReason::GenerationFailed,
                    Some("provider returned no results".to_string()),
                ));
            }
            Ok(urls) => urls,
            Err(err @ GenflowError::Cancelled(_)) => return Err(err),
            Err(err) => {
                return Ok(ItemOutcome::failed(
                    QualityReason::GenerationFailed,
                    Some(err.to_string()),
                ))
            }
        };

        ctx.stop.check()?;
        let downloads = join_all(urls.iter().map(|url| self.download(ctx, url))).await;
        let mut downloaded = Vec::with_capacity(urls.len());
        for download in downloads {
            match download {
                Ok(path) => downloaded.push(path),
                Err(err @ GenflowError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    return Ok(ItemOutcome::failed(
                        QualityReason::GenerationFailed,
                        Some(err.to_string()),
                    ))
                }
            }
        }

        let mut artifact_ids = Vec::with_capacity(urls.len());
        let mut first_rejection = None;

        for (result, (url, working)) in urls.iter().zip(downloaded).enumerate() {
            ctx.stop.check()?;
            let artifact = self
                .evaluate_artifact(ctx, prompt, seed, url, working, result)
                .await?;

            self.progress(ctx.run_id, ProgressStep::Persisting, ctx.item(), ctx.total);
            if let Err(err) = self.inner.artifacts.save(&artifact).await {
                return Ok(ItemOutcome::failed(
                    QualityReason::PersistenceFailed,
                    Some(err.to_string()),
                ));
            }

            if first_rejection.is_none() && artifact.quality_status != QualityStatus::Approved {
                first_rejection = Some(artifact.reason().unwrap_or(QualityReason::InternalError));
            }
            artifact_ids.push(artifact.id);
        }

        Ok(match first_rejection {
            Some(reason) => ItemOutcome::failed(reason, None),
            None => ItemOutcome::Completed(artifact_ids),
        })
    }

    async fn generate(
        &self,
        ctx: &ItemContext<'_>,
        request: &GenerationRequest,
    ) -> Result<Vec<String>> {
        let generation = &ctx.config.generation;
        let retry = RetryConfig::constant(generation.retry_attempts, generation.retry_backoff());
        let limit = ctx.config.timeouts.generation();
        let provider = self.inner.provider.as_ref();

        with_retry(&retry, "generate", ctx.stop, |attempt| async move {
            if attempt > 0 {
                debug!(item = request.item_index + 1, attempt = attempt + 1, "Retrying generation");
            }
            match tokio::time::timeout(limit, provider.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::new(
                    provider.name(),
                    format!("generation timed out after {}ms", limit.as_millis()),
                )
                .into()),
            }
        })
        .await
    }

    async fn download(&self, ctx: &ItemContext<'_>, url: &str) -> Result<PathBuf> {
        let limit = ctx.config.timeouts.download();
        let provider = self.inner.provider.as_ref();
        let dir = &ctx.config.file_paths.temp_directory;

        match tokio::time::timeout(limit, provider.download(url, dir)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                provider.name(),
                format!("download timed out after {}ms", limit.as_millis()),
            )
            .into()),
        }
    }

    /// Processes, checks, describes and places one downloaded result.
    ///
    /// Returns the artifact in its final status, ready to be saved. Only
    /// cancellation is returned as an error.
    async fn evaluate_artifact(
        &self,
        ctx: &ItemContext<'_>,
        prompt: &ResolvedPrompt,
        seed: u32,
        url: &str,
        working: PathBuf,
        result: usize,
    ) -> Result<Artifact> {
        let config = ctx.config;
        let settings = &config.processing.settings;
        let mut artifact = Artifact::new(ctx.run_id, prompt.text.clone(), seed, working, settings.clone())
            .with_source_url(url);

        let notify = |stage: StageName| {
            self.progress(ctx.run_id, ProgressStep::Processing(stage), ctx.item(), ctx.total);
        };
        let request = StageRequest {
            settings,
            policy: &config.processing.fail_policy,
            metadata_active: config.metadata_enabled(),
            work_dir: &config.file_paths.temp_directory,
            cancel: ctx.stop,
            on_stage: Some(&notify),
        };

        let processed = match ctx.pipeline.process(&artifact.working_path, &request).await {
            Ok(processed) => processed,
            Err(err) => return Ok(reject(artifact, failure_reason(err)?)),
        };

        if config.ai.quality_check {
            ctx.stop.check()?;
            self.progress(ctx.run_id, ProgressStep::QualityCheck, ctx.item(), ctx.total);
            let decision = match &self.inner.quality_gate {
                Some(gate) => {
                    evaluate_quality(gate.as_ref(), &processed.path, config.timeouts.quality_check())
                        .await
                }
                None => {
                    warn!("Quality check enabled without a quality gate");
                    QualityDecision::Failed(QualityReason::QcError)
                }
            };
            if let QualityDecision::Failed(reason) = decision {
                return Ok(reject(artifact, reason));
            }
        }

        if request.metadata_active {
            let context = MetadataContext {
                prompt: prompt.text.clone(),
                keyword: prompt.keyword.clone(),
            };
            match ctx.pipeline.metadata(&processed.path, &context, &request).await {
                Ok(StageOutcome::Done(metadata)) => artifact.metadata = Some(metadata),
                Ok(StageOutcome::Skipped(_)) => {}
                Err(err) => return Ok(reject(artifact, failure_reason(err)?)),
            }
        }

        let file_name = artifact_file_name(
            &ctx.run_id,
            ctx.item(),
            result,
            &extension_or_png(&processed.path),
        );
        let final_path = match ctx
            .pipeline
            .place(&processed.path, &config.file_paths.output_directory, &file_name, &request)
            .await
        {
            Ok(StageOutcome::Done(path)) => path,
            Ok(StageOutcome::Skipped(_)) => processed.path.clone(),
            Err(err) => return Ok(reject(artifact, failure_reason(err)?)),
        };

        artifact.quality_status = QualityStatus::Approved;
        artifact.quality_reason = None;
        artifact.final_path = Some(final_path);
        Ok(artifact)
    }
}
