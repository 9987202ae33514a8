//! The ordered post-processing stages applied to one artifact.

use crate::cancellation::CancellationToken;
use crate::config::StageTimeouts;
use crate::core::{ArtifactMetadata, FailPolicy, ImageFormat, ProcessingSettings, StageName};
use crate::errors::{GenflowError, Result, StageError};
use crate::observability::SpanTimer;
use crate::ports::{ConvertOptions, MetadataContext, StagePorts};
use crate::utils::extension_or_png;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stages that transform the working file, in execution order.
pub const PROCESSING_STAGES: [StageName; 3] = [
    StageName::BackgroundRemoval,
    StageName::Enhancement,
    StageName::Conversion,
];

/// Inputs shared by every stage of one artifact.
pub struct StageRequest<'a> {
    /// Effective processing settings.
    pub settings: &'a ProcessingSettings,
    /// Which failures are hard.
    pub policy: &'a FailPolicy,
    /// Whether the metadata stage runs.
    pub metadata_active: bool,
    /// Directory for intermediate files.
    pub work_dir: &'a Path,
    /// Checked before every stage.
    pub cancel: &'a CancellationToken,
    /// Called when a stage starts.
    pub on_stage: Option<&'a (dyn Fn(StageName) + Send + Sync)>,
}

impl StageRequest<'_> {
    fn is_hard(&self, stage: StageName) -> bool {
        self.policy
            .is_hard_failure(stage, self.settings, self.metadata_active)
    }

    fn notify(&self, stage: StageName) {
        if let Some(on_stage) = self.on_stage {
            on_stage(stage);
        }
    }
}

/// Result of the processing stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    /// Path after the last stage that succeeded.
    pub path: PathBuf,
    /// Stages that completed, in order.
    pub steps: Vec<StageName>,
    /// Soft failures that were skipped over.
    pub soft_failures: Vec<StageError>,
}

/// Result of a stage that may be skipped over.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The stage succeeded.
    Done(T),
    /// The stage failed softly.
    Skipped(StageError),
}

/// Runs post-processing stages against injected ports.
///
/// Stateless: the same pipeline serves the orchestrator and the retry
/// processor.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    ports: StagePorts,
    timeouts: StageTimeouts,
}

impl StagePipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(ports: StagePorts, timeouts: StageTimeouts) -> Self {
        Self { ports, timeouts }
    }

    /// Replaces the stage timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub fn timeouts(&self) -> &StageTimeouts {
        &self.timeouts
    }

    /// Runs background removal, enhancement and conversion in order.
    ///
    /// Inactive stages are skipped. A soft failure keeps the previous path;
    /// a hard failure returns `GenflowError::Stage`.
    pub async fn process(&self, input: &Path, request: &StageRequest<'_>) -> Result<ProcessedImage> {
        let mut current = input.to_path_buf();
        let mut steps = Vec::new();
        let mut soft_failures = Vec::new();

        for stage in PROCESSING_STAGES {
            if !request.settings.is_stage_active(stage) {
                continue;
            }
            request.cancel.check()?;
            request.notify(stage);

            let result = match stage {
                StageName::BackgroundRemoval => {
                    self.timed(stage, self.remove_background(&current, request)).await
                }
                StageName::Enhancement => self.timed(stage, self.enhance(&current, request)).await,
                StageName::Conversion => self.timed(stage, self.convert(&current, request)).await,
                StageName::FinalPlacement | StageName::Metadata => continue,
            };

            match self.settle(stage, result, request)? {
                StageOutcome::Done(path) => {
                    current = path;
                    steps.push(stage);
                }
                StageOutcome::Skipped(err) => soft_failures.push(err),
            }
        }

        Ok(ProcessedImage {
            path: current,
            steps,
            soft_failures,
        })
    }

    /// Moves the processed file into `output_dir` under `file_name`.
    ///
    /// The extension of `file_name` is replaced by the processed file's.
    pub async fn place(
        &self,
        processed: &Path,
        output_dir: &Path,
        file_name: &str,
        request: &StageRequest<'_>,
    ) -> Result<StageOutcome<PathBuf>> {
        let stage = StageName::FinalPlacement;
        request.cancel.check()?;
        request.notify(stage);

        let target = output_dir
            .join(file_name)
            .with_extension(extension_or_png(processed));
        let ops = self.ports.image_ops.clone();
        let result = self
            .timed(stage, async {
                ops.place(processed, &target).await?;
                Ok(target.clone())
            })
            .await;

        self.settle(stage, result, request)
    }

    /// Generates metadata for the file at `path`.
    pub async fn metadata(
        &self,
        path: &Path,
        context: &MetadataContext,
        request: &StageRequest<'_>,
    ) -> Result<StageOutcome<ArtifactMetadata>> {
        let stage = StageName::Metadata;
        request.cancel.check()?;
        request.notify(stage);

        let result = match &self.ports.metadata_client {
            Some(client) => self.timed(stage, client.generate(path, context)).await,
            None => Err(StageError::new(stage, "no metadata client configured")),
        };

        self.settle(stage, result, request)
    }

    fn settle<T>(
        &self,
        stage: StageName,
        result: std::result::Result<T, StageError>,
        request: &StageRequest<'_>,
    ) -> Result<StageOutcome<T>> {
        match result {
            Ok(value) => Ok(StageOutcome::Done(value)),
            Err(err) if request.is_hard(stage) => {
                warn!(stage = %stage, error = %err.message, timed_out = err.timed_out, "Stage failed (hard)");
                Err(err.into())
            }
            Err(err) => {
                warn!(stage = %stage, error = %err.message, timed_out = err.timed_out, "Stage failed (soft), continuing");
                Ok(StageOutcome::Skipped(err))
            }
        }
    }

    async fn timed<T, F>(&self, stage: StageName, fut: F) -> std::result::Result<T, StageError>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.timeouts.for_stage(stage);
        let timer = SpanTimer::start(stage.as_str());

        let result = match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StageError::from_error(stage, &err)),
            Err(_) => Err(StageError::timeout(stage, limit)),
        };

        timer.finish(result.is_ok());
        result
    }

    async fn remove_background(&self, input: &Path, request: &StageRequest<'_>) -> Result<PathBuf> {
        let remover = self.ports.background_remover.as_ref().ok_or_else(|| {
            GenflowError::from(StageError::new(
                StageName::BackgroundRemoval,
                "no background remover configured",
            ))
        })?;

        let ops = &self.ports.image_ops;
        let image = ops.read(input).await?;
        let output = remover.remove(image, &request.settings.remove_bg_size).await?;

        let path = derived_path(request.work_dir, input, "nobg", "png");
        ops.write(&path, &output).await?;
        debug!(path = %path.display(), "Background removed");
        Ok(path)
    }

    async fn enhance(&self, input: &Path, request: &StageRequest<'_>) -> Result<PathBuf> {
        let settings = request.settings;
        let ops = &self.ports.image_ops;

        let mut image = ops.read(input).await?;
        if settings.sharpening > 0.0 {
            image = ops.sharpen(image, settings.sharpening).await?;
        }
        if (settings.saturation - 1.0).abs() > f64::EPSILON {
            image = ops.saturate(image, settings.saturation).await?;
        }

        let path = derived_path(request.work_dir, input, "enhanced", &extension_or_png(input));
        ops.write(&path, &image).await?;
        Ok(path)
    }

    async fn convert(&self, input: &Path, request: &StageRequest<'_>) -> Result<PathBuf> {
        let settings = request.settings;
        let ops = &self.ports.image_ops;

        let mut image = ops.read(input).await?;
        if settings.trim_transparent_background {
            image = ops.trim(image).await?;
        }

        let format = settings.convert_to;
        let options = ConvertOptions {
            format,
            quality: match format {
                ImageFormat::Png => settings.png_quality,
                ImageFormat::Jpg | ImageFormat::Webp => settings.jpg_quality,
            },
            background: (!format.supports_alpha()).then(|| settings.jpg_background.clone()),
        };
        let image = ops.convert(image, &options).await?;

        let path = derived_path(request.work_dir, input, "converted", format.extension());
        ops.write(&path, &image).await?;
        Ok(path)
    }
}

fn derived_path(dir: &Path, input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    dir.join(format!("{stem}_{suffix}.{extension}"))
}
