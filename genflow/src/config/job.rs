//! Job configuration consumed by the orchestrator.

use crate::core::{FailPolicy, ImageFormat, ProcessingSettings, StageName};
use crate::core::{MAX_SATURATION, MAX_SHARPENING, MIN_SATURATION, MIN_SHARPENING};
use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Highest accepted variation count per item group.
pub const MAX_VARIATIONS: u32 = 20;
/// Highest accepted generation count per run.
pub const MAX_COUNT: u32 = 2500;

/// Full configuration of one generation job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Identifier of the saved configuration, if any.
    #[serde(default)]
    pub config_id: Option<String>,
    /// Optional run label.
    #[serde(default)]
    pub label: Option<String>,
    /// Provider credentials.
    #[serde(default)]
    pub api_keys: ApiKeys,
    /// File-system locations.
    #[serde(default)]
    pub file_paths: FilePaths,
    /// Generation parameters.
    #[serde(default)]
    pub generation: GenerationParams,
    /// Post-processing toggles and fail policy.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Quality gate and metadata toggles.
    #[serde(default)]
    pub ai: AiToggles,
    /// Per-stage timeouts.
    #[serde(default)]
    pub timeouts: StageTimeouts,
    /// Routing facade flags.
    #[serde(default)]
    pub routing: RoutingFlags,
}

/// Provider credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Key for the generation provider.
    #[serde(default)]
    pub generation: Option<String>,
    /// Key for the vision/LLM provider used by the quality gate and metadata.
    #[serde(default)]
    pub openai: Option<String>,
    /// Key for the background-removal service.
    #[serde(default)]
    pub remove_bg: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("has_generation", &has_value(self.generation.as_deref()))
            .field("has_openai", &has_value(self.openai.as_deref()))
            .field("has_remove_bg", &has_value(self.remove_bg.as_deref()))
            .finish()
    }
}

fn has_value(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// File-system locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePaths {
    /// Where approved artifacts are placed.
    #[serde(default)]
    pub output_directory: PathBuf,
    /// Where downloads and intermediate files are written.
    #[serde(default)]
    pub temp_directory: PathBuf,
}

/// How keywords are picked for each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMode {
    /// Generation group modulo the keyword count.
    #[default]
    Sequential,
    /// A random keyword per item.
    Random,
}

/// Output dimensions requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Provider model id.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base prompt, used when no template is set.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Prompt template with `{keyword}`, `{index}`, `{variation}` placeholders.
    #[serde(default)]
    pub template: Option<String>,
    /// Keywords substituted into the template.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keyword selection mode.
    #[serde(default)]
    pub keyword_mode: KeywordMode,
    /// Number of generations.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Variations per generation.
    #[serde(default = "default_variations")]
    pub variations: u32,
    /// Requested dimensions.
    #[serde(default)]
    pub dimensions: Dimensions,
    /// Requested output format.
    #[serde(default)]
    pub format: ImageFormat,
    /// Fixed base seed; random when absent.
    #[serde(default)]
    pub seed: Option<u32>,
    /// Attempts per generation call, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    /// Delay between attempts in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_model() -> String {
    "default".to_string()
}

fn default_count() -> u32 {
    1
}

fn default_variations() -> u32 {
    1
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: default_model(),
            prompt: None,
            template: None,
            keywords: Vec::new(),
            keyword_mode: KeywordMode::default(),
            count: default_count(),
            variations: default_variations(),
            dimensions: Dimensions::default(),
            format: ImageFormat::default(),
            seed: None,
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl GenerationParams {
    /// Total items of a run (`count * variations`).
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.count.saturating_mul(self.variations)
    }

    /// Delay between generation attempts.
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Post-processing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Stage toggles and parameters.
    #[serde(flatten)]
    pub settings: ProcessingSettings,
    /// Which stage failures are hard.
    #[serde(default)]
    pub fail_policy: FailPolicy,
}

/// Toggles for the AI-backed stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiToggles {
    /// Run the quality gate.
    #[serde(default)]
    pub quality_check: bool,
    /// Generate metadata.
    #[serde(default)]
    pub metadata: bool,
}

/// Per-stage timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    /// Generation call.
    pub generation_ms: u64,
    /// Result download.
    pub download_ms: u64,
    /// Background removal.
    pub background_removal_ms: u64,
    /// Enhancement.
    pub enhancement_ms: u64,
    /// Conversion.
    pub conversion_ms: u64,
    /// Final placement.
    pub final_placement_ms: u64,
    /// Quality gate.
    pub quality_check_ms: u64,
    /// Metadata generation.
    pub metadata_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            generation_ms: 300_000,
            download_ms: 60_000,
            background_removal_ms: 60_000,
            enhancement_ms: 30_000,
            conversion_ms: 30_000,
            final_placement_ms: 10_000,
            quality_check_ms: 60_000,
            metadata_ms: 60_000,
        }
    }
}

impl StageTimeouts {
    /// Timeout for one post-processing stage.
    #[must_use]
    pub const fn for_stage(&self, stage: StageName) -> Duration {
        let ms = match stage {
            StageName::BackgroundRemoval => self.background_removal_ms,
            StageName::Enhancement => self.enhancement_ms,
            StageName::Conversion => self.conversion_ms,
            StageName::FinalPlacement => self.final_placement_ms,
            StageName::Metadata => self.metadata_ms,
        };
        Duration::from_millis(ms)
    }

    /// Timeout for the generation call.
    #[must_use]
    pub const fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }

    /// Timeout for downloading a result.
    #[must_use]
    pub const fn download(&self) -> Duration {
        Duration::from_millis(self.download_ms)
    }

    /// Timeout for the quality gate.
    #[must_use]
    pub const fn quality_check(&self) -> Duration {
        Duration::from_millis(self.quality_check_ms)
    }

    fn entries(&self) -> [(&'static str, u64); 8] {
        [
            ("generation_ms", self.generation_ms),
            ("download_ms", self.download_ms),
            ("background_removal_ms", self.background_removal_ms),
            ("enhancement_ms", self.enhancement_ms),
            ("conversion_ms", self.conversion_ms),
            ("final_placement_ms", self.final_placement_ms),
            ("quality_check_ms", self.quality_check_ms),
            ("metadata_ms", self.metadata_ms),
        ]
    }
}

/// Which implementation a routed capability prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// The primary implementation.
    #[default]
    Primary,
    /// The alternate implementation.
    Alternate,
}

/// Routing facade flags, read once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingFlags {
    /// Preferred retry processor implementation.
    pub processor: Route,
    /// Preferred retry queue implementation.
    pub queue: Route,
    /// Replay failed calls against the other implementation.
    pub fallback: bool,
}

impl Default for RoutingFlags {
    fn default() -> Self {
        Self {
            processor: Route::Primary,
            queue: Route::Primary,
            fallback: true,
        }
    }
}

impl JobConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the metadata stage is part of the pipeline.
    #[must_use]
    pub fn metadata_enabled(&self) -> bool {
        self.ai.metadata
    }

    /// Checks every field and reports all problems at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::new("Invalid job configuration");

        if !has_value(self.api_keys.generation.as_deref()) {
            err.push("api_keys.generation", "missing generation provider key");
        }
        if (self.ai.quality_check || self.ai.metadata) && !has_value(self.api_keys.openai.as_deref()) {
            err.push("api_keys.openai", "required when quality check or metadata is enabled");
        }
        if self.processing.settings.remove_bg && !has_value(self.api_keys.remove_bg.as_deref()) {
            err.push("api_keys.remove_bg", "required when background removal is enabled");
        }

        self.validate_paths(&mut err);
        self.validate_generation(&mut err);
        self.validate_processing(&mut err);

        for (name, ms) in self.timeouts.entries() {
            if ms == 0 {
                err.push(format!("timeouts.{name}"), "must be greater than zero");
            }
        }

        err.into_result()
    }

    fn validate_paths(&self, err: &mut ValidationError) {
        let output = &self.file_paths.output_directory;
        let temp = &self.file_paths.temp_directory;

        if output.as_os_str().is_empty() {
            err.push("file_paths.output_directory", "must not be empty");
        } else if output.to_string_lossy().contains('\0') {
            err.push("file_paths.output_directory", "contains a NUL byte");
        }
        if temp.as_os_str().is_empty() {
            err.push("file_paths.temp_directory", "must not be empty");
        } else if temp.to_string_lossy().contains('\0') {
            err.push("file_paths.temp_directory", "contains a NUL byte");
        }
        if !output.as_os_str().is_empty() && output == temp {
            err.push("file_paths.temp_directory", "must differ from the output directory");
        }
    }

    fn validate_generation(&self, err: &mut ValidationError) {
        let generation = &self.generation;

        if generation.count == 0 || generation.count > MAX_COUNT {
            err.push("generation.count", format!("must be between 1 and {MAX_COUNT}"));
        }
        if generation.variations == 0 || generation.variations > MAX_VARIATIONS {
            err.push(
                "generation.variations",
                format!("must be between 1 and {MAX_VARIATIONS}"),
            );
        }
        if generation.dimensions.width == 0 || generation.dimensions.height == 0 {
            err.push("generation.dimensions", "width and height must be positive");
        }
        if generation.retry_attempts == 0 {
            err.push("generation.retry_attempts", "must be at least 1");
        }
        if generation.model.trim().is_empty() {
            err.push("generation.model", "must not be empty");
        }

        let has_prompt = has_value(generation.prompt.as_deref())
            || has_value(generation.template.as_deref())
            || generation.keywords.iter().any(|k| !k.trim().is_empty());
        if !has_prompt {
            err.push("generation.prompt", "a prompt, template or keyword list is required");
        }
    }

    fn validate_processing(&self, err: &mut ValidationError) {
        let settings = &self.processing.settings;

        if !(MIN_SHARPENING..=MAX_SHARPENING).contains(&settings.sharpening) {
            err.push(
                "processing.sharpening",
                format!("must be between {MIN_SHARPENING} and {MAX_SHARPENING}"),
            );
        }
        if !(MIN_SATURATION..=MAX_SATURATION).contains(&settings.saturation) {
            err.push(
                "processing.saturation",
                format!("must be between {MIN_SATURATION} and {MAX_SATURATION}"),
            );
        }
        if !(1..=100).contains(&settings.jpg_quality) {
            err.push("processing.jpg_quality", "must be between 1 and 100");
        }
        if !(1..=100).contains(&settings.png_quality) {
            err.push("processing.png_quality", "must be between 1 and 100");
        }
        if !is_hex_colour(&settings.jpg_background) {
            err.push("processing.jpg_background", "must be a #RRGGBB colour");
        }
    }
}

fn is_hex_colour(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}
