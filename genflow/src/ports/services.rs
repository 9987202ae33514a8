//! External service ports.
//!
//! Providers are opaque: each port receives plain inputs and returns plain
//! outputs, and wire protocols live entirely behind the trait.

use crate::config::Dimensions;
use crate::core::{ArtifactMetadata, ImageFormat};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The run the call belongs to.
    pub run_id: Uuid,
    /// Zero-based item index.
    pub item_index: u32,
    /// Zero-based variation within the item's group.
    pub variation: u32,
    /// Resolved prompt.
    pub prompt: String,
    /// Seed passed to the provider.
    pub seed: u32,
    /// Provider model id.
    pub model: String,
    /// Requested dimensions.
    pub dimensions: Dimensions,
    /// Requested format.
    pub format: ImageFormat,
}

/// Produces images from prompts.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name used in errors and logs.
    fn name(&self) -> &str;

    /// Starts a generation and returns result URLs.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>>;

    /// Downloads one result into `dir` and returns the file path.
    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf>;
}

/// Result of a quality check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// Whether the image passed.
    pub passed: bool,
    /// The gate's explanation.
    pub reason: Option<String>,
}

impl QualityVerdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    /// A failing verdict with an explanation.
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Automated image quality gate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QualityGate: Send + Sync {
    /// Inspects the image at `path`.
    async fn check(&self, path: &Path) -> Result<QualityVerdict>;
}

/// Context given to the metadata generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataContext {
    /// The prompt the image was generated from.
    pub prompt: String,
    /// Keyword used for the item, if any.
    pub keyword: Option<String>,
}

/// Generates title, description and tags for an image.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Describes the image at `path`.
    async fn generate(&self, path: &Path, context: &MetadataContext) -> Result<ArtifactMetadata>;
}

/// Removes image backgrounds.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Returns the image with its background removed, as PNG bytes.
    async fn remove(&self, image: Vec<u8>, size: &str) -> Result<Vec<u8>>;
}

/// Parameters of a format conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Target format.
    pub format: ImageFormat,
    /// Encoder quality, 1 to 100.
    pub quality: u8,
    /// Background colour used when the target has no alpha channel.
    pub background: Option<String>,
}

/// Local image operations.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Reads a file.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Writes a file, creating parent directories as needed.
    async fn write(&self, path: &Path, image: &[u8]) -> Result<()>;

    /// Sharpens with the given strength.
    async fn sharpen(&self, image: Vec<u8>, strength: f64) -> Result<Vec<u8>>;

    /// Multiplies saturation by `factor`.
    async fn saturate(&self, image: Vec<u8>, factor: f64) -> Result<Vec<u8>>;

    /// Re-encodes the image.
    async fn convert(&self, image: Vec<u8>, options: &ConvertOptions) -> Result<Vec<u8>>;

    /// Crops fully transparent edges.
    async fn trim(&self, image: Vec<u8>) -> Result<Vec<u8>>;

    /// Moves a processed file to its final location.
    async fn place(&self, from: &Path, to: &Path) -> Result<()>;
}
