//! Fixtures shared by unit tests and embedders' tests.

use std::path::Path;
use std::sync::Arc;

use super::{
    FakeBackgroundRemover, FakeGenerationProvider, FakeImageOps, FakeMetadataClient,
    FakeQualityGate,
};
use crate::config::{ApiKeys, FilePaths, GenerationParams, JobConfig};
use crate::core::{Artifact, ProcessingSettings, QualityReason, QualityStatus};
use crate::ports::{InMemoryArtifactRepository, InMemoryRunRepository, StagePorts};
use uuid::Uuid;

/// A valid configuration writing under `root`.
///
/// Every optional stage, the quality gate and metadata start disabled, and
/// provider retries use a 1 ms delay.
#[must_use]
pub fn test_config(root: &Path) -> JobConfig {
    JobConfig {
        api_keys: ApiKeys {
            generation: Some("test-generation-key".into()),
            openai: Some("test-openai-key".into()),
            remove_bg: Some("test-remove-bg-key".into()),
        },
        file_paths: FilePaths {
            output_directory: root.join("out"),
            temp_directory: root.join("tmp"),
        },
        generation: GenerationParams {
            prompt: Some("a lighthouse at dusk".into()),
            retry_backoff_ms: 1,
            ..GenerationParams::default()
        },
        ..JobConfig::default()
    }
}

/// Every fake port plus in-memory repositories.
#[derive(Debug, Clone)]
pub struct TestPorts {
    /// Artifact store.
    pub artifacts: Arc<InMemoryArtifactRepository>,
    /// Run store.
    pub runs: Arc<InMemoryRunRepository>,
    /// Generation provider.
    pub provider: Arc<FakeGenerationProvider>,
    /// Quality gate.
    pub quality_gate: Arc<FakeQualityGate>,
    /// Metadata client.
    pub metadata: Arc<FakeMetadataClient>,
    /// Background remover.
    pub remover: Arc<FakeBackgroundRemover>,
    /// Image operations.
    pub image_ops: Arc<FakeImageOps>,
}

impl Default for TestPorts {
    fn default() -> Self {
        Self {
            artifacts: Arc::new(InMemoryArtifactRepository::new()),
            runs: Arc::new(InMemoryRunRepository::new()),
            provider: Arc::new(FakeGenerationProvider::new()),
            quality_gate: Arc::new(FakeQualityGate::passing()),
            metadata: Arc::new(FakeMetadataClient::new()),
            remover: Arc::new(FakeBackgroundRemover::new()),
            image_ops: Arc::new(FakeImageOps::new()),
        }
    }
}

impl TestPorts {
    /// Creates the default set of fakes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the generation provider.
    #[must_use]
    pub fn with_provider(mut self, provider: FakeGenerationProvider) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Replaces the quality gate.
    #[must_use]
    pub fn with_quality_gate(mut self, gate: FakeQualityGate) -> Self {
        self.quality_gate = Arc::new(gate);
        self
    }

    /// Replaces the metadata client.
    #[must_use]
    pub fn with_metadata(mut self, client: FakeMetadataClient) -> Self {
        self.metadata = Arc::new(client);
        self
    }

    /// Replaces the background remover.
    #[must_use]
    pub fn with_remover(mut self, remover: FakeBackgroundRemover) -> Self {
        self.remover = Arc::new(remover);
        self
    }

    /// Stage ports wired to the fakes.
    #[must_use]
    pub fn stage_ports(&self) -> StagePorts {
        StagePorts::new(self.image_ops.clone())
            .with_background_remover(self.remover.clone())
            .with_metadata_client(self.metadata.clone())
    }

    /// Stores an artifact in the given status and returns it.
    pub fn seed_artifact(&self, status: QualityStatus, settings: ProcessingSettings) -> Artifact {
        let mut artifact = Artifact::new(
            Uuid::new_v4(),
            "a lighthouse at dusk",
            42,
            format!("/tmp/genflow-work/{}.png", Uuid::new_v4().simple()),
            settings,
        );
        artifact.quality_status = status;
        if status == QualityStatus::QcFailed {
            artifact.quality_reason = Some(QualityReason::rejected("blurry").to_string());
        }
        self.artifacts.insert(artifact.clone());
        artifact
    }
}
