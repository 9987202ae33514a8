//! Ports to external collaborators.
//!
//! Everything the orchestrator and the retry subsystem consume is a trait
//! here. Implementations are injected as `Arc<dyn Trait>`.

mod memory;
mod repository;
mod services;

pub use memory::{InMemoryArtifactRepository, InMemoryRunRepository};
pub use repository::{ArtifactRepository, RunRepository};
pub use services::{
    BackgroundRemover, ConvertOptions, GenerationProvider, GenerationRequest, ImageOps,
    MetadataClient, MetadataContext, QualityGate, QualityVerdict,
};

#[cfg(test)]
pub use repository::MockArtifactRepository;
#[cfg(test)]
pub use services::{MockMetadataClient, MockQualityGate};

use std::sync::Arc;

/// Services the stage pipeline calls into.
#[derive(Clone)]
pub struct StagePorts {
    /// Local image operations.
    pub image_ops: Arc<dyn ImageOps>,
    /// Background-removal service.
    pub background_remover: Option<Arc<dyn BackgroundRemover>>,
    /// Metadata generator.
    pub metadata_client: Option<Arc<dyn MetadataClient>>,
}

impl std::fmt::Debug for StagePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePorts")
            .field("has_background_remover", &self.background_remover.is_some())
            .field("has_metadata_client", &self.metadata_client.is_some())
            .finish()
    }
}

impl StagePorts {
    /// Creates ports with only local image operations.
    #[must_use]
    pub fn new(image_ops: Arc<dyn ImageOps>) -> Self {
        Self {
            image_ops,
            background_remover: None,
            metadata_client: None,
        }
    }

    /// Sets the background-removal service.
    #[must_use]
    pub fn with_background_remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.background_remover = Some(remover);
        self
    }

    /// Sets the metadata generator.
    #[must_use]
    pub fn with_metadata_client(mut self, client: Arc<dyn MetadataClient>) -> Self {
        self.metadata_client = Some(client);
        self
    }
}
