//! Persistence ports.

use crate::core::{Artifact, ArtifactMetadata, ArtifactPatch, QualityReason, QualityStatus, Run};
use crate::errors::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Stores artifact records.
///
/// Implementations are responsible for their own write safety; the
/// orchestrator and the retry queue may write concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Inserts a new artifact.
    async fn save(&self, artifact: &Artifact) -> Result<()>;

    /// Loads an artifact by id.
    async fn get(&self, id: Uuid) -> Result<Option<Artifact>>;

    /// Applies a patch and returns the updated record.
    async fn update(&self, id: Uuid, patch: &ArtifactPatch) -> Result<Artifact>;

    /// Writes status and reason together.
    async fn update_quality_status(
        &self,
        id: Uuid,
        status: QualityStatus,
        reason: Option<QualityReason>,
    ) -> Result<()>;

    /// Replaces the metadata.
    async fn update_metadata(&self, id: Uuid, metadata: &ArtifactMetadata) -> Result<()>;
}

/// Stores run records.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Inserts a new run.
    async fn save(&self, run: &Run) -> Result<()>;

    /// Replaces a run record.
    async fn update(&self, run: &Run) -> Result<()>;

    /// Writes only the item counters.
    async fn update_statistics(&self, id: Uuid, successful_items: u32, failed_items: u32) -> Result<()>;

    /// Loads a run by id.
    async fn get(&self, id: Uuid) -> Result<Option<Run>>;
}
