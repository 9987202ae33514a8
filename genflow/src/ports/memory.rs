//! In-memory repositories.

use super::{ArtifactRepository, RunRepository};
use crate::core::{Artifact, ArtifactMetadata, ArtifactPatch, QualityReason, QualityStatus, Run};
use crate::errors::{PersistenceError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Artifact store backed by a concurrent map.
///
/// Rejects status writes that the quality-status state machine does not
/// allow.
#[derive(Debug, Default)]
pub struct InMemoryArtifactRepository {
    artifacts: DashMap<Uuid, Artifact>,
    writes: AtomicUsize,
}

impl InMemoryArtifactRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the write counter.
    pub fn insert(&self, artifact: Artifact) {
        self.artifacts.insert(artifact.id, artifact);
    }

    /// Returns a copy of a record.
    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<Artifact> {
        self.artifacts.get(&id).map(|a| a.clone())
    }

    /// Returns every record of a run, ordered by creation time.
    #[must_use]
    pub fn by_run(&self, run_id: Uuid) -> Vec<Artifact> {
        let mut artifacts: Vec<Artifact> = self
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id)
            .map(|a| a.clone())
            .collect();
        artifacts.sort_by_key(|a| a.created_at);
        artifacts
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Number of successful writes through the repository trait.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn modify(&self, id: Uuid, patch: &ArtifactPatch) -> Result<Artifact> {
        let mut entry = self
            .artifacts
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::new("artifact", id, "no such record"))?;

        if let Some(next) = patch.quality_status {
            if !entry.quality_status.can_transition_to(next) {
                return Err(PersistenceError::new(
                    "artifact",
                    id,
                    format!(
                        "illegal status transition {} -> {}",
                        entry.quality_status, next
                    ),
                )
                .into());
            }
        }

        entry.apply(patch);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(entry.clone())
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn save(&self, artifact: &Artifact) -> Result<()> {
        if self.artifacts.contains_key(&artifact.id) {
            return Err(PersistenceError::new("artifact", artifact.id, "already exists").into());
        }
        self.artifacts.insert(artifact.id, artifact.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Artifact>> {
        Ok(self.snapshot(id))
    }

    async fn update(&self, id: Uuid, patch: &ArtifactPatch) -> Result<Artifact> {
        self.modify(id, patch)
    }

    async fn update_quality_status(
        &self,
        id: Uuid,
        status: QualityStatus,
        reason: Option<QualityReason>,
    ) -> Result<()> {
        let patch = ArtifactPatch::new()
            .with_status(status)
            .with_reason(reason.as_ref());
        self.modify(id, &patch).map(|_| ())
    }

    async fn update_metadata(&self, id: Uuid, metadata: &ArtifactMetadata) -> Result<()> {
        let patch = ArtifactPatch::new().with_metadata(metadata.clone());
        self.modify(id, &patch).map(|_| ())
    }
}

/// Run store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: DashMap<Uuid, Run>,
    statistics_writes: AtomicUsize,
}

impl InMemoryRunRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a record.
    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<Run> {
        self.runs.get(&id).map(|r| r.clone())
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of `update_statistics` calls.
    #[must_use]
    pub fn statistics_writes(&self) -> usize {
        self.statistics_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &Run) -> Result<()> {
        if self.runs.contains_key(&run.id) {
            return Err(PersistenceError::new("run", run.id, "already exists").into());
        }
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let mut entry = self
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| PersistenceError::new("run", run.id, "no such record"))?;
        *entry = run.clone();
        Ok(())
    }

    async fn update_statistics(&self, id: Uuid, successful_items: u32, failed_items: u32) -> Result<()> {
        let mut entry = self
            .runs
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::new("run", id, "no such record"))?;

        if successful_items.saturating_add(failed_items) > entry.total_items {
            return Err(PersistenceError::new(
                "run",
                id,
                "resolved items exceed total items",
            )
            .into());
        }
        entry.successful_items = successful_items;
        entry.failed_items = failed_items;
        self.statistics_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.snapshot(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ProcessingSettings, RunStatus};
    use pretty_assertions::assert_eq;

    fn artifact() -> Artifact {
        Artifact::new(
            Uuid::new_v4(),
            "a red kite",
            7,
            "/tmp/work/a.png",
            ProcessingSettings::safe_defaults(),
        )
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = InMemoryArtifactRepository::new();
        let a = artifact();
        repo.save(&a).await.unwrap();

        assert_eq!(repo.get(a.id).await.unwrap(), Some(a.clone()));
        assert!(repo.save(&a).await.is_err());
        assert_eq!(repo.write_count(), 1);
    }

    #[tokio::test]
    async fn test_legal_transitions() {
        let repo = InMemoryArtifactRepository::new();
        let a = artifact();
        repo.save(&a).await.unwrap();

        repo.update_quality_status(a.id, QualityStatus::QcFailed, Some(QualityReason::QcError))
            .await
            .unwrap();
        repo.update_quality_status(a.id, QualityStatus::RetryPending, None)
            .await
            .unwrap();

        let stored = repo.snapshot(a.id).unwrap();
        assert_eq!(stored.quality_status, QualityStatus::RetryPending);
        assert_eq!(stored.quality_reason, None);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_persistence_error() {
        let repo = InMemoryArtifactRepository::new();
        let a = artifact();
        repo.save(&a).await.unwrap();

        let err = repo
            .update_quality_status(a.id, QualityStatus::Processing, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PersistenceError");
        assert_eq!(repo.snapshot(a.id).unwrap().quality_status, QualityStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_missing_artifact() {
        let repo = InMemoryArtifactRepository::new();
        let err = repo
            .update(Uuid::new_v4(), &ArtifactPatch::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PersistenceError");
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let repo = InMemoryArtifactRepository::new();
        let a = artifact();
        repo.save(&a).await.unwrap();

        let metadata = ArtifactMetadata::new("Kite", "A red kite", vec!["Kite".into(), "kite".into()]);
        repo.update_metadata(a.id, &metadata).await.unwrap();

        let stored = repo.snapshot(a.id).unwrap();
        assert_eq!(stored.metadata.unwrap().tags, vec!["kite".to_string()]);
    }

    #[tokio::test]
    async fn test_run_statistics_bounded_by_total() {
        let repo = InMemoryRunRepository::new();
        let run = Run::start(4, None, None, serde_json::json!({}), String::new());
        repo.save(&run).await.unwrap();

        repo.update_statistics(run.id, 2, 1).await.unwrap();
        assert!(repo.update_statistics(run.id, 4, 1).await.is_err());

        let stored = repo.snapshot(run.id).unwrap();
        assert_eq!((stored.successful_items, stored.failed_items), (2, 1));
        assert_eq!(repo.statistics_writes(), 1);
    }

    #[tokio::test]
    async fn test_run_update_replaces_record() {
        let repo = InMemoryRunRepository::new();
        let mut run = Run::start(1, None, None, serde_json::json!({}), String::new());
        repo.save(&run).await.unwrap();

        run.finish(RunStatus::Completed, None);
        repo.update(&run).await.unwrap();

        assert_eq!(repo.get(run.id).await.unwrap().unwrap().status, RunStatus::Completed);
    }
}
