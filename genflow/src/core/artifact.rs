//! The generated artifact record.

use super::{ProcessingSettings, QualityReason, QualityStatus};
use crate::utils::{generate_uuid, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Upper bound on stored tags per artifact.
pub const MAX_TAGS: usize = 50;

/// Descriptive metadata attached to an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Search tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ArtifactMetadata {
    /// Creates metadata, normalizing the tag list.
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            title: title.into().trim().to_string(),
            description: description.into().trim().to_string(),
            tags: normalize_tags(tags),
        }
    }

    /// Returns true if nothing useful was generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty() && self.tags.is_empty()
    }
}

/// Trims, lowercases and de-duplicates tags, keeping first-seen order.
#[must_use]
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_TAGS)
        .collect()
}

/// One generated item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact identifier.
    pub id: Uuid,
    /// The run that produced it.
    pub run_id: Uuid,
    /// The resolved generation prompt.
    pub prompt: String,
    /// Generation seed.
    pub seed: u32,
    /// URL the provider returned.
    pub source_url: Option<String>,
    /// Current quality status.
    pub quality_status: QualityStatus,
    /// Reason for a non-approved status.
    pub quality_reason: Option<String>,
    /// Path of the downloaded, unprocessed file.
    pub working_path: PathBuf,
    /// Path after final placement.
    pub final_path: Option<PathBuf>,
    /// Settings the artifact was processed with.
    pub processing_settings: ProcessingSettings,
    /// Generated metadata.
    pub metadata: Option<ArtifactMetadata>,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When the record was last written.
    pub updated_at: Timestamp,
}

impl Artifact {
    /// Creates a pending artifact for a freshly downloaded file.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        prompt: impl Into<String>,
        seed: u32,
        working_path: impl Into<PathBuf>,
        processing_settings: ProcessingSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_uuid(),
            run_id,
            prompt: prompt.into(),
            seed,
            source_url: None,
            quality_status: QualityStatus::Pending,
            quality_reason: None,
            working_path: working_path.into(),
            final_path: None,
            processing_settings,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the source URL.
    #[must_use]
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Parses the stored reason against the fixed vocabulary.
    #[must_use]
    pub fn reason(&self) -> Option<QualityReason> {
        self.quality_reason.as_deref().and_then(|r| r.parse().ok())
    }

    /// Applies a patch in place.
    pub fn apply(&mut self, patch: &ArtifactPatch) {
        if let Some(status) = patch.quality_status {
            self.quality_status = status;
        }
        if let Some(ref reason) = patch.quality_reason {
            self.quality_reason.clone_from(reason);
        }
        if let Some(ref path) = patch.final_path {
            self.final_path.clone_from(path);
        }
        if let Some(ref settings) = patch.processing_settings {
            self.processing_settings = settings.clone();
        }
        if let Some(ref metadata) = patch.metadata {
            self.metadata = Some(metadata.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// A partial update of an artifact.
///
/// Absent fields are left untouched. Every present field is an absolute
/// value, so applying the same patch twice has the same effect as once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPatch {
    /// New quality status.
    pub quality_status: Option<QualityStatus>,
    /// New reason; `Some(None)` clears it.
    pub quality_reason: Option<Option<String>>,
    /// New final path; `Some(None)` clears it.
    pub final_path: Option<Option<PathBuf>>,
    /// New settings snapshot.
    pub processing_settings: Option<ProcessingSettings>,
    /// New metadata.
    pub metadata: Option<ArtifactMetadata>,
}

impl ArtifactPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the quality status.
    #[must_use]
    pub fn with_status(mut self, status: QualityStatus) -> Self {
        self.quality_status = Some(status);
        self
    }

    /// Sets or clears the quality reason.
    #[must_use]
    pub fn with_reason(mut self, reason: Option<&QualityReason>) -> Self {
        self.quality_reason = Some(reason.map(ToString::to_string));
        self
    }

    /// Sets the final path.
    #[must_use]
    pub fn with_final_path(mut self, path: Option<PathBuf>) -> Self {
        self.final_path = Some(path);
        self
    }

    /// Replaces the settings snapshot.
    #[must_use]
    pub fn with_settings(mut self, settings: ProcessingSettings) -> Self {
        self.processing_settings = Some(settings);
        self
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ArtifactMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageName;

    fn artifact() -> Artifact {
        Artifact::new(
            generate_uuid(),
            "a red fox",
            42,
            "/tmp/work/fox.png",
            ProcessingSettings::safe_defaults(),
        )
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(vec![
            " Fox ".into(),
            "fox".into(),
            String::new(),
            "Forest".into(),
        ]);
        assert_eq!(tags, vec!["fox".to_string(), "forest".to_string()]);
    }

    #[test]
    fn test_normalize_tags_limit() {
        let tags = normalize_tags((0..80).map(|i| format!("tag{i}")).collect());
        assert_eq!(tags.len(), MAX_TAGS);
    }

    #[test]
    fn test_new_artifact_is_pending() {
        let artifact = artifact();
        assert_eq!(artifact.quality_status, QualityStatus::Pending);
        assert!(artifact.reason().is_none());
        assert!(artifact.final_path.is_none());
    }

    #[test]
    fn test_patch_leaves_absent_fields() {
        let mut artifact = artifact();
        let before = artifact.processing_settings.clone();

        let reason = QualityReason::from(StageName::Conversion);
        artifact.apply(
            &ArtifactPatch::new()
                .with_status(QualityStatus::QcFailed)
                .with_reason(Some(&reason)),
        );

        assert_eq!(artifact.quality_status, QualityStatus::QcFailed);
        assert_eq!(artifact.reason(), Some(reason));
        assert_eq!(artifact.processing_settings, before);
    }

    #[test]
    fn test_patch_clears_reason() {
        let mut artifact = artifact();
        artifact.quality_reason = Some("qc_error".into());
        artifact.apply(&ArtifactPatch::new().with_reason(None));
        assert!(artifact.quality_reason.is_none());
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut once = artifact();
        let mut twice = once.clone();
        let patch = ArtifactPatch::new()
            .with_status(QualityStatus::Approved)
            .with_final_path(Some("/out/fox.png".into()));

        once.apply(&patch);
        twice.apply(&patch);
        twice.apply(&patch);

        assert_eq!(once.quality_status, twice.quality_status);
        assert_eq!(once.final_path, twice.final_path);
    }
}
