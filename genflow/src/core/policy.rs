//! Soft/hard stage failure policy.

use super::{ProcessingSettings, StageName};
use serde::{Deserialize, Serialize};

/// Decides which stage failures abort processing.
///
/// A stage failure is hard only when the policy is enabled, selects the
/// stage, and the stage is part of the active pipeline. Every other failure
/// is soft: the stage's output is replaced by its input and processing
/// continues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailPolicy {
    /// Whether any failure can be hard.
    pub enabled: bool,
    /// Stages whose failure is hard.
    pub selected_stages: Vec<StageName>,
}

impl FailPolicy {
    /// A policy under which every failure is soft.
    #[must_use]
    pub fn lenient() -> Self {
        Self::default()
    }

    /// A policy that makes the given stages hard-fail.
    #[must_use]
    pub fn strict(stages: impl IntoIterator<Item = StageName>) -> Self {
        Self {
            enabled: true,
            selected_stages: stages.into_iter().collect(),
        }
    }

    /// Returns true if the policy selects the stage.
    #[must_use]
    pub fn selects(&self, stage: StageName) -> bool {
        self.enabled && self.selected_stages.contains(&stage)
    }

    /// Returns true if a failure of `stage` must abort processing.
    ///
    /// `metadata_active` tells whether the metadata stage runs at all, since
    /// processing settings do not carry that toggle.
    #[must_use]
    pub fn is_hard_failure(
        &self,
        stage: StageName,
        settings: &ProcessingSettings,
        metadata_active: bool,
    ) -> bool {
        let active = match stage {
            StageName::Metadata => metadata_active,
            other => settings.is_stage_active(other),
        };
        active && self.selects(stage)
    }
}
