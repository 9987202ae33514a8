//! Orchestrator lifecycle and progress snapshots.

use crate::core::{ProgressStep, RunStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Orchestrator lifecycle.
///
/// `Idle → Starting → Running → {Completed | Failed | Stopped}`; a terminal
/// state may start again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Nothing has run yet.
    #[default]
    Idle,
    /// Validating and creating the run.
    Starting,
    /// Processing items.
    Running,
    /// The last run finished.
    Completed,
    /// The last run failed.
    Failed,
    /// The last run was stopped.
    Stopped,
}

impl OrchestratorState {
    /// Returns true while a run is being set up or processed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl From<RunStatus> for OrchestratorState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Pending => Self::Starting,
            RunStatus::Running => Self::Running,
            RunStatus::Completed => Self::Completed,
            RunStatus::Failed => Self::Failed,
            RunStatus::Stopped => Self::Stopped,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Answer of `Orchestrator::get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Lifecycle state.
    pub state: OrchestratorState,
    /// The current or last run.
    pub run_id: Option<Uuid>,
    /// Error that ended the last run.
    pub last_error: Option<String>,
}

/// Answer of `Orchestrator::get_progress`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunProgress {
    /// Current step.
    pub step: Option<ProgressStep>,
    /// One-based index of the current item.
    pub item: u32,
    /// Total items.
    pub total: u32,
    /// Successful items so far.
    pub successful: u32,
    /// Failed items so far.
    pub failed: u32,
}
