//! The generation run record.

use super::RunStatus;
use crate::utils::{generate_uuid, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub id: Uuid,
    /// Identifier of the configuration the run was started from.
    pub config_id: Option<String>,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run reached a terminal status.
    pub completed_at: Option<Timestamp>,
    /// Total items requested (`count * variations`).
    pub total_items: u32,
    /// Items that produced at least one approved artifact set.
    pub successful_items: u32,
    /// Items that failed.
    pub failed_items: u32,
    /// Optional user label.
    pub label: Option<String>,
    /// Redacted configuration captured at start.
    pub config_snapshot: serde_json::Value,
    /// Hex SHA-256 of `config_snapshot`.
    pub config_fingerprint: String,
    /// Error that ended the run, if any.
    pub error: Option<String>,
}

impl Run {
    /// Creates a running run.
    #[must_use]
    pub fn start(
        total_items: u32,
        config_id: Option<String>,
        label: Option<String>,
        config_snapshot: serde_json::Value,
        config_fingerprint: String,
    ) -> Self {
        Self {
            id: generate_uuid(),
            config_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total_items,
            successful_items: 0,
            failed_items: 0,
            label,
            config_snapshot,
            config_fingerprint,
            error: None,
        }
    }

    /// Number of items that have resolved either way.
    #[must_use]
    pub fn resolved_items(&self) -> u32 {
        self.successful_items + self.failed_items
    }

    /// Records one successful item. Counts never exceed `total_items`.
    pub fn record_success(&mut self) {
        if self.resolved_items() < self.total_items {
            self.successful_items += 1;
        }
    }

    /// Records one failed item. Counts never exceed `total_items`.
    pub fn record_failure(&mut self) {
        if self.resolved_items() < self.total_items {
            self.failed_items += 1;
        }
    }

    /// Moves the run into a terminal status.
    ///
    /// A run that is already terminal keeps its first status.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error = error;
    }
}
