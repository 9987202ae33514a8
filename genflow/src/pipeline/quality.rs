//! Quality gate evaluation.

use crate::core::QualityReason;
use crate::observability::SpanTimer;
use crate::ports::QualityGate;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// What the quality gate decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityDecision {
    /// The artifact passed.
    Approved,
    /// The artifact failed with the given reason.
    Failed(QualityReason),
}

/// Runs the gate under a timeout.
///
/// Rejection maps to `qc_rejected` with the gate's explanation; a gate error
/// or timeout maps to `qc_error`.
pub async fn evaluate(gate: &dyn QualityGate, path: &Path, timeout: Duration) -> QualityDecision {
    let timer = SpanTimer::start("quality-check");
    let result = tokio::time::timeout(timeout, gate.check(path)).await;
    timer.finish(matches!(result, Ok(Ok(_))));

    match result {
        Ok(Ok(verdict)) if verdict.passed => QualityDecision::Approved,
        Ok(Ok(verdict)) => {
            QualityDecision::Failed(QualityReason::rejected(verdict.reason.unwrap_or_default()))
        }
        Ok(Err(err)) => {
            warn!(path = %path.display(), error = %err, "Quality gate failed");
            QualityDecision::Failed(QualityReason::QcError)
        }
        Err(_) => {
            warn!(path = %path.display(), timeout_ms = timeout.as_millis() as u64, "Quality gate timed out");
            QualityDecision::Failed(QualityReason::QcError)
        }
    }
}
