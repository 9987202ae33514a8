//! The fixed quality-reason vocabulary.
//!
//! Every user-visible failure carries one of these reasons so the
//! presentation layer can branch on a code instead of parsing free text.

use super::StageName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why an artifact ended up in a non-approved state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum QualityReason {
    /// A post-processing stage failed hard.
    ProcessingFailed(StageName),
    /// The quality gate rejected the artifact.
    QcRejected(Option<String>),
    /// The quality gate could not be consulted.
    QcError,
    /// The generation provider failed after all attempts.
    GenerationFailed,
    /// A repository write failed.
    PersistenceFailed,
    /// The retry target no longer exists.
    NotFound,
    /// Processing was cancelled.
    Cancelled,
    /// An unexpected internal failure.
    InternalError,
}

impl QualityReason {
    /// Returns the reason code without its qualifier.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ProcessingFailed(_) => "processing_failed",
            Self::QcRejected(_) => "qc_rejected",
            Self::QcError => "qc_error",
            Self::GenerationFailed => "generation_failed",
            Self::PersistenceFailed => "persistence_failed",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal_error",
        }
    }

    /// Creates a rejection reason carrying the gate's explanation.
    #[must_use]
    pub fn rejected(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = detail.trim();
        if detail.is_empty() {
            Self::QcRejected(None)
        } else {
            Self::QcRejected(Some(detail.to_string()))
        }
    }
}

impl From<StageName> for QualityReason {
    fn from(stage: StageName) -> Self {
        Self::ProcessingFailed(stage)
    }
}

impl fmt::Display for QualityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessingFailed(stage) => write!(f, "{}:{}", self.code(), stage),
            Self::QcRejected(Some(detail)) => write!(f, "{}:{}", self.code(), detail),
            _ => f.write_str(self.code()),
        }
    }
}

impl From<QualityReason> for String {
    fn from(reason: QualityReason) -> Self {
        reason.to_string()
    }
}

/// Error returned when a stored reason is outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown quality reason: {0}")]
pub struct UnknownReasonError(pub String);

impl FromStr for QualityReason {
    type Err = UnknownReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, qualifier) = match s.split_once(':') {
            Some((code, rest)) => (code, Some(rest)),
            None => (s, None),
        };

        match (code, qualifier) {
            ("processing_failed", Some(stage)) => stage
                .parse::<StageName>()
                .map(Self::ProcessingFailed)
                .map_err(|_| UnknownReasonError(s.to_string())),
            ("qc_rejected", detail) => Ok(Self::QcRejected(detail.map(String::from))),
            ("qc_error", None) => Ok(Self::QcError),
            ("generation_failed", None) => Ok(Self::GenerationFailed),
            ("persistence_failed", None) => Ok(Self::PersistenceFailed),
            ("not_found", None) => Ok(Self::NotFound),
            ("cancelled", None) => Ok(Self::Cancelled),
            ("internal_error", None) => Ok(Self::InternalError),
            _ => Err(UnknownReasonError(s.to_string())),
        }
    }
}

impl TryFrom<String> for QualityReason {
    type Error = UnknownReasonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
