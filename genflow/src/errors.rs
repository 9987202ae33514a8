//! Error types for genflow.
//!
//! The taxonomy mirrors how failures are handled: validation errors abort a
//! run before any I/O, provider errors are retried, stage errors are soft or
//! hard depending on the fail policy, persistence errors always surface, and
//! not-found errors fail a single retry job.

use crate::core::{QualityReason, StageName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Convenience result alias.
pub type Result<T, E = GenflowError> = std::result::Result<T, E>;

/// The main error type for genflow operations.
#[derive(Debug, Error)]
pub enum GenflowError {
    /// Bad or missing configuration.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The generation provider failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// A post-processing stage failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// A repository write or read failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// A record was not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// The operation was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GenflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl GenflowError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Maps the error onto the fixed quality-reason vocabulary.
    #[must_use]
    pub fn quality_reason(&self) -> QualityReason {
        match self {
            Self::Stage(err) => QualityReason::ProcessingFailed(err.stage),
            Self::Provider(_) => QualityReason::GenerationFailed,
            Self::NotFound(_) => QualityReason::NotFound,
            Self::Cancelled(_) => QualityReason::Cancelled,
            Self::Persistence(_) => QualityReason::PersistenceFailed,
            Self::Validation(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Io(_) => QualityReason::InternalError,
        }
    }

    /// Returns true if the same call may be replayed against another
    /// implementation without changing caller-visible behavior.
    ///
    /// Cancellation and validation failures would fail identically, so they
    /// are never replayed.
    #[must_use]
    pub fn is_replay_safe(&self) -> bool {
        !matches!(self, Self::Cancelled(_) | Self::Validation(_))
    }

    /// Returns the error kind name used in logs and event payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Provider(_) => "ProviderError",
            Self::Stage(_) => "StageError",
            Self::Persistence(_) => "PersistenceError",
            Self::NotFound(_) => "NotFoundError",
            Self::Cancelled(_) => "Cancelled",
            Self::Internal(_) => "InternalError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert(
            "qc_reason".to_string(),
            serde_json::json!(self.quality_reason().to_string()),
        );
        match self {
            Self::Validation(err) => {
                map.insert("fields".to_string(), serde_json::json!(err.fields));
            }
            Self::Stage(err) => {
                map.insert("stage".to_string(), serde_json::json!(err.stage));
                map.insert("timed_out".to_string(), serde_json::json!(err.timed_out));
            }
            Self::Provider(err) => {
                map.insert("attempts".to_string(), serde_json::json!(err.attempts));
            }
            _ => {}
        }
        map
    }
}

/// One invalid configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the field (e.g. "api_keys.openai").
    pub field: String,
    /// What is wrong with it.
    pub problem: String,
}

/// Error raised when configuration is missing or invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", format_fields(.fields))]
pub struct ValidationError {
    /// Summary message.
    pub message: String,
    /// Every offending field.
    pub fields: Vec<FieldError>,
}

fn format_fields(fields: &[FieldError]) -> String {
    if fields.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.problem))
        .collect();
    format!(" ({})", parts.join("; "))
}

impl ValidationError {
    /// Creates a validation error without field details.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Adds an offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, problem: impl Into<String>) -> Self {
        self.push(field, problem);
        self
    }

    /// Adds an offending field in place.
    pub fn push(&mut self, field: impl Into<String>, problem: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.into(),
            problem: problem.into(),
        });
    }

    /// Returns true if any field was recorded.
    #[must_use]
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Returns `Ok(())` when no field was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.has_fields() {
            Err(self)
        } else {
            Ok(())
        }
    }
}

/// Error raised by the generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Provider '{provider}' failed after {attempts} attempt(s): {message}")]
pub struct ProviderError {
    /// Provider name.
    pub provider: String,
    /// Last error message.
    pub message: String,
    /// Attempts made.
    pub attempts: usize,
}

impl ProviderError {
    /// Creates a provider error for a single attempt.
    #[must_use]
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            attempts: 1,
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Error raised by one post-processing stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' failed: {message}")]
pub struct StageError {
    /// The stage that failed.
    pub stage: StageName,
    /// Error message.
    pub message: String,
    /// Whether the failure was a timeout.
    pub timed_out: bool,
}

impl StageError {
    /// Creates a stage error.
    #[must_use]
    pub fn new(stage: StageName, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(stage: StageName, after: Duration) -> Self {
        Self {
            stage,
            message: format!("timed out after {}ms", after.as_millis()),
            timed_out: true,
        }
    }

    /// Tags an arbitrary error with a stage.
    #[must_use]
    pub fn from_error(stage: StageName, err: &GenflowError) -> Self {
        match err {
            GenflowError::Stage(inner) if inner.stage == stage => inner.clone(),
            other => Self::new(stage, other.to_string()),
        }
    }
}

/// Error raised when a repository operation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Persistence error on {entity} '{id}': {message}")]
pub struct PersistenceError {
    /// Entity kind ("artifact", "run").
    pub entity: String,
    /// Entity id.
    pub id: String,
    /// Error message.
    pub message: String,
}

impl PersistenceError {
    /// Creates a persistence error.
    #[must_use]
    pub fn new(entity: impl Into<String>, id: impl ToString, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.to_string(),
            message: message.into(),
        }
    }
}

/// Error raised when a record does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    /// Entity kind.
    pub entity: String,
    /// Entity id.
    pub id: String,
}

impl NotFoundError {
    /// Creates a not-found error.
    #[must_use]
    pub fn new(entity: impl Into<String>, id: impl ToString) -> Self {
        Self {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_fields() {
        let err = ValidationError::new("Invalid job configuration")
            .with_field("api_keys.openai", "missing")
            .with_field("file_paths.output_directory", "empty");

        let text = err.to_string();
        assert!(text.contains("api_keys.openai: missing"));
        assert!(text.contains("file_paths.output_directory: empty"));
        assert!(err.clone().into_result().is_err());
        assert!(ValidationError::new("ok").into_result().is_ok());
    }

    #[test]
    fn test_stage_error_reason() {
        let err: GenflowError = StageError::new(StageName::Enhancement, "sharpen failed").into();
        assert_eq!(err.quality_reason().to_string(), "processing_failed:enhancement");
    }

    #[test]
    fn test_stage_timeout() {
        let err = StageError::timeout(StageName::BackgroundRemoval, Duration::from_millis(1500));
        assert!(err.timed_out);
        assert!(err.message.contains("1500ms"));
    }

    #[test]
    fn test_from_error_keeps_matching_stage() {
        let inner: GenflowError = StageError::timeout(StageName::Metadata, Duration::from_secs(1)).into();
        let tagged = StageError::from_error(StageName::Metadata, &inner);
        assert!(tagged.timed_out);

        let other = GenflowError::internal("disk full");
        let tagged = StageError::from_error(StageName::Conversion, &other);
        assert_eq!(tagged.stage, StageName::Conversion);
        assert!(tagged.message.contains("disk full"));
    }

    #[test]
    fn test_replay_safety() {
        assert!(!GenflowError::Cancelled("stop".into()).is_replay_safe());
        assert!(!GenflowError::from(ValidationError::new("bad")).is_replay_safe());
        assert!(GenflowError::from(NotFoundError::new("artifact", "a1")).is_replay_safe());
        assert!(GenflowError::internal("panic").is_replay_safe());
    }

    #[test]
    fn test_error_to_dict() {
        let err: GenflowError = NotFoundError::new("artifact", "abc").into();
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "NotFoundError");
        assert_eq!(dict.get("qc_reason").unwrap(), "not_found");
    }

    #[test]
    fn test_provider_error_attempts() {
        let err = ProviderError::new("openai", "rate limited").with_attempts(3);
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
