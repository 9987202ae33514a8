//! Core domain model types for genflow.
//!
//! This module contains the records and vocabularies shared by the
//! orchestrator and the retry subsystem:
//! - Run, artifact and retry-job status enums
//! - Run and artifact records
//! - Processing settings and stage tags
//! - Quality reasons and events

mod artifact;
mod event;
mod policy;
mod quality;
mod run;
mod settings;
mod stage;
mod status;

pub use artifact::{normalize_tags, Artifact, ArtifactMetadata, ArtifactPatch, MAX_TAGS};
pub use event::{GenflowEvent, ProgressStep};
pub use policy::FailPolicy;
pub use quality::{QualityReason, UnknownReasonError};
pub use run::Run;
pub use settings::{
    ImageFormat, ModifiedSettings, ProcessingSettings, MAX_SATURATION, MAX_SHARPENING,
    MIN_SATURATION, MIN_SHARPENING,
};
pub use stage::{StageName, UnknownStageError};
pub use status::{QualityStatus, RetryJobStatus, RunStatus};
