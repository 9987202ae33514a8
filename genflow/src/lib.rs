//! # Genflow
//!
//! An artifact generation pipeline with a background retry queue.
//!
//! Genflow provides:
//!
//! - **Orchestrated runs**: validate a job, generate `count * variations`
//!   items, and post-process every result through a fixed stage pipeline
//! - **Quality gating**: an optional vision check with bounded time
//! - **Stop and force stop**: cooperative cancellation plus cleanup of owned
//!   handles
//! - **Retry queue**: re-process stored artifacts in the background with
//!   original or modified settings
//! - **Event-driven observability**: progress and completion events for
//!   any listener
//!
//! Every external collaborator (storage, providers, image operations) is a
//! trait in [`ports`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//!
//! let orchestrator = Orchestrator::builder(artifacts, runs, provider, image_ops)
//!     .with_quality_gate(gate)
//!     .with_event_sink(sink)
//!     .build();
//!
//! let config = JobConfig::from_file("job.json")?.with_env_overrides();
//! let run = orchestrator.start(config).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod ports;
pub mod retry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CleanupRegistry};
    pub use crate::config::{JobConfig, RoutingFlags};
    pub use crate::core::{
        Artifact, FailPolicy, GenflowEvent, ModifiedSettings, ProcessingSettings, QualityReason,
        QualityStatus, Run, RunStatus,
    };
    pub use crate::errors::{GenflowError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::orchestrator::{Orchestrator, OrchestratorState, OrchestratorStatus};
    pub use crate::ports::{
        ArtifactRepository, GenerationProvider, ImageOps, MetadataClient, QualityGate,
        RunRepository,
    };
    pub use crate::retry::{
        ArtifactProcessor, BatchRetryRequest, RetryProcessor, RetryQueue, RetryQueueApi,
    };
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
