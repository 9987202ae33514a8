//! Per-artifact stage execution.
//!
//! This module provides:
//! - The stage pipeline (background removal, enhancement, conversion,
//!   final placement, metadata)
//! - Quality gate evaluation
//! - Retry helpers for provider calls

mod quality;
mod retry;
mod stages;

pub use quality::{evaluate as evaluate_quality, QualityDecision};
pub use retry::{is_retryable, with_retry, RetryConfig};
pub use stages::{ProcessedImage, StageOutcome, StagePipeline, StageRequest, PROCESSING_STAGES};
