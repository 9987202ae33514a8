//! Cooperative cancellation and owned-handle cleanup.
//!
//! - [`CancellationToken`] signals stop requests to runs and retry jobs
//! - [`CleanupRegistry`] releases handles a run owns when it is force-stopped

mod cleanup;
mod token;

pub use cleanup::CleanupRegistry;
pub use token::{CancelCallback, CancellationToken};
