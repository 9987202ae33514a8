//! Event sinks for run and queue observers.
//!
//! Publishers hold an `Arc<dyn EventSink>` and emit the fixed
//! [`GenflowEvent`](crate::core::GenflowEvent) vocabulary through it.

mod broadcast;
mod sink;

pub use broadcast::{BroadcastEventSink, DEFAULT_CAPACITY};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the default sink.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
