//! Event sink trait and implementations.

use crate::core::GenflowEvent;
use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

/// Trait for event sinks that can receive events.
///
/// Runs and the retry queue publish through a sink; they never block on a
/// subscriber, so publishers call [`EventSink::try_emit`].
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: GenflowEvent);

    /// Tries to emit an event without blocking.
    ///
    /// This method must never panic. Errors are logged and suppressed.
    fn try_emit(&self, event: GenflowEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: GenflowEvent) {}

    fn try_emit(&self, _event: GenflowEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event: &GenflowEvent) {
        let event_type = event.event_type();
        let data = event.to_value();

        // Failures are always surfaced at warn regardless of the configured level.
        if matches!(
            event,
            GenflowEvent::RunError { .. } | GenflowEvent::QueueError { .. } | GenflowEvent::ItemFailed { .. }
        ) {
            warn!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            return;
        }

        match self.level {
            Level::DEBUG | Level::TRACE => {
                debug!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            }
            _ => {
                info!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: GenflowEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: GenflowEvent) {
        self.log_event(&event);
    }
}

/// A collecting event sink for tests and embedders that poll.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<GenflowEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<GenflowEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events with the given type tag.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<GenflowEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Returns the number of terminal events collected.
    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.events.read().iter().filter(|e| e.is_terminal()).count()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: GenflowEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: GenflowEvent) {
        self.events.write().push(event);
    }
}
