use std::time::{Duration, Instant};
use tracing::debug;

/// Measures one stage or call and reports it at debug level.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logs the duration with the outcome and returns it.
    pub fn finish(self, ok: bool) -> Duration {
        let elapsed = self.start.elapsed();
        debug!(
            span = %self.name,
            duration_ms = elapsed.as_millis() as u64,
            ok,
            "{} finished", self.name
        );
        elapsed
    }
}
