//! Observability utilities.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! embedding process's call through [`init_tracing`].

mod timer;

pub use timer::SpanTimer;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `GENFLOW_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "genflow=info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Resolves the log filter directive from the environment.
#[must_use]
pub fn filter_directive(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("GENFLOW_LOG")
        .or_else(|| lookup("RUST_LOG"))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Installs the global tracing subscriber.
///
/// Fails if the filter directive is invalid or a subscriber is already set.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let directive = filter_directive(|name| std::env::var(name).ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter '{directive}'"))?;

    let layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}
