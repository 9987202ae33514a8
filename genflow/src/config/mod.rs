//! Job configuration.
//!
//! A [`JobConfig`] is loaded from JSON, optionally overlaid with credentials
//! from the environment, and validated before a run starts.

mod job;
mod snapshot;

pub use job::{
    AiToggles, ApiKeys, Dimensions, FilePaths, GenerationParams, JobConfig, KeywordMode,
    ProcessingConfig, Route, RoutingFlags, StageTimeouts, MAX_COUNT, MAX_VARIATIONS,
};
pub use snapshot::{fingerprint_value, REDACTED};

use anyhow::Context;
use std::path::Path;

/// Environment variable for the generation provider key.
pub const ENV_GENERATION_KEY: &str = "GENFLOW_GENERATION_API_KEY";
/// Environment variable for the vision/LLM provider key.
pub const ENV_OPENAI_KEY: &str = "GENFLOW_OPENAI_API_KEY";
/// Environment variable for the background-removal key.
pub const ENV_REMOVE_BG_KEY: &str = "GENFLOW_REMOVE_BG_API_KEY";

impl JobConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(json: &str) -> crate::errors::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Fills credentials from `GENFLOW_<PROVIDER>_API_KEY` variables.
    ///
    /// Environment values win over values from the file.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Fills credentials from an arbitrary lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = pick(ENV_GENERATION_KEY) {
            self.api_keys.generation = Some(key);
        }
        if let Some(key) = pick(ENV_OPENAI_KEY) {
            self.api_keys.openai = Some(key);
        }
        if let Some(key) = pick(ENV_REMOVE_BG_KEY) {
            self.api_keys.remove_bg = Some(key);
        }
        self
    }
}
