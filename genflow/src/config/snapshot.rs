//! Redacted configuration snapshots stored on each run.

use super::JobConfig;
use sha2::{Digest, Sha256};

/// Placeholder written in place of every credential.
pub const REDACTED: &str = "[redacted]";

impl JobConfig {
    /// Serializes the configuration with every credential replaced.
    ///
    /// Absent credentials stay `null` so the snapshot still shows which
    /// providers were configured.
    #[must_use]
    pub fn redacted_snapshot(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);

        if let Some(keys) = value
            .get_mut("api_keys")
            .and_then(serde_json::Value::as_object_mut)
        {
            for (_, key) in keys.iter_mut() {
                if !key.is_null() {
                    *key = serde_json::Value::String(REDACTED.to_string());
                }
            }
        }

        value
    }

    /// SHA-256 hex digest of the redacted snapshot.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_value(&self.redacted_snapshot())
    }
}

/// SHA-256 hex digest of a JSON value's compact serialization.
#[must_use]
pub fn fingerprint_value(value: &serde_json::Value) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}
