//! Utility functions for identifiers, timestamps, and file names.

use chrono::{DateTime, Utc};
use std::path::Path;
use uuid::Uuid;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Builds a file name for a generated item.
///
/// `<run prefix>_<item>_<result>.<ext>`, where the prefix is the first
/// eight characters of the run id and `result` indexes the provider's
/// results for the item.
#[must_use]
pub fn artifact_file_name(run_id: &Uuid, item: u32, result: usize, extension: &str) -> String {
    let simple = run_id.simple().to_string();
    format!("{}_{item:04}_{result:02}.{extension}", &simple[..8])
}

/// Returns the extension of `path`, lowercased, or "png" when missing.
#[must_use]
pub fn extension_or_png(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or_else(|| "png".to_string(), str::to_ascii_lowercase)
}
