//! Post-processing stage tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A post-processing stage of the artifact pipeline.
///
/// Stage tags appear in stage errors, in fail policies, and in the
/// `processing_failed:<stage>` quality reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Background removal through the external remover.
    BackgroundRemoval,
    /// Sharpening and saturation.
    Enhancement,
    /// Format conversion, including transparent-edge trimming.
    Conversion,
    /// Moving the processed file into the output directory.
    FinalPlacement,
    /// Title/description/tag generation.
    Metadata,
}

impl StageName {
    /// All stages in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::BackgroundRemoval,
        Self::Enhancement,
        Self::Conversion,
        Self::FinalPlacement,
        Self::Metadata,
    ];

    /// Returns the stable tag for this stage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BackgroundRemoval => "background-removal",
            Self::Enhancement => "enhancement",
            Self::Conversion => "conversion",
            Self::FinalPlacement => "final-placement",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stage tag cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown stage tag: {0}")]
pub struct UnknownStageError(pub String);

impl FromStr for StageName {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Snake-case and short aliases are accepted from older settings payloads.
        match s.trim().to_ascii_lowercase().as_str() {
            "background-removal" | "background_removal" | "remove_bg" | "remove-bg" => {
                Ok(Self::BackgroundRemoval)
            }
            "enhancement" | "image_enhancement" => Ok(Self::Enhancement),
            "conversion" | "convert" | "image_convert" => Ok(Self::Conversion),
            "final-placement" | "final_placement" | "move" => Ok(Self::FinalPlacement),
            "metadata" => Ok(Self::Metadata),
            other => Err(UnknownStageError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tags() {
        assert_eq!(StageName::BackgroundRemoval.to_string(), "background-removal");
        assert_eq!(StageName::FinalPlacement.to_string(), "final-placement");
        assert_eq!(StageName::Metadata.as_str(), "metadata");
    }

    #[test]
    fn test_stage_parse_aliases() {
        assert_eq!("remove_bg".parse::<StageName>(), Ok(StageName::BackgroundRemoval));
        assert_eq!(" Conversion ".parse::<StageName>(), Ok(StageName::Conversion));
        assert!("upscale".parse::<StageName>().is_err());
    }

    #[test]
    fn test_stage_serialize() {
        let json = serde_json::to_string(&StageName::FinalPlacement).unwrap();
        assert_eq!(json, r#""final-placement""#);

        let parsed: Vec<StageName> = serde_json::from_str(r#"["conversion","enhancement"]"#).unwrap();
        assert_eq!(parsed, vec![StageName::Conversion, StageName::Enhancement]);
    }

    #[test]
    fn test_stage_order() {
        let mut stages = vec![StageName::Metadata, StageName::BackgroundRemoval];
        stages.sort();
        assert_eq!(stages, vec![StageName::BackgroundRemoval, StageName::Metadata]);
    }
}
