//! Per-artifact processing settings.

use super::StageName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest accepted sharpening strength.
pub const MIN_SHARPENING: f64 = 0.0;
/// Highest accepted sharpening strength.
pub const MAX_SHARPENING: f64 = 10.0;
/// Lowest accepted saturation multiplier.
pub const MIN_SATURATION: f64 = 0.0;
/// Highest accepted saturation multiplier.
pub const MAX_SATURATION: f64 = 2.0;

/// Output format of the conversion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless PNG.
    #[default]
    Png,
    /// JPEG, flattened onto the configured background.
    Jpg,
    /// WebP.
    Webp,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// Returns true if the format keeps an alpha channel.
    #[must_use]
    pub const fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpg)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Processing settings applied to one artifact.
///
/// A copy is stored on every artifact so a retry with the original settings
/// reproduces the first run exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Run the background-removal stage.
    pub remove_bg: bool,
    /// Size hint passed to the remover ("auto", "preview", "full").
    pub remove_bg_size: String,
    /// Run the enhancement stage.
    pub image_enhancement: bool,
    /// Sharpening strength, 0 to 10.
    pub sharpening: f64,
    /// Saturation multiplier, 0 to 2.
    pub saturation: f64,
    /// Run the conversion stage.
    pub image_convert: bool,
    /// Target format of the conversion stage.
    pub convert_to: ImageFormat,
    /// JPEG quality, 1 to 100.
    pub jpg_quality: u8,
    /// PNG quality, 1 to 100.
    pub png_quality: u8,
    /// Hex colour used when flattening transparency.
    pub jpg_background: String,
    /// Trim transparent edges before converting.
    pub trim_transparent_background: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self::safe_defaults()
    }
}

impl ProcessingSettings {
    /// Settings with every optional stage turned off.
    #[must_use]
    pub fn safe_defaults() -> Self {
        Self {
            remove_bg: false,
            remove_bg_size: "auto".to_string(),
            image_enhancement: false,
            sharpening: 5.0,
            saturation: 1.4,
            image_convert: false,
            convert_to: ImageFormat::Png,
            jpg_quality: 100,
            png_quality: 100,
            jpg_background: "#FFFFFF".to_string(),
            trim_transparent_background: false,
        }
    }

    /// Clamps every ranged value into its accepted range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.sharpening = clamp_f64(self.sharpening, MIN_SHARPENING, MAX_SHARPENING);
        self.saturation = clamp_f64(self.saturation, MIN_SATURATION, MAX_SATURATION);
        self.jpg_quality = self.jpg_quality.clamp(1, 100);
        self.png_quality = self.png_quality.clamp(1, 100);
        self
    }

    /// Returns true if the given stage is part of the active pipeline.
    ///
    /// Final placement is always active. Metadata is decided by the caller,
    /// not by processing settings.
    #[must_use]
    pub fn is_stage_active(&self, stage: StageName) -> bool {
        match stage {
            StageName::BackgroundRemoval => self.remove_bg,
            StageName::Enhancement => {
                self.image_enhancement && (self.sharpening > 0.0 || (self.saturation - 1.0).abs() > f64::EPSILON)
            }
            StageName::Conversion => self.image_convert,
            StageName::FinalPlacement => true,
            StageName::Metadata => false,
        }
    }

    /// Active processing stages in pipeline order.
    #[must_use]
    pub fn active_stages(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|stage| self.is_stage_active(*stage))
            .collect()
    }
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// A partial settings payload supplied with a retry request.
///
/// Absent fields fall back to [`ProcessingSettings::safe_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifiedSettings {
    /// Overrides `remove_bg`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_bg: Option<bool>,
    /// Overrides `remove_bg_size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_bg_size: Option<String>,
    /// Overrides `image_enhancement`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_enhancement: Option<bool>,
    /// Overrides `sharpening`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpening: Option<f64>,
    /// Overrides `saturation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    /// Overrides `image_convert`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_convert: Option<bool>,
    /// Overrides `convert_to`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert_to: Option<ImageFormat>,
    /// Overrides `jpg_quality`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpg_quality: Option<u8>,
    /// Overrides `png_quality`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_quality: Option<u8>,
    /// Overrides `jpg_background`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpg_background: Option<String>,
    /// Overrides `trim_transparent_background`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trim_transparent_background: Option<bool>,
}

impl ModifiedSettings {
    /// Overlays the present fields on `base` and clamps the result.
    #[must_use]
    pub fn merge_over(&self, base: &ProcessingSettings) -> ProcessingSettings {
        let mut merged = base.clone();
        if let Some(v) = self.remove_bg {
            merged.remove_bg = v;
        }
        if let Some(ref v) = self.remove_bg_size {
            merged.remove_bg_size.clone_from(v);
        }
        if let Some(v) = self.image_enhancement {
            merged.image_enhancement = v;
        }
        if let Some(v) = self.sharpening {
            merged.sharpening = v;
        }
        if let Some(v) = self.saturation {
            merged.saturation = v;
        }
        if let Some(v) = self.image_convert {
            merged.image_convert = v;
        }
        if let Some(v) = self.convert_to {
            merged.convert_to = v;
        }
        if let Some(v) = self.jpg_quality {
            merged.jpg_quality = v;
        }
        if let Some(v) = self.png_quality {
            merged.png_quality = v;
        }
        if let Some(ref v) = self.jpg_background {
            merged.jpg_background.clone_from(v);
        }
        if let Some(v) = self.trim_transparent_background {
            merged.trim_transparent_background = v;
        }
        merged.clamped()
    }

    /// Merges over the safe defaults.
    #[must_use]
    pub fn resolve(&self) -> ProcessingSettings {
        self.merge_over(&ProcessingSettings::safe_defaults())
    }
}
