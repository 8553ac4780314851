//! Tunable parameters for every pipeline stage.
//!
//! Defaults: an 11 px Gaussian adaptive threshold with offset 2, a 3x3
//! open/close cleanup, seeds at half the peak distance, and the
//! circularity/area policy for the normal/abnormal call.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CellError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    pub preprocess: PreprocessConfig,
    pub segmentation: SegmentationConfig,
    pub classification: ClassificationPolicy,
    pub templates: TemplateConfig,
    pub boundaries: BoundaryConfig,
    pub report: ReportPolicy,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        self.segmentation.validate()?;
        self.classification.validate()?;
        self.templates.validate()?;
        self.boundaries.validate()?;
        self.report.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Side of the Gaussian neighbourhood used for the local mean (odd)
    #[schemars(range(min = 3))]
    pub block_size: u32,
    /// Constant subtracted from the local mean
    pub c: f32,
    /// Side of the square structuring element for open/close (odd)
    #[schemars(range(min = 1))]
    pub kernel_size: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            block_size: 11,
            c: 2.0,
            kernel_size: 3,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(invalid(
                "block_size",
                self.block_size,
                "block size must be odd and at least 3",
            ));
        }
        if !self.c.is_finite() {
            return Err(invalid("c", self.c, "offset must be finite"));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 || self.kernel_size > 511 {
            return Err(invalid(
                "kernel_size",
                self.kernel_size,
                "kernel size must be odd and between 1 and 511",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Seeds are pixels farther from the background than this fraction of the peak distance
    #[schemars(range(min = 0.0, max = 1.0))]
    pub core_fraction: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self { core_fraction: 0.5 }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.core_fraction) {
            return Err(invalid(
                "core_fraction",
                self.core_fraction,
                "fraction must lie in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Rule-based normal/abnormal policy.
///
/// A region is a cell when its area exceeds `noise_area`. A cell is normal when
/// its circularity exceeds `min_circularity` and its area lies strictly between
/// `min_area` and `max_area`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClassificationPolicy {
    pub noise_area: u32,
    pub min_circularity: f64,
    pub min_area: u32,
    pub max_area: u32,
}

impl ClassificationPolicy {
    pub const DEFAULT_NOISE_AREA: u32 = 50;
    pub const DEFAULT_MIN_CIRCULARITY: f64 = 0.7;
    pub const DEFAULT_MIN_AREA: u32 = 50;
    pub const DEFAULT_MAX_AREA: u32 = 1000;

    pub fn validate(&self) -> Result<()> {
        if !self.min_circularity.is_finite() {
            return Err(invalid(
                "min_circularity",
                self.min_circularity,
                "circularity cutoff must be finite",
            ));
        }
        if self.min_area >= self.max_area {
            return Err(invalid(
                "max_area",
                self.max_area,
                "area band must satisfy min_area < max_area",
            ));
        }
        Ok(())
    }
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            noise_area: Self::DEFAULT_NOISE_AREA,
            min_circularity: Self::DEFAULT_MIN_CIRCULARITY,
            min_area: Self::DEFAULT_MIN_AREA,
            max_area: Self::DEFAULT_MAX_AREA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TemplateConfig {
    /// Side of the circular (normal cell) template
    #[schemars(range(min = 3))]
    pub circle_size: u32,
    /// Side of the irregular polygon (abnormal cell) template
    #[schemars(range(min = 6))]
    pub polygon_size: u32,
    /// Minimum zero-mean normalized correlation counted as a hit
    pub threshold: f32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            circle_size: 25,
            polygon_size: 20,
            threshold: 0.6,
        }
    }
}

impl TemplateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.circle_size < 3 {
            return Err(invalid("circle_size", self.circle_size, "template must be at least 3 px"));
        }
        if self.polygon_size < 6 {
            return Err(invalid("polygon_size", self.polygon_size, "template must be at least 6 px"));
        }
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(invalid("threshold", self.threshold, "correlation threshold must lie in [-1, 1]"));
        }
        Ok(())
    }
}

/// Canny edge boundary count, off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BoundaryConfig {
    pub enabled: bool,
    pub low: f32,
    pub high: f32,
    /// Contours enclosing no more than this area are ignored
    pub min_area: f32,
    /// Run CLAHE on the grayscale image before edge detection
    pub clahe: bool,
    /// CLAHE histogram clip limit; 0 disables clipping
    pub clip_limit: f32,
    /// CLAHE tiles per image side
    #[schemars(range(min = 1))]
    pub tile_grid: u32,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            low: 30.0,
            high: 100.0,
            min_area: 25.0,
            clahe: true,
            clip_limit: 2.0,
            tile_grid: 8,
        }
    }
}

impl BoundaryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.low.is_finite() && self.high.is_finite()) || self.low > self.high {
            return Err(invalid(
                "low",
                self.low,
                "canny thresholds must be finite with low <= high",
            ));
        }
        if !self.clip_limit.is_finite() {
            return Err(invalid("clip_limit", self.clip_limit, "clip limit must be finite"));
        }
        if self.tile_grid == 0 {
            return Err(invalid("tile_grid", self.tile_grid, "tile grid must be at least 1"));
        }
        Ok(())
    }
}

/// Abnormality-rate cutoffs (percent) used by the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReportPolicy {
    /// Per-image rate above which an image needs attention
    pub attention_rate: f64,
    /// Overall rate above which the recommendation is high
    pub high_rate: f64,
    /// Overall rate above which the recommendation is moderate
    pub moderate_rate: f64,
}

impl ReportPolicy {
    pub const DEFAULT_ATTENTION_RATE: f64 = 15.0;
    pub const DEFAULT_HIGH_RATE: f64 = 20.0;
    pub const DEFAULT_MODERATE_RATE: f64 = 10.0;

    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("attention_rate", self.attention_rate),
            ("high_rate", self.high_rate),
            ("moderate_rate", self.moderate_rate),
        ] {
            if !rate.is_finite() {
                return Err(invalid(name, rate, "rate cutoff must be finite"));
            }
        }
        if self.moderate_rate > self.high_rate {
            return Err(invalid(
                "moderate_rate",
                self.moderate_rate,
                "moderate cutoff must not exceed the high cutoff",
            ));
        }
        Ok(())
    }
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            attention_rate: Self::DEFAULT_ATTENTION_RATE,
            high_rate: Self::DEFAULT_HIGH_RATE,
            moderate_rate: Self::DEFAULT_MODERATE_RATE,
        }
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> CellError {
    CellError::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
