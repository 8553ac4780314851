use std::collections::BTreeMap;

use image::{GrayImage, ImageBuffer, Luma};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Binary foreground/background mask with pixels stored as strict {0, 255}.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    image: GrayImage,
}

impl BinaryMask {
    pub const FOREGROUND: u8 = 255;
    pub const BACKGROUND: u8 = 0;

    /// All-background mask of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Renormalize an 8-bit image: values above 127 become foreground.
    pub fn from_gray(image: &GrayImage) -> Self {
        Self::from_image(image.clone())
    }

    /// Same as [`BinaryMask::from_gray`] but reuses the buffer.
    pub fn from_image(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            pixel[0] = if pixel[0] > 127 {
                Self::FOREGROUND
            } else {
                Self::BACKGROUND
            };
        }
        Self { image }
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let image = GrayImage::from_fn(width, height, |x, y| {
            if f(x, y) {
                Luma([Self::FOREGROUND])
            } else {
                Luma([Self::BACKGROUND])
            }
        });
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] == Self::FOREGROUND
    }

    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        let value = if foreground {
            Self::FOREGROUND
        } else {
            Self::BACKGROUND
        };
        self.image.put_pixel(x, y, Luma([value]));
    }

    pub fn foreground_count(&self) -> usize {
        self.image
            .pixels()
            .filter(|p| p[0] == Self::FOREGROUND)
            .count()
    }

    /// True when the mask has no foreground pixel at all
    pub fn is_empty(&self) -> bool {
        self.image.pixels().all(|p| p[0] == Self::BACKGROUND)
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

/// Per-pixel Euclidean distance to the nearest background pixel.
pub type DistanceImage = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMap {
    image: DistanceImage,
}

impl DistanceMap {
    pub fn new(image: DistanceImage) -> Self {
        Self { image }
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.image.get_pixel(x, y)[0]
    }

    pub fn max(&self) -> f32 {
        self.image.pixels().map(|p| p[0]).fold(0.0, f32::max)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_image(&self) -> &DistanceImage {
        &self.image
    }
}

/// Region labelling of one image: 0 is background, -1 is a watershed ridge and
/// every positive value is one region instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: u32,
    height: u32,
    labels: Vec<i32>,
}

impl LabelMap {
    pub const BACKGROUND: i32 = 0;
    pub const BOUNDARY: i32 = -1;

    /// All-background label map
    pub fn background(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            labels: vec![Self::BACKGROUND; width as usize * height as usize],
        }
    }

    /// Wrap a row-major label buffer.
    ///
    /// # Panics
    /// When the buffer does not match the dimensions or holds a value below -1.
    pub fn from_raw(width: u32, height: u32, labels: Vec<i32>) -> Self {
        assert_eq!(
            labels.len(),
            width as usize * height as usize,
            "label buffer does not match {}x{}",
            width,
            height
        );
        assert!(
            labels.iter().all(|&l| l >= Self::BOUNDARY),
            "label map holds a value below the boundary sentinel"
        );
        Self {
            width,
            height,
            labels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> i32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.labels
    }

    /// Distinct positive labels in ascending order
    pub fn region_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.labels.iter().copied().filter(|&l| l > 0).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn region_count(&self) -> usize {
        self.region_ids().len()
    }

    pub fn boundary_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == Self::BOUNDARY).count()
    }

    /// Iterate `(x, y, label)` in row-major order
    pub fn enumerate(&self) -> impl Iterator<Item = (u32, u32, i32)> + '_ {
        let width = self.width as usize;
        self.labels
            .iter()
            .enumerate()
            .map(move |(i, &l)| ((i % width) as u32, (i / width) as u32, l))
    }
}

/// Axis-aligned pixel bounds, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn point(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Geometric measurements of one labelled region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub label: i32,
    pub area: u32,
    pub perimeter: f64,
    /// `(y, x)` in pixel coordinates
    pub centroid: (f64, f64),
    pub eccentricity: f64,
    pub mean_intensity: f64,
    pub bbox: BoundingBox,
}

impl Region {
    /// `4π·area / perimeter²`, or exactly 0 for a zero-length perimeter.
    pub fn circularity(&self) -> f64 {
        circularity(self.area, self.perimeter)
    }
}

pub fn circularity(area: u32, perimeter: f64) -> f64 {
    if perimeter > 0.0 {
        4.0 * std::f64::consts::PI * area as f64 / (perimeter * perimeter)
    } else {
        0.0
    }
}

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
    PartialEq, Eq, Hash
)]
pub enum Diagnosis {
    Normal,
    Abnormal,
}

/// A region that survived the noise filter, with its diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CellRecord {
    /// 1-based position among the qualifying regions
    pub id: u32,
    /// Label of the region in the label map
    pub label: i32,
    pub area: u32,
    pub perimeter: f64,
    pub circularity: f64,
    pub eccentricity: f64,
    pub centroid: (f64, f64),
    pub mean_intensity: f64,
    pub diagnosis: Diagnosis,
}

impl CellRecord {
    /// # Panics
    /// On a zero area or a non-finite measurement; both mean the label map was malformed.
    pub fn new(id: u32, region: &Region, diagnosis: Diagnosis) -> Self {
        let circularity = region.circularity();
        assert!(id > 0, "cell ids are 1-based");
        assert!(region.area > 0, "region {} has zero area", region.label);
        assert!(
            circularity.is_finite() && region.eccentricity.is_finite(),
            "region {} has non-finite measurements",
            region.label
        );
        Self {
            id,
            label: region.label,
            area: region.area,
            perimeter: region.perimeter,
            circularity,
            eccentricity: region.eccentricity,
            centroid: region.centroid,
            mean_intensity: region.mean_intensity,
            diagnosis,
        }
    }

    pub fn is_normal(&self) -> bool {
        self.diagnosis == Diagnosis::Normal
    }
}

/// Hit counts per template name, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateHitCounts(BTreeMap<String, usize>);

impl TemplateHitCounts {
    pub fn insert(&mut self, name: impl Into<String>, hits: usize) {
        self.0.insert(name.into(), hits);
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, &hits)| (name.as_str(), hits))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything the pipeline derived from one image.
#[derive(Debug, Clone)]
pub struct ImageAnalysisResult {
    pub width: u32,
    pub height: u32,
    /// Cleaned binary mask that fed the segmenter
    pub mask: BinaryMask,
    pub distance: DistanceMap,
    pub labels: LabelMap,
    /// Positive labels before the noise filter
    pub region_count: usize,
    pub cells: Vec<CellRecord>,
    pub template_hits: TemplateHitCounts,
    /// Canny boundary count, when enabled
    pub boundary_count: Option<usize>,
}

impl ImageAnalysisResult {
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn normal_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_normal()).count()
    }

    pub fn abnormal_count(&self) -> usize {
        self.cell_count() - self.normal_count()
    }

    /// Percentage of abnormal cells, 0 when no cell was found
    pub fn abnormality_rate(&self) -> f64 {
        percentage(self.abnormal_count(), self.cell_count())
    }
}

pub(crate) fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
