use std::path::Path;

use image::{DynamicImage, GrayImage};
use crate::{
    error::Result,
    types::{BinaryMask, Diagnosis, DistanceMap, LabelMap},
};

/// Trait for grayscale enhancement applied before binarization
pub trait ImagePreprocessor: Send + Sync {
    fn preprocess(&self, image: &GrayImage) -> GrayImage;
}

/// Trait for turning a grayscale image into a foreground mask
pub trait Binarizer: Send + Sync {
    fn binarize(&self, image: &GrayImage) -> BinaryMask;
}

/// Trait for mask-to-mask cleanup such as morphological filtering
pub trait MaskFilter: Send + Sync {
    fn filter(&self, mask: &BinaryMask) -> BinaryMask;
}

/// Output of a segmenter: the label map plus the distance field it was grown on
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub distance: DistanceMap,
    pub labels: LabelMap,
}

/// Trait for splitting a foreground mask into labelled regions
pub trait Segmenter: Send + Sync {
    fn segment(&self, mask: &BinaryMask) -> Segmentation;
}

/// Trait for the per-cell normal/abnormal decision
pub trait CellClassifier: Send + Sync {
    /// Regions at or below this area never reach classification
    fn noise_area(&self) -> u32;

    fn classify(&self, circularity: f64, area: u32) -> Diagnosis;
}

/// Collaborator that decodes an image from storage
pub trait ImageLoader {
    fn load(&self, path: &Path) -> Result<DynamicImage>;
}
