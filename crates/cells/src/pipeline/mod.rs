pub mod builder;

use image::{DynamicImage, GrayImage};
use tracing::{debug, info};

use crate::{
    algorithms::{extract_cells, to_grayscale, BoundaryCounter, TemplateMatcher},
    config::AnalysisConfig,
    error::Result,
    traits::{Binarizer, CellClassifier, ImagePreprocessor, MaskFilter, Segmenter},
    types::ImageAnalysisResult,
};

/// The per-image analysis pipeline: preprocess, binarize, clean, segment,
/// measure and classify, then count template hits.
pub struct CellPipeline {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    binarizer: Box<dyn Binarizer>,
    mask_filters: Vec<Box<dyn MaskFilter>>,
    segmenter: Box<dyn Segmenter>,
    classifier: Box<dyn CellClassifier>,
    template_matcher: TemplateMatcher,
    boundary_counter: Option<BoundaryCounter>,
}

impl CellPipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    /// Create a new pipeline with the given components
    pub fn new(
        preprocessors: Vec<Box<dyn ImagePreprocessor>>,
        binarizer: Box<dyn Binarizer>,
        mask_filters: Vec<Box<dyn MaskFilter>>,
        segmenter: Box<dyn Segmenter>,
        classifier: Box<dyn CellClassifier>,
        template_matcher: TemplateMatcher,
        boundary_counter: Option<BoundaryCounter>,
    ) -> Self {
        Self {
            preprocessors,
            binarizer,
            mask_filters,
            segmenter,
            classifier,
            template_matcher,
            boundary_counter,
        }
    }

    /// Validate `config` and build the pipeline it describes
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(builder::PipelineBuilder::from_config(config).build())
    }

    /// Analyze a decoded image
    pub fn analyze_image(&self, image: &DynamicImage) -> ImageAnalysisResult {
        self.analyze_gray(&to_grayscale(image))
    }

    /// Analyze an already grayscale image
    pub fn analyze_gray(&self, gray: &GrayImage) -> ImageAnalysisResult {
        let mut enhanced = gray.clone();
        for preprocessor in &self.preprocessors {
            enhanced = preprocessor.preprocess(&enhanced);
        }

        let mut mask = self.binarizer.binarize(&enhanced);
        for filter in &self.mask_filters {
            mask = filter.filter(&mask);
        }
        debug!(foreground = mask.foreground_count(), "mask cleaned");

        let segmentation = self.segmenter.segment(&mask);
        let region_count = segmentation.labels.region_count();

        // Measurements read the unenhanced intensities
        let cells = extract_cells(&segmentation.labels, gray, self.classifier.as_ref());
        let template_hits = self.template_matcher.count_hits(gray);
        let boundary_count = self.boundary_counter.as_ref().map(|counter| counter.count(gray));

        let result = ImageAnalysisResult {
            width: gray.width(),
            height: gray.height(),
            mask,
            distance: segmentation.distance,
            labels: segmentation.labels,
            region_count,
            cells,
            template_hits,
            boundary_count,
        };
        info!(
            width = result.width,
            height = result.height,
            regions = result.region_count,
            cells = result.cell_count(),
            abnormal = result.abnormal_count(),
            template_hits = result.template_hits.total(),
            "image analyzed"
        );
        result
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "CellPipeline: {} preprocessors, 1 binarizer, {} mask filters, 1 segmenter, 1 classifier, {} templates, boundary count {}",
            self.preprocessors.len(),
            self.mask_filters.len(),
            self.template_matcher.templates().len(),
            if self.boundary_counter.is_some() { "on" } else { "off" }
        )
    }
}

impl Default for CellPipeline {
    fn default() -> Self {
        Self::builder().build()
    }
}
