use crate::{
    algorithms::{
        AdaptiveThresholdBinarizer, BoundaryCounter, MorphologyCleaner,
        RuleBasedClassifier, TemplateMatcher, WatershedSegmenter,
    },
    config::AnalysisConfig,
    pipeline::CellPipeline,
    traits::{Binarizer, CellClassifier, ImagePreprocessor, MaskFilter, Segmenter},
};

/// Builder for creating analysis pipelines with a fluent API
pub struct PipelineBuilder {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    binarizer: Option<Box<dyn Binarizer>>,
    mask_filters: Option<Vec<Box<dyn MaskFilter>>>,
    segmenter: Option<Box<dyn Segmenter>>,
    classifier: Option<Box<dyn CellClassifier>>,
    template_matcher: Option<TemplateMatcher>,
    boundary_counter: Option<BoundaryCounter>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            preprocessors: Vec::new(),
            binarizer: None,
            mask_filters: None,
            segmenter: None,
            classifier: None,
            template_matcher: None,
            boundary_counter: None,
        }
    }

    /// Builder preloaded with every stage `config` describes
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let mut builder = Self::new()
            .set_binarizer(AdaptiveThresholdBinarizer::from(&config.preprocess))
            .add_mask_filter(MorphologyCleaner {
                kernel_size: config.preprocess.kernel_size,
            })
            .set_segmenter(WatershedSegmenter::from(&config.segmentation))
            .set_classifier(RuleBasedClassifier::new(config.classification.clone()))
            .set_template_matcher(TemplateMatcher::new(&config.templates));
        if config.boundaries.enabled {
            builder = builder.with_boundary_count(BoundaryCounter::from(&config.boundaries));
        }
        builder
    }

    /// Add a grayscale preprocessor to the pipeline
    pub fn add_preprocessor<P>(mut self, preprocessor: P) -> Self
    where
        P: ImagePreprocessor + 'static,
    {
        self.preprocessors.push(Box::new(preprocessor));
        self
    }

    /// Set the binarizer (replaces any existing one)
    pub fn set_binarizer<B>(mut self, binarizer: B) -> Self
    where
        B: Binarizer + 'static,
    {
        self.binarizer = Some(Box::new(binarizer));
        self
    }

    /// Add a mask filter. Once any filter is added the default cleanup is no
    /// longer inserted.
    pub fn add_mask_filter<F>(mut self, filter: F) -> Self
    where
        F: MaskFilter + 'static,
    {
        self.mask_filters
            .get_or_insert_with(Vec::new)
            .push(Box::new(filter));
        self
    }

    /// Skip mask cleanup entirely
    pub fn without_mask_filters(mut self) -> Self {
        self.mask_filters = Some(Vec::new());
        self
    }

    /// Set the segmenter (replaces any existing one)
    pub fn set_segmenter<S>(mut self, segmenter: S) -> Self
    where
        S: Segmenter + 'static,
    {
        self.segmenter = Some(Box::new(segmenter));
        self
    }

    /// Set the cell classifier (replaces any existing one)
    pub fn set_classifier<C>(mut self, classifier: C) -> Self
    where
        C: CellClassifier + 'static,
    {
        self.classifier = Some(Box::new(classifier));
        self
    }

    pub fn set_template_matcher(mut self, matcher: TemplateMatcher) -> Self {
        self.template_matcher = Some(matcher);
        self
    }

    /// Count Canny boundaries alongside the segmentation
    pub fn with_boundary_count(mut self, counter: BoundaryCounter) -> Self {
        self.boundary_counter = Some(counter);
        self
    }

    /// Build the pipeline with default components if not specified
    pub fn build(self) -> CellPipeline {
        let binarizer = self
            .binarizer
            .unwrap_or_else(|| Box::new(AdaptiveThresholdBinarizer::default()));

        let mask_filters = self.mask_filters.unwrap_or_else(|| {
            let cleaner: Box<dyn MaskFilter> = Box::new(MorphologyCleaner::default());
            vec![cleaner]
        });

        let segmenter = self
            .segmenter
            .unwrap_or_else(|| Box::new(WatershedSegmenter::default()));

        let classifier = self
            .classifier
            .unwrap_or_else(|| Box::new(RuleBasedClassifier::default()));

        CellPipeline::new(
            self.preprocessors,
            binarizer,
            mask_filters,
            segmenter,
            classifier,
            self.template_matcher.unwrap_or_default(),
            self.boundary_counter,
        )
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_stages() {
        let info = PipelineBuilder::new().build().info();
        assert!(info.contains("0 preprocessors"));
        assert!(info.contains("1 mask filters"));
        assert!(info.contains("2 templates"));
        assert!(info.contains("boundary count off"));
    }

    #[test]
    fn test_explicit_filters_replace_default_cleanup() {
        let none = PipelineBuilder::new().without_mask_filters().build();
        assert!(none.info().contains("0 mask filters"));

        let two = PipelineBuilder::new()
            .add_mask_filter(MorphologyCleaner { kernel_size: 3 })
            .add_mask_filter(MorphologyCleaner { kernel_size: 5 })
            .build();
        assert!(two.info().contains("2 mask filters"));
    }

    #[test]
    fn test_preprocessors_are_counted() {
        let pipeline = PipelineBuilder::new()
            .add_preprocessor(crate::algorithms::ClaheEqualizer::default())
            .build();
        assert!(pipeline.info().contains("1 preprocessors"));
    }

    #[test]
    fn test_custom_templates_are_kept() {
        let matcher = TemplateMatcher::with_templates(Vec::new(), 0.9);
        let pipeline = PipelineBuilder::new().set_template_matcher(matcher).build();
        assert!(pipeline.info().contains("0 templates"));
    }
}
