//! # Cell Analysis Library
//!
//! Counts and classifies cells in microscopy images. A grayscale image is
//! binarized with a Gaussian adaptive threshold, cleaned with morphological
//! open/close, split into regions with a marker-controlled watershed over the
//! distance transform, measured, and diagnosed normal/abnormal by a rule-based
//! policy. A template-correlation pass adds per-shape hit counts, and results
//! for a batch of images roll up into a [`RunReport`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cells::{aggregate, CellPipeline};
//!
//! let pipeline = CellPipeline::builder().build();
//!
//! let image = image::open("smear.png")?;
//! let result = pipeline.analyze_image(&image);
//! println!("{} cells, {} abnormal", result.cell_count(), result.abnormal_count());
//!
//! let id = "smear.png".to_string();
//! let report = aggregate([(&id, &result)]);
//! println!("recommendation: {}", report.recommendation);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom Pipeline
//!
//! ```rust,no_run
//! use cells::{BoundaryCounter, CellPipeline, ClassificationPolicy, RuleBasedClassifier, WatershedSegmenter};
//!
//! let pipeline = CellPipeline::builder()
//!     .with_boundary_count(BoundaryCounter::default())
//!     .set_segmenter(WatershedSegmenter { core_fraction: 0.4 })
//!     .set_classifier(RuleBasedClassifier::new(ClassificationPolicy {
//!         min_circularity: 0.8,
//!         ..ClassificationPolicy::default()
//!     }))
//!     .build();
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod config;
pub mod traits;
pub mod algorithms;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod io;

// Re-exports for convenience
pub use error::{CellError, Result};
pub use types::{
    BinaryMask, BoundingBox, CellRecord, Diagnosis, DistanceImage, DistanceMap,
    ImageAnalysisResult, LabelMap, Region, TemplateHitCounts,
};
pub use config::{
    AnalysisConfig, BoundaryConfig, ClassificationPolicy, PreprocessConfig, ReportPolicy,
    SegmentationConfig, TemplateConfig,
};
pub use traits::*;
pub use algorithms::*;
pub use pipeline::{builder::PipelineBuilder, CellPipeline};
pub use report::{aggregate, aggregate_with, ImageStatus, ImageSummary, Recommendation, RunReport};
pub use session::{analyze_batch, AnalysisSession, ImageId, MemoryImageLoader};
pub use io::FileImageLoader;
