use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use image::DynamicImage;
use tracing::{info, warn};

use crate::{
    config::ReportPolicy,
    error::{CellError, Result},
    pipeline::CellPipeline,
    report::{aggregate_with, RunReport, SkippedImage},
    traits::ImageLoader,
    types::ImageAnalysisResult,
};

/// Identity of an analysed image, usually its path as given
pub type ImageId = String;

/// Caller-owned record of one batch run.
///
/// Results and failures are kept in the order they were recorded.
#[derive(Debug, Clone, Default)]
pub struct AnalysisSession {
    results: Vec<(ImageId, ImageAnalysisResult)>,
    skipped: Vec<SkippedImage>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, image_id: impl Into<ImageId>, result: ImageAnalysisResult) {
        self.results.push((image_id.into(), result));
    }

    pub fn record_failure(&mut self, image_id: impl Into<ImageId>, reason: impl ToString) {
        self.skipped.push(SkippedImage {
            image_id: image_id.into(),
            reason: reason.to_string(),
        });
    }

    pub fn results(&self) -> &[(ImageId, ImageAnalysisResult)] {
        &self.results
    }

    pub fn skipped(&self) -> &[SkippedImage] {
        &self.skipped
    }

    pub fn get(&self, image_id: &str) -> Option<&ImageAnalysisResult> {
        self.results
            .iter()
            .find(|(id, _)| id == image_id)
            .map(|(_, result)| result)
    }

    pub fn report(&self) -> RunReport {
        self.report_with(&ReportPolicy::default())
    }

    /// Aggregate the recorded results; skipped images are listed but not counted.
    pub fn report_with(&self, policy: &ReportPolicy) -> RunReport {
        let mut report = aggregate_with(policy, self.results.iter().map(|(id, result)| (id, result)));
        report.skipped = self.skipped.clone();
        report
    }
}

/// Load and analyse every path in order.
///
/// A path that fails to load is logged and recorded as skipped; the batch
/// carries on. Fails only when `paths` is empty.
pub fn analyze_batch<P>(
    pipeline: &CellPipeline,
    loader: &dyn ImageLoader,
    paths: &[P],
) -> Result<AnalysisSession>
where
    P: AsRef<Path>,
{
    if paths.is_empty() {
        return Err(CellError::EmptyInput);
    }

    let mut session = AnalysisSession::new();
    for path in paths {
        let path = path.as_ref();
        let image_id = path.display().to_string();
        match loader.load(path) {
            Ok(image) => {
                info!(image = %image_id, "analyzing");
                session.record(image_id, pipeline.analyze_image(&image));
            }
            Err(err) => {
                warn!(image = %image_id, error = %err, "skipping image");
                session.record_failure(image_id, err);
            }
        }
    }
    Ok(session)
}

/// Loader over images already held in memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemoryImageLoader {
    images: HashMap<PathBuf, DynamicImage>,
}

impl MemoryImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, image: DynamicImage) {
        self.images.insert(path.into(), image);
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>, image: DynamicImage) -> Self {
        self.insert(path, image);
        self
    }
}

impl ImageLoader for MemoryImageLoader {
    fn load(&self, path: &Path) -> Result<DynamicImage> {
        self.images.get(path).cloned().ok_or_else(|| CellError::Decode {
            image_id: path.display().to_string(),
            source: image::ImageError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no image registered for this path",
            )),
        })
    }
}
