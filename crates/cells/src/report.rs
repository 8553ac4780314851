//! Roll-up of per-image results into a run report.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    config::ReportPolicy,
    error::Result,
    session::ImageId,
    types::{percentage, ImageAnalysisResult},
};

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
    PartialEq, Eq, Hash
)]
pub enum ImageStatus {
    #[strum(serialize = "normal")]
    #[serde(rename = "normal")]
    Normal,
    #[strum(serialize = "needs attention")]
    #[serde(rename = "needs attention")]
    NeedsAttention,
}

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
    PartialEq, Eq, Hash
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Normal,
    Moderate,
    High,
}

impl Recommendation {
    pub fn from_rate(policy: &ReportPolicy, rate: f64) -> Self {
        if rate > policy.high_rate {
            Recommendation::High
        } else if rate > policy.moderate_rate {
            Recommendation::Moderate
        } else {
            Recommendation::Normal
        }
    }
}

/// One line of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageSummary {
    pub image_id: ImageId,
    pub cells: usize,
    pub normal: usize,
    pub abnormal: usize,
    /// Abnormal cells as a percentage of this image's cells
    pub abnormality_rate: f64,
    pub template_hits: usize,
    pub boundary_count: Option<usize>,
    pub status: ImageStatus,
}

/// An input that never reached analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedImage {
    pub image_id: ImageId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub images_analyzed: usize,
    pub total_cells: usize,
    pub total_normal: usize,
    pub total_abnormal: usize,
    pub percentage_abnormality: f64,
    /// Per-image lines, in input order
    pub images: Vec<ImageSummary>,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub skipped: Vec<SkippedImage>,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Names of the images whose status is not normal
    pub fn flagged_images(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .filter(|summary| summary.status == ImageStatus::NeedsAttention)
            .map(|summary| summary.image_id.as_str())
    }
}

/// Aggregate with the default report thresholds.
pub fn aggregate<'a, I>(results: I) -> RunReport
where
    I: IntoIterator<Item = (&'a ImageId, &'a ImageAnalysisResult)>,
{
    aggregate_with(&ReportPolicy::default(), results)
}

/// Sum counts over `results` and derive per-image statuses and the overall
/// recommendation. Rates are 0 when there are no cells.
pub fn aggregate_with<'a, I>(policy: &ReportPolicy, results: I) -> RunReport
where
    I: IntoIterator<Item = (&'a ImageId, &'a ImageAnalysisResult)>,
{
    let images: Vec<ImageSummary> = results
        .into_iter()
        .map(|(image_id, result)| {
            let abnormality_rate = result.abnormality_rate();
            let status = if abnormality_rate > policy.attention_rate {
                ImageStatus::NeedsAttention
            } else {
                ImageStatus::Normal
            };
            ImageSummary {
                image_id: image_id.clone(),
                cells: result.cell_count(),
                normal: result.normal_count(),
                abnormal: result.abnormal_count(),
                abnormality_rate,
                template_hits: result.template_hits.total(),
                boundary_count: result.boundary_count,
                status,
            }
        })
        .collect();

    let total_cells: usize = images.iter().map(|s| s.cells).sum();
    let total_normal: usize = images.iter().map(|s| s.normal).sum();
    let total_abnormal: usize = images.iter().map(|s| s.abnormal).sum();
    let percentage_abnormality = percentage(total_abnormal, total_cells);

    RunReport {
        images_analyzed: images.len(),
        total_cells,
        total_normal,
        total_abnormal,
        percentage_abnormality,
        images,
        recommendation: Recommendation::from_rate(policy, percentage_abnormality),
        skipped: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BinaryMask, BoundingBox, CellRecord, Diagnosis, DistanceImage, DistanceMap, LabelMap,
        Region, TemplateHitCounts,
    };

    fn result_with(normal: usize, abnormal: usize) -> ImageAnalysisResult {
        let region = Region {
            label: 1,
            area: 100,
            perimeter: 36.0,
            centroid: (5.0, 5.0),
            eccentricity: 0.1,
            mean_intensity: 80.0,
            bbox: BoundingBox::point(5, 5),
        };
        let cells = (0..normal + abnormal)
            .map(|i| {
                let diagnosis = if i < normal {
                    Diagnosis::Normal
                } else {
                    Diagnosis::Abnormal
                };
                CellRecord::new(i as u32 + 1, &region, diagnosis)
            })
            .collect();
        ImageAnalysisResult {
            width: 10,
            height: 10,
            mask: BinaryMask::new(10, 10),
            distance: DistanceMap::new(DistanceImage::new(10, 10)),
            labels: LabelMap::background(10, 10),
            region_count: normal + abnormal,
            cells,
            template_hits: TemplateHitCounts::default(),
            boundary_count: None,
        }
    }

    #[test]
    fn test_empty_aggregate() {
        let report = aggregate(Vec::<(&ImageId, &ImageAnalysisResult)>::new());
        assert_eq!(report.images_analyzed, 0);
        assert_eq!(report.total_cells, 0);
        assert_eq!(report.percentage_abnormality, 0.0);
        assert_eq!(report.recommendation, Recommendation::Normal);
        assert!(report.images.is_empty());
    }

    #[test]
    fn test_two_image_aggregate() {
        let first = ("first.png".to_string(), result_with(5, 0));
        let second = ("second.png".to_string(), result_with(2, 3));
        let report = aggregate([(&first.0, &first.1), (&second.0, &second.1)]);

        assert_eq!(report.total_cells, 10);
        assert_eq!(report.total_normal, 7);
        assert_eq!(report.total_abnormal, 3);
        assert!((report.percentage_abnormality - 30.0).abs() < 1e-9);
        assert_eq!(report.recommendation, Recommendation::High);
        assert_eq!(report.recommendation.to_string(), "high");

        let statuses: Vec<String> = report.images.iter().map(|s| s.status.to_string()).collect();
        assert_eq!(statuses, ["normal", "needs attention"]);
        assert_eq!(report.flagged_images().collect::<Vec<_>>(), ["second.png"]);
    }

    #[test]
    fn test_image_with_no_cells_is_normal() {
        let id = "blank.png".to_string();
        let report = aggregate([(&id, &result_with(0, 0))]);
        assert_eq!(report.images[0].abnormality_rate, 0.0);
        assert_eq!(report.images[0].status, ImageStatus::Normal);
    }

    #[test]
    fn test_recommendation_tiers_are_strict() {
        let policy = ReportPolicy::default();
        assert_eq!(Recommendation::from_rate(&policy, 20.0), Recommendation::Moderate);
        assert_eq!(Recommendation::from_rate(&policy, 20.5), Recommendation::High);
        assert_eq!(Recommendation::from_rate(&policy, 10.0), Recommendation::Normal);
        assert_eq!(Recommendation::from_rate(&policy, 10.5), Recommendation::Moderate);
    }

    #[test]
    fn test_custom_policy_changes_status() {
        let policy = ReportPolicy {
            attention_rate: 50.0,
            ..ReportPolicy::default()
        };
        let id = "one.png".to_string();
        let report = aggregate_with(&policy, [(&id, &result_with(2, 3))]);
        assert_eq!(report.images[0].status, ImageStatus::NeedsAttention);

        let report = aggregate_with(&policy, [(&id, &result_with(3, 2))]);
        assert_eq!(report.images[0].status, ImageStatus::Normal);
    }

    #[test]
    fn test_report_json_uses_display_names() {
        let id = "one.png".to_string();
        let json = aggregate([(&id, &result_with(1, 1))])
            .to_json()
            .expect("Report should serialize");
        assert!(json.contains("\"needs attention\""));
        assert!(json.contains("\"recommendation\": \"high\""));
    }
}
