use std::collections::BTreeMap;

use geo::EuclideanLength;
use geo_types::{Coord, LineString};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use tracing::debug;

use crate::{
    config::ClassificationPolicy,
    traits::CellClassifier,
    types::{BoundingBox, CellRecord, Diagnosis, LabelMap, Region},
};

/// Threshold classifier: normal iff circularity and area clear the policy cutoffs
#[derive(Debug, Clone, Default)]
pub struct RuleBasedClassifier {
    pub policy: ClassificationPolicy,
}

impl RuleBasedClassifier {
    pub fn new(policy: ClassificationPolicy) -> Self {
        Self { policy }
    }
}

impl CellClassifier for RuleBasedClassifier {
    fn noise_area(&self) -> u32 {
        self.policy.noise_area
    }

    fn classify(&self, circularity: f64, area: u32) -> Diagnosis {
        classify(&self.policy, circularity, area)
    }
}

/// All three comparisons are strict, so the cutoff values themselves are abnormal.
pub fn classify(policy: &ClassificationPolicy, circularity: f64, area: u32) -> Diagnosis {
    if circularity > policy.min_circularity && area > policy.min_area && area < policy.max_area {
        Diagnosis::Normal
    } else {
        Diagnosis::Abnormal
    }
}

#[derive(Debug, Clone)]
struct Moments {
    bbox: BoundingBox,
    count: u64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
    sum_intensity: f64,
}

impl Moments {
    fn new(x: u32, y: u32) -> Self {
        Self {
            bbox: BoundingBox::point(x, y),
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
            sum_intensity: 0.0,
        }
    }

    fn add(&mut self, x: u32, y: u32, intensity: u8) {
        let (fx, fy) = (x as f64, y as f64);
        self.bbox.include(x, y);
        self.count += 1;
        self.sum_x += fx;
        self.sum_y += fy;
        self.sum_xx += fx * fx;
        self.sum_yy += fy * fy;
        self.sum_xy += fx * fy;
        self.sum_intensity += intensity as f64;
    }

    fn centroid(&self) -> (f64, f64) {
        let n = self.count as f64;
        (self.sum_y / n, self.sum_x / n)
    }

    /// Eccentricity of the ellipse with the same second central moments
    fn eccentricity(&self) -> f64 {
        let n = self.count as f64;
        let (cy, cx) = self.centroid();
        let mu20 = self.sum_xx / n - cx * cx;
        let mu02 = self.sum_yy / n - cy * cy;
        let mu11 = self.sum_xy / n - cx * cy;

        let half_trace = (mu20 + mu02) / 2.0;
        let spread = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
        let major = half_trace + spread;
        let minor = (half_trace - spread).max(0.0);
        if major <= f64::EPSILON {
            return 0.0;
        }
        (1.0 - minor / major).clamp(0.0, 1.0).sqrt()
    }
}

/// Measure every positive label, in ascending label order.
pub fn measure_regions(labels: &LabelMap, gray: &GrayImage) -> Vec<Region> {
    assert_eq!(
        labels.dimensions(),
        gray.dimensions(),
        "label map does not match the grayscale image"
    );

    let mut moments: BTreeMap<i32, Moments> = BTreeMap::new();
    for (x, y, label) in labels.enumerate() {
        if label <= 0 {
            continue;
        }
        moments
            .entry(label)
            .or_insert_with(|| Moments::new(x, y))
            .add(x, y, gray.get_pixel(x, y)[0]);
    }

    moments
        .into_iter()
        .map(|(label, m)| Region {
            label,
            area: m.count as u32,
            perimeter: contour_perimeter(labels, label, &m.bbox),
            centroid: m.centroid(),
            eccentricity: m.eccentricity(),
            mean_intensity: m.sum_intensity / m.count as f64,
            bbox: m.bbox,
        })
        .collect()
}

/// Length of the traced outer boundary of one region.
///
/// Steps along the boundary chain count 1 (axis) or √2 (diagonal); holes are
/// not included. A single-pixel region has a perimeter of 0.
pub fn contour_perimeter(labels: &LabelMap, label: i32, bbox: &BoundingBox) -> f64 {
    // One-pixel empty margin keeps the tracer away from the crop edge
    let crop = GrayImage::from_fn(bbox.width() + 2, bbox.height() + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && x <= bbox.width() && y <= bbox.height();
        if inside && labels.get(bbox.min_x + x - 1, bbox.min_y + y - 1) == label {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    find_contours::<i32>(&crop)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| {
            let coords: Vec<Coord<f64>> = contour
                .points
                .iter()
                .map(|p| Coord {
                    x: p.x as f64,
                    y: p.y as f64,
                })
                .collect();
            let mut ring = LineString::new(coords);
            ring.close();
            ring.euclidean_length()
        })
        .sum()
}

/// Measure, filter and classify the regions of a label map.
///
/// Regions at or below the classifier's noise area are dropped; the survivors
/// get 1-based ids in ascending label order.
pub fn extract_cells(
    labels: &LabelMap,
    gray: &GrayImage,
    classifier: &dyn CellClassifier,
) -> Vec<CellRecord> {
    let regions = measure_regions(labels, gray);
    let noise_area = classifier.noise_area();

    let cells: Vec<CellRecord> = regions
        .iter()
        .filter(|region| region.area > noise_area)
        .enumerate()
        .map(|(i, region)| {
            let diagnosis = classifier.classify(region.circularity(), region.area);
            CellRecord::new(i as u32 + 1, region, diagnosis)
        })
        .collect();

    debug!(
        regions = regions.len(),
        cells = cells.len(),
        "feature extraction"
    );
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::segmentation::WatershedSegmenter,
        traits::Segmenter,
        types::BinaryMask,
    };

    fn labels_from_fn<F>(width: u32, height: u32, f: F) -> LabelMap
    where
        F: Fn(u32, u32) -> i32,
    {
        let mut values = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(f(x, y));
            }
        }
        LabelMap::from_raw(width, height, values)
    }

    fn in_disk(x: u32, y: u32, cx: i64, cy: i64, r: i64) -> bool {
        let (dx, dy) = (x as i64 - cx, y as i64 - cy);
        dx * dx + dy * dy <= r * r
    }

    #[test]
    fn test_classification_boundaries_are_abnormal() {
        let policy = ClassificationPolicy::default();
        assert_eq!(classify(&policy, 0.9, 200), Diagnosis::Normal);
        assert_eq!(classify(&policy, 0.7, 200), Diagnosis::Abnormal);
        assert_eq!(classify(&policy, 0.9, 50), Diagnosis::Abnormal);
        assert_eq!(classify(&policy, 0.9, 1000), Diagnosis::Abnormal);
        assert_eq!(classify(&policy, 0.9, 51), Diagnosis::Normal);
        assert_eq!(classify(&policy, 0.9, 999), Diagnosis::Normal);
    }

    #[test]
    fn test_classification_follows_overridden_policy() {
        let classifier = RuleBasedClassifier::new(ClassificationPolicy {
            min_circularity: 0.95,
            ..ClassificationPolicy::default()
        });
        assert_eq!(classifier.classify(0.9, 200), Diagnosis::Abnormal);
        assert_eq!(classifier.classify(0.96, 200), Diagnosis::Normal);
    }

    #[test]
    fn test_single_pixel_region_has_zero_circularity() {
        let labels = labels_from_fn(5, 5, |x, y| if (x, y) == (2, 2) { 1 } else { 0 });
        let regions = measure_regions(&labels, &GrayImage::new(5, 5));

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 1);
        assert_eq!(regions[0].perimeter, 0.0);
        assert_eq!(regions[0].circularity(), 0.0);
        assert_eq!(regions[0].eccentricity, 0.0);
    }

    #[test]
    fn test_disk_measurements() {
        let labels = labels_from_fn(40, 40, |x, y| i32::from(in_disk(x, y, 20, 20, 8)));
        let gray = GrayImage::from_pixel(40, 40, Luma([90u8]));
        let regions = measure_regions(&labels, &gray);

        assert_eq!(regions.len(), 1);
        let disk = &regions[0];
        assert_eq!(disk.area, 197);
        assert!((disk.centroid.0 - 20.0).abs() < 1e-9);
        assert!((disk.centroid.1 - 20.0).abs() < 1e-9);
        assert!(disk.eccentricity < 0.1, "eccentricity {}", disk.eccentricity);
        assert!((disk.mean_intensity - 90.0).abs() < 1e-9);
        let circularity = disk.circularity();
        assert!(circularity > 0.8 && circularity < 1.1, "circularity {}", circularity);
    }

    #[test]
    fn test_elongated_region_is_eccentric_and_not_round() {
        let labels = labels_from_fn(60, 20, |x, y| i32::from((5..55).contains(&x) && (8..12).contains(&y)));
        let regions = measure_regions(&labels, &GrayImage::new(60, 20));

        assert_eq!(regions[0].area, 200);
        assert!(regions[0].eccentricity > 0.95);
        assert!(regions[0].circularity() < 0.5);
    }

    #[test]
    fn test_noise_regions_dropped_and_ids_sequential() {
        // label 2 is a 3x3 speck, labels 5 and 7 are disks
        let labels = labels_from_fn(80, 30, |x, y| {
            if in_disk(x, y, 15, 15, 8) {
                5
            } else if (38..41).contains(&x) && (14..17).contains(&y) {
                2
            } else if in_disk(x, y, 60, 15, 8) {
                7
            } else {
                0
            }
        });
        let classifier = RuleBasedClassifier::default();
        let cells = extract_cells(&labels, &GrayImage::new(80, 30), &classifier);

        assert_eq!(cells.len(), 2);
        assert_eq!((cells[0].id, cells[0].label), (1, 5));
        assert_eq!((cells[1].id, cells[1].label), (2, 7));
    }

    #[test]
    fn test_two_separate_circles_are_two_normal_cells() {
        let mask = BinaryMask::from_fn(80, 40, |x, y| in_disk(x, y, 20, 20, 8) || in_disk(x, y, 58, 20, 8));
        let labels = WatershedSegmenter::default().segment(&mask).labels;
        let cells = extract_cells(&labels, &GrayImage::new(80, 40), &RuleBasedClassifier::default());

        assert_eq!(cells.len(), 2);
        for cell in &cells {
            assert_eq!(cell.area, 197);
            assert_eq!(cell.diagnosis, Diagnosis::Normal);
            assert!(cell.circularity > 0.7 && cell.circularity <= 1.1);
        }
    }
}
