use image::{GrayImage, ImageBuffer, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;
use tracing::debug;

use crate::{config::TemplateConfig, types::TemplateHitCounts};

pub type CorrelationMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A named reference mask
#[derive(Debug, Clone)]
pub struct CellTemplate {
    pub name: String,
    pub image: GrayImage,
}

/// Counts zero-mean normalized cross-correlation hits of synthetic cell shapes.
///
/// Hit counts are per template position above the threshold; overlapping
/// detections of the same object are all counted.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    templates: Vec<CellTemplate>,
    threshold: f32,
}

impl TemplateMatcher {
    pub const NORMAL_CELL: &'static str = "Normal_Cell";
    pub const ABNORMAL_CELL: &'static str = "Abnormal_Cell";

    pub fn new(config: &TemplateConfig) -> Self {
        let templates = vec![
            CellTemplate {
                name: Self::NORMAL_CELL.to_string(),
                image: circle_template(config.circle_size),
            },
            CellTemplate {
                name: Self::ABNORMAL_CELL.to_string(),
                image: irregular_template(config.polygon_size),
            },
        ];
        Self::with_templates(templates, config.threshold)
    }

    pub fn with_templates(templates: Vec<CellTemplate>, threshold: f32) -> Self {
        Self {
            templates,
            threshold,
        }
    }

    pub fn templates(&self) -> &[CellTemplate] {
        &self.templates
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn count_hits(&self, gray: &GrayImage) -> TemplateHitCounts {
        let mut hits = TemplateHitCounts::default();
        for template in &self.templates {
            let count = zncc_map(gray, &template.image)
                .map(|map| map.pixels().filter(|p| p[0] >= self.threshold).count())
                .unwrap_or(0);
            debug!(template = %template.name, hits = count, "template matching");
            hits.insert(template.name.clone(), count);
        }
        hits
    }
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(&TemplateConfig::default())
    }
}

/// Filled disc of radius `size / 3` centred in a `size` square
pub fn circle_template(size: u32) -> GrayImage {
    let mut template = GrayImage::new(size, size);
    let center = (size / 2) as i32;
    draw_filled_circle_mut(&mut template, (center, center), (size / 3) as i32, Luma([255u8]));
    template
}

/// Filled irregular quadrilateral in a `size` square
pub fn irregular_template(size: u32) -> GrayImage {
    let s = size as i32;
    let mut template = GrayImage::new(size, size);
    let corners = [
        Point::new(s / 4, s / 4),
        Point::new(3 * s / 4, s / 6),
        Point::new(2 * s / 3, 3 * s / 4),
        Point::new(s / 3, 2 * s / 3),
    ];
    draw_polygon_mut(&mut template, &corners, Luma([255u8]));
    template
}

/// Zero-mean normalized cross-correlation for every placement of `template`.
///
/// The map has one entry per top-left position, `(W - w + 1) x (H - h + 1)`.
/// Placements over a flat window score 0. Returns `None` when the template
/// does not fit or is itself flat.
pub fn zncc_map(image: &GrayImage, template: &GrayImage) -> Option<CorrelationMap> {
    let (width, height) = image.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > width || th > height {
        return None;
    }

    let n = (tw * th) as f64;
    let template_mean = template.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let centered: Vec<f64> = template.pixels().map(|p| p[0] as f64 - template_mean).collect();
    let template_energy: f64 = centered.iter().map(|v| v * v).sum();
    if template_energy <= f64::EPSILON {
        return None;
    }

    let map = ImageBuffer::from_fn(width - tw + 1, height - th + 1, |x0, y0| {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut cross = 0.0;
        for ty in 0..th {
            for tx in 0..tw {
                let value = image.get_pixel(x0 + tx, y0 + ty)[0] as f64;
                sum += value;
                sum_sq += value * value;
                cross += value * centered[(ty * tw + tx) as usize];
            }
        }
        let window_energy = sum_sq - sum * sum / n;
        // Non-flat 8-bit windows have energy of at least (n - 1) / n
        if window_energy < 1e-3 {
            return Luma([0.0f32]);
        }
        Luma([(cross / (window_energy * template_energy).sqrt()) as f32])
    });
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::imageops;

    #[test]
    fn test_templates_have_expected_shape() {
        let circle = circle_template(25);
        assert_eq!(circle.dimensions(), (25, 25));
        assert_eq!(circle.get_pixel(12, 12)[0], 255);
        assert_eq!(circle.get_pixel(0, 0)[0], 0);

        let polygon = irregular_template(20);
        assert_eq!(polygon.dimensions(), (20, 20));
        assert_eq!(polygon.get_pixel(10, 9)[0], 255);
        assert_eq!(polygon.get_pixel(1, 18)[0], 0);
    }

    #[test]
    fn test_self_correlation_is_one() {
        let template = circle_template(25);
        let map = zncc_map(&template, &template).expect("Template should fit itself");
        assert_eq!(map.dimensions(), (1, 1));
        assert!((map.get_pixel(0, 0)[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_black_image_has_no_hits() {
        let hits = TemplateMatcher::default().count_hits(&GrayImage::new(64, 64));
        assert_eq!(hits.get(TemplateMatcher::NORMAL_CELL), Some(0));
        assert_eq!(hits.get(TemplateMatcher::ABNORMAL_CELL), Some(0));
        assert_eq!(hits.total(), 0);
    }

    #[test]
    fn test_image_smaller_than_template_has_no_hits() {
        let hits = TemplateMatcher::default().count_hits(&GrayImage::from_pixel(10, 10, Luma([200u8])));
        assert_eq!(hits.total(), 0);
    }

    #[test]
    fn test_embedded_circle_is_detected() {
        let mut image = GrayImage::new(80, 60);
        imageops::replace(&mut image, &circle_template(25), 30, 20);

        let matcher = TemplateMatcher::default();
        let hits = matcher.count_hits(&image);
        assert!(hits.get(TemplateMatcher::NORMAL_CELL).unwrap_or(0) >= 1);

        let map = zncc_map(&image, &matcher.templates()[0].image).expect("Template should fit");
        assert!(map.get_pixel(30, 20)[0] > 0.99);
    }
}
