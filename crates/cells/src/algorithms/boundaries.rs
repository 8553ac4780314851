use geo::Area;
use geo_types::{Coord, LineString, Polygon};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

use crate::{algorithms::preprocessing::ClaheEqualizer, config::BoundaryConfig, traits::ImagePreprocessor};

/// Counts closed Canny edge boundaries that enclose more than `min_area` px.
///
/// When `enhancement` is set the grayscale image goes through CLAHE first,
/// which lifts faint cell outlines above the Canny thresholds.
#[derive(Debug, Clone)]
pub struct BoundaryCounter {
    pub low: f32,
    pub high: f32,
    pub min_area: f32,
    pub enhancement: Option<ClaheEqualizer>,
}

impl Default for BoundaryCounter {
    fn default() -> Self {
        Self::from(&BoundaryConfig::default())
    }
}

impl From<&BoundaryConfig> for BoundaryCounter {
    fn from(config: &BoundaryConfig) -> Self {
        Self {
            low: config.low,
            high: config.high,
            min_area: config.min_area,
            enhancement: config.clahe.then(|| ClaheEqualizer {
                clip_limit: config.clip_limit,
                tiles: config.tile_grid,
            }),
        }
    }
}

impl BoundaryCounter {
    pub fn count(&self, gray: &GrayImage) -> usize {
        let edges = match &self.enhancement {
            Some(clahe) => imageproc::edges::canny(&clahe.preprocess(gray), self.low, self.high),
            None => imageproc::edges::canny(gray, self.low, self.high),
        };

        // Outermost contours only
        find_contours::<i32>(&edges)
            .into_iter()
            .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
            .filter(|contour| {
                let coords: Vec<Coord<f32>> = contour
                    .points
                    .iter()
                    .map(|p| Coord {
                        x: p.x as f32,
                        y: p.y as f32,
                    })
                    .collect();
                Polygon::new(LineString::new(coords), vec![]).unsigned_area() > self.min_area
            })
            .count()
    }
}
