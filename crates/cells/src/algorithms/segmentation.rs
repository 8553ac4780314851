//! Marker-controlled watershed over the distance field of a binary mask.
//!
//! The segmenter runs three stages, in order and without going back:
//!
//! 1. **Distance**: exact Euclidean distance of every foreground pixel to the
//!    nearest background pixel. Pixels outside the image count as background.
//! 2. **Seeding**: pixels farther than `core_fraction * max` from the
//!    background form "sure foreground" cores. Cores are labelled with
//!    8-connectivity and shifted by one, so marker 1 is the unclaimed
//!    foreground band around the cores and markers `2..=N + 1` are seeds.
//!    Background pixels get marker 0 and are never flooded.
//! 3. **Watershed**: seeds grow over the negated distance field (deepest
//!    basins first) through the unclaimed band. A pixel reached by two
//!    different seeds becomes a ridge (-1). Foreground components that hold no
//!    seed are labelled as regions of their own.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::{
    config::SegmentationConfig,
    traits::{Segmentation, Segmenter},
    types::{BinaryMask, DistanceMap, LabelMap},
};

/// Marker for pixels outside the foreground mask
pub const MARKER_EXCLUDED: i32 = 0;
/// Marker for foreground pixels not yet claimed by a seed
pub const MARKER_UNCLAIMED: i32 = 1;

// Working states for pixels of the label buffer during flooding
const UNCLAIMED: i32 = -2;
const IN_QUEUE: i32 = -3;

static NEIGHBORS_4: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Distance-transform seeded watershed segmenter
#[derive(Debug, Clone)]
pub struct WatershedSegmenter {
    pub core_fraction: f32,
}

impl Default for WatershedSegmenter {
    fn default() -> Self {
        Self { core_fraction: 0.5 }
    }
}

impl From<&SegmentationConfig> for WatershedSegmenter {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            core_fraction: config.core_fraction,
        }
    }
}

impl Segmenter for WatershedSegmenter {
    fn segment(&self, mask: &BinaryMask) -> Segmentation {
        let distance = distance_transform(mask);
        let (width, height) = mask.dimensions();

        if mask.is_empty() {
            debug!("empty mask, skipping watershed");
            return Segmentation {
                distance,
                labels: LabelMap::background(width, height),
            };
        }

        let markers = seed_markers(mask, &distance, self.core_fraction);
        let labels = watershed(&distance, &markers);
        debug!(
            seeds = markers.seed_count,
            regions = labels.region_count(),
            ridges = labels.boundary_count(),
            "watershed"
        );
        Segmentation { distance, labels }
    }
}

/// Euclidean distance from each foreground pixel to the nearest background pixel.
pub fn distance_transform(mask: &BinaryMask) -> DistanceMap {
    let (width, height) = mask.dimensions();

    // One-pixel background frame, inverted so the background is what the
    // transform measures towards
    let padded = GrayImage::from_fn(width + 2, height + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && x <= width && y <= height;
        if inside && mask.is_foreground(x - 1, y - 1) {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });
    let squared = imageproc::distance_transform::euclidean_squared_distance_transform(&padded);

    let image = ImageBuffer::from_fn(width, height, |x, y| {
        Luma([squared.get_pixel(x + 1, y + 1)[0].sqrt() as f32])
    });
    DistanceMap::new(image)
}

/// Seed markers for the watershed, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub width: u32,
    pub height: u32,
    pub values: Vec<i32>,
    pub seed_count: usize,
}

impl Markers {
    pub fn get(&self, x: u32, y: u32) -> i32 {
        self.values[y as usize * self.width as usize + x as usize]
    }
}

pub fn seed_markers(mask: &BinaryMask, distance: &DistanceMap, core_fraction: f32) -> Markers {
    let (width, height) = mask.dimensions();
    assert_eq!(
        distance.dimensions(),
        (width, height),
        "distance map does not match the mask"
    );
    let cutoff = core_fraction * distance.max();

    let cores = GrayImage::from_fn(width, height, |x, y| {
        if distance.get(x, y) > cutoff {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let components = connected_components(&cores, Connectivity::Eight, Luma([0u8]));

    let mut seed_count = 0usize;
    let values = components
        .enumerate_pixels()
        .map(|(x, y, component)| {
            if !mask.is_foreground(x, y) {
                return MARKER_EXCLUDED;
            }
            seed_count = seed_count.max(component[0] as usize);
            component[0] as i32 + 1
        })
        .collect();

    Markers {
        width,
        height,
        values,
        seed_count,
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    level: f32,
    order: u64,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the lowest level first, oldest first on ties
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .level
            .total_cmp(&self.level)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Flood the negated distance field from the seed markers.
pub fn watershed(distance: &DistanceMap, markers: &Markers) -> LabelMap {
    let (width, height) = (markers.width, markers.height);
    assert_eq!(
        distance.dimensions(),
        (width, height),
        "distance map does not match the markers"
    );
    let w = width as usize;

    let mut labels: Vec<i32> = markers
        .values
        .iter()
        .map(|&m| match m {
            MARKER_EXCLUDED => LabelMap::BACKGROUND,
            MARKER_UNCLAIMED => UNCLAIMED,
            seed => {
                assert!(seed > MARKER_UNCLAIMED, "negative marker {}", seed);
                seed - 1
            }
        })
        .collect();

    let (w_i, h_i) = (width as i64, height as i64);
    let neighbors = move |index: usize| {
        let (x, y) = ((index % w) as i64, (index / w) as i64);
        NEIGHBORS_4.iter().filter_map(move |&(dx, dy)| {
            let (nx, ny) = (x + dx, y + dy);
            (nx >= 0 && ny >= 0 && nx < w_i && ny < h_i).then(|| ny as usize * w + nx as usize)
        })
    };
    let level = |index: usize| -distance.get((index % w) as u32, (index / w) as u32);

    let mut heap = BinaryHeap::new();
    let mut order = 0u64;

    for index in 0..labels.len() {
        if labels[index] <= 0 {
            continue;
        }
        for n in neighbors(index) {
            if labels[n] == UNCLAIMED {
                labels[n] = IN_QUEUE;
                heap.push(Candidate { level: level(n), order, index: n });
                order += 1;
            }
        }
    }

    while let Some(Candidate { index, .. }) = heap.pop() {
        let mut label = LabelMap::BACKGROUND;
        for n in neighbors(index) {
            let l = labels[n];
            if l > 0 {
                if label == LabelMap::BACKGROUND {
                    label = l;
                } else if label != l {
                    label = LabelMap::BOUNDARY;
                }
            }
        }
        assert!(label != LabelMap::BACKGROUND, "queued pixel without a labelled neighbour");
        labels[index] = label;
        if label == LabelMap::BOUNDARY {
            continue;
        }
        for n in neighbors(index) {
            if labels[n] == UNCLAIMED {
                labels[n] = IN_QUEUE;
                heap.push(Candidate { level: level(n), order, index: n });
                order += 1;
            }
        }
    }

    // Foreground that no seed reached becomes a region of its own
    let mut next_label = labels.iter().copied().max().unwrap_or(0).max(0) + 1;
    let mut queue = VecDeque::new();
    for start in 0..labels.len() {
        if labels[start] != UNCLAIMED {
            continue;
        }
        labels[start] = next_label;
        queue.push_back(start);
        while let Some(index) = queue.pop_front() {
            for n in neighbors(index) {
                if labels[n] == UNCLAIMED {
                    labels[n] = next_label;
                    queue.push_back(n);
                }
            }
        }
        next_label += 1;
    }

    LabelMap::from_raw(width, height, labels)
}
