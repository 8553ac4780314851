use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use tracing::debug;

use crate::{
    config::PreprocessConfig,
    traits::{Binarizer, ImagePreprocessor, MaskFilter},
    types::BinaryMask,
};

/// Luminance conversion of a decoded image
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Contrast-limited adaptive histogram equalization (CLAHE).
///
/// The image is split into a `tiles x tiles` grid. Each tile gets its own
/// equalization curve with histogram bins clipped at
/// `clip_limit * tile_area / 256`; the clipped excess is spread back over all
/// bins. Pixels blend the curves of the four nearest tile centres bilinearly.
/// A non-positive `clip_limit` disables clipping.
#[derive(Debug, Clone)]
pub struct ClaheEqualizer {
    pub clip_limit: f32,
    pub tiles: u32,
}

impl Default for ClaheEqualizer {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tiles: 8,
        }
    }
}

impl ImagePreprocessor for ClaheEqualizer {
    fn preprocess(&self, image: &GrayImage) -> GrayImage {
        clahe(image, self.clip_limit, self.tiles)
    }
}

pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let tiles = tiles.max(1);
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_w = width.div_ceil(tiles.min(width));
    let tile_h = height.div_ceil(tiles.min(height));
    let (tiles_x, tiles_y) = (width.div_ceil(tile_w), height.div_ceil(tile_h));

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, y0) = (tx * tile_w, ty * tile_h);
            let (x1, y1) = ((x0 + tile_w).min(width), (y0 + tile_h).min(height));
            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            luts.push(clipped_lut(histogram, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }
    let lut = |tx: i64, ty: i64| &luts[(ty as u32 * tiles_x + tx as u32) as usize];

    // Tile-centre coordinates: the neighbouring curves and the blend weight
    let axis = |pos: u32, tile: u32, count: u32| {
        let t = pos as f32 / tile as f32 - 0.5;
        let lower = t.floor();
        let weight = t - lower;
        let lower = lower as i64;
        (lower.max(0), (lower + 1).min(count as i64 - 1), weight)
    };

    let enhanced = GrayImage::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y)[0] as usize;
        let (x1, x2, fx) = axis(x, tile_w, tiles_x);
        let (y1, y2, fy) = axis(y, tile_h, tiles_y);
        let top = lut(x1, y1)[value] * (1.0 - fx) + lut(x2, y1)[value] * fx;
        let bottom = lut(x1, y2)[value] * (1.0 - fx) + lut(x2, y2)[value] * fx;
        Luma([(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8])
    });
    debug!(clip_limit, tiles_x, tiles_y, "clahe");
    enhanced
}

/// Equalization curve of one tile after clipping and redistribution
fn clipped_lut(mut histogram: [u32; 256], area: u32, clip_limit: f32) -> [f32; 256] {
    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for count in histogram.iter_mut() {
            if *count > clip {
                excess += *count - clip;
                *count = clip;
            }
        }

        let batch = excess / 256;
        let mut residual = excess % 256;
        for count in histogram.iter_mut() {
            *count += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for count in histogram.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *count += 1;
                residual -= 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0.0f32; 256];
    let mut cumulative = 0u32;
    for (level, count) in histogram.iter().enumerate() {
        cumulative += count;
        lut[level] = (cumulative as f32 * scale).round().min(255.0);
    }
    lut
}

/// Gaussian-weighted adaptive threshold.
///
/// A pixel is foreground when it is strictly darker than the Gaussian-weighted
/// mean of its `block_size` neighbourhood minus `c`. The border is replicated.
#[derive(Debug, Clone)]
pub struct AdaptiveThresholdBinarizer {
    pub block_size: u32,
    pub c: f32,
}

impl Default for AdaptiveThresholdBinarizer {
    fn default() -> Self {
        Self {
            block_size: 11,
            c: 2.0,
        }
    }
}

impl From<&PreprocessConfig> for AdaptiveThresholdBinarizer {
    fn from(config: &PreprocessConfig) -> Self {
        Self {
            block_size: config.block_size,
            c: config.c,
        }
    }
}

impl Binarizer for AdaptiveThresholdBinarizer {
    fn binarize(&self, image: &GrayImage) -> BinaryMask {
        adaptive_binarize(image, self.block_size, self.c)
    }
}

pub fn adaptive_binarize(gray: &GrayImage, block_size: u32, c: f32) -> BinaryMask {
    assert!(
        block_size >= 3 && block_size % 2 == 1,
        "block size must be odd and at least 3, got {}",
        block_size
    );
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return BinaryMask::new(width, height);
    }

    let intensities: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([gray.get_pixel(x, y)[0] as f32]));
    let kernel = gaussian_kernel(block_size);
    let local_mean = imageproc::filter::separable_filter_equal(&intensities, &kernel);

    let mask = BinaryMask::from_fn(width, height, |x, y| {
        intensities.get_pixel(x, y)[0] < local_mean.get_pixel(x, y)[0] - c
    });
    debug!(
        block_size,
        c,
        foreground = mask.foreground_count(),
        "adaptive threshold"
    );
    mask
}

/// Normalized 1-D Gaussian of `size` taps.
///
/// Sigma follows the usual block-size rule `0.3 * ((size - 1) / 2 - 1) + 0.8`.
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }
    kernel
}

/// Binary opening followed by closing with a square structuring element
#[derive(Debug, Clone)]
pub struct MorphologyCleaner {
    pub kernel_size: u32,
}

impl Default for MorphologyCleaner {
    fn default() -> Self {
        Self { kernel_size: 3 }
    }
}

impl MaskFilter for MorphologyCleaner {
    fn filter(&self, mask: &BinaryMask) -> BinaryMask {
        morphological_clean(mask, self.kernel_size)
    }
}

/// Opening removes specks smaller than the kernel, closing fills small holes.
pub fn morphological_clean(mask: &BinaryMask, kernel_size: u32) -> BinaryMask {
    assert!(
        kernel_size % 2 == 1 && kernel_size <= 511,
        "kernel size must be odd and at most 511, got {}",
        kernel_size
    );
    // LInf ball of radius k is the (2k + 1) square
    let k = (kernel_size / 2) as u8;
    if k == 0 {
        return mask.clone();
    }
    let opened = imageproc::morphology::open(mask.as_image(), Norm::LInf, k);
    let closed = imageproc::morphology::close(&opened, Norm::LInf, k);
    BinaryMask::from_image(closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_mask(width: u32, height: u32, seed: u64) -> BinaryMask {
        let mut state = seed;
        BinaryMask::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) % 3 == 0
        })
    }

    /// Noisy disc (130..160) on a noisy field (100..130)
    fn low_contrast_disk(size: u32, radius: i64, seed: u64) -> GrayImage {
        let mut state = seed;
        let center = (size / 2) as i64;
        let mut image = GrayImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let noise = ((state >> 33) % 30) as u8;
                let (dx, dy) = (x as i64 - center, y as i64 - center);
                let base = if dx * dx + dy * dy <= radius * radius { 130 } else { 100 };
                image.put_pixel(x, y, Luma([base + noise]));
            }
        }
        image
    }

    #[test]
    fn test_clahe_keeps_flat_image_flat() {
        let flat = GrayImage::from_pixel(50, 37, Luma([140u8]));
        let enhanced = clahe(&flat, 2.0, 8);
        assert_eq!(enhanced.dimensions(), (50, 37));
        let first = enhanced.get_pixel(0, 0)[0];
        assert!(enhanced.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_stretches_local_contrast() {
        let image = low_contrast_disk(96, 20, 12345);
        let enhanced = ClaheEqualizer::default().preprocess(&image);

        let mean = |inside: bool, img: &GrayImage| {
            let values: Vec<f64> = img
                .enumerate_pixels()
                .filter(|(x, y, _)| {
                    let (dx, dy) = (*x as i64 - 48, *y as i64 - 48);
                    let d2 = dx * dx + dy * dy;
                    if inside { d2 <= 15 * 15 } else { d2 >= 26 * 26 }
                })
                .map(|(_, _, p)| p[0] as f64)
                .collect();
            values.iter().sum::<f64>() / values.len() as f64
        };
        let raw_gap = mean(true, &image) - mean(false, &image);
        let enhanced_gap = mean(true, &enhanced) - mean(false, &enhanced);
        assert!((raw_gap - 30.0).abs() < 2.0, "raw gap {}", raw_gap);
        assert!(enhanced_gap > 35.0, "enhanced gap {}", enhanced_gap);
    }

    #[test]
    fn test_clahe_handles_images_smaller_than_the_grid() {
        let tiny = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));
        assert_eq!(clahe(&tiny, 2.0, 8).dimensions(), (3, 2));
    }

    #[test]
    fn test_gaussian_kernel_normalized_and_symmetric() {
        let kernel = gaussian_kernel(11);
        assert_eq!(kernel.len(), 11);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..5 {
            assert!((kernel[i] - kernel[10 - i]).abs() < 1e-7);
        }
        assert!(kernel[5] > kernel[4]);
    }

    #[test]
    fn test_uniform_image_has_no_foreground() {
        let black = GrayImage::new(32, 32);
        assert!(adaptive_binarize(&black, 11, 2.0).is_empty());

        let grey = GrayImage::from_pixel(32, 32, Luma([140u8]));
        assert!(adaptive_binarize(&grey, 11, 2.0).is_empty());
    }

    #[test]
    fn test_dark_spot_on_bright_background_is_foreground() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([200u8]));
        for y in 18..22 {
            for x in 18..22 {
                img.put_pixel(x, y, Luma([40u8]));
            }
        }

        let mask = adaptive_binarize(&img, 11, 2.0);
        assert!(mask.is_foreground(19, 19));
        assert!(!mask.is_foreground(5, 5));
        assert!(!mask.is_foreground(30, 19));
    }

    #[test]
    fn test_clean_removes_isolated_speck() {
        let mut mask = BinaryMask::new(20, 20);
        mask.set(10, 10, true);
        for y in 2..8 {
            for x in 2..8 {
                mask.set(x, y, true);
            }
        }

        let cleaned = morphological_clean(&mask, 3);
        assert!(!cleaned.is_foreground(10, 10));
        assert!(cleaned.is_foreground(4, 4));
    }

    #[test]
    fn test_clean_fills_pinhole() {
        let mut mask = BinaryMask::from_fn(20, 20, |x, y| (3..17).contains(&x) && (3..17).contains(&y));
        mask.set(10, 10, false);

        let cleaned = morphological_clean(&mask, 3);
        assert!(cleaned.is_foreground(10, 10));
    }

    #[test]
    fn test_clean_is_idempotent() {
        for seed in [1u64, 7, 42] {
            let mask = lcg_mask(48, 40, seed);
            let once = morphological_clean(&mask, 3);
            let twice = morphological_clean(&once, 3);
            assert_eq!(once, twice, "cleaning not idempotent for seed {}", seed);
        }
    }

    #[test]
    fn test_clean_output_is_strictly_binary() {
        let cleaned = morphological_clean(&lcg_mask(30, 30, 3), 3);
        assert!(cleaned.as_image().pixels().all(|p| p[0] == 0 || p[0] == 255));
    }
}
