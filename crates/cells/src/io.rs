use std::path::Path;

use image::DynamicImage;
use tracing::debug;

use crate::{
    error::{CellError, Result},
    traits::ImageLoader,
};

/// Decodes images from the filesystem, format chosen by extension
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load(&self, path: &Path) -> Result<DynamicImage> {
        let image = image::open(path).map_err(|source| CellError::Decode {
            image_id: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), width = image.width(), height = image.height(), "image decoded");
        Ok(image)
    }
}
