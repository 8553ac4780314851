use thiserror::Error;

#[derive(Error, Debug)]
pub enum CellError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("Failed to decode image '{image_id}': {source}")]
    Decode {
        image_id: String,
        #[source]
        source: image::ImageError,
    },

    #[error("No images supplied")]
    EmptyInput,

    #[error("Invalid parameter '{name}' = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CellError>;
