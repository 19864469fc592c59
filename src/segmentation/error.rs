use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a segmentation model or processing a frame
///
/// Everything except `ShapeMismatch` indicates an unusable model or corrupted
/// state; callers are expected to abort rather than retry.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("unknown model type '{0}' (expected deeplabv3, bodypix_resnet or bodypix_mobilenet)")]
    UnknownModelKind(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("failed to load model from {}: {source}", .path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },

    #[error("incompatible model: {0}")]
    IncompatibleModel(String),

    #[error("frame is {}x{} but replacement image is {}x{}", .frame.0, .frame.1, .replacement.0, .replacement.1)]
    ShapeMismatch {
        frame: (u32, u32),
        replacement: (u32, u32),
    },

    #[error("unexpected buffer size: expected {expected} elements, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
}

pub type Result<T> = std::result::Result<T, SegmentationError>;
