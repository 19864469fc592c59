mod adapter;
mod decode;
mod engine;
mod error;
mod pipeline;
mod preprocess;
mod profile;
pub mod testing;
pub mod types;

pub use adapter::{validate_geometry, AdapterConfig, ModelAdapter};
pub use engine::OrtEngine;
pub use error::{Result, SegmentationError};
pub use pipeline::{composite, upscale_mask, SegmentationPipeline};
pub use preprocess::{value_range, Preprocessor, INTERPOLATION};
pub use profile::{
    Decoder, ModelProfile, Normalization, ProfileOptions, BODYPIX_RESNET_MEAN, DEEPLABV3_LABELS,
};
pub use types::{
    ElementType, InferenceEngine, ModelKind, NormalizedTensor, SegmentationMask, TensorGeometry,
    TensorShape, MASK_BACKGROUND, MASK_PERSON,
};

use std::path::Path;

/// Load a model and wrap it in a ready-to-use pipeline
pub fn create_pipeline<P: AsRef<Path>>(
    model_path: P,
    kind_name: &str,
    config: &AdapterConfig,
) -> Result<SegmentationPipeline> {
    let adapter = ModelAdapter::load(model_path, kind_name, config)?;
    Ok(SegmentationPipeline::new(adapter))
}
