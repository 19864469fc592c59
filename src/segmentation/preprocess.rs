use super::error::{Result, SegmentationError};
use super::profile::Normalization;
use super::types::NormalizedTensor;
use image::{imageops, RgbImage};
use ndarray::{Array4, Axis};

/// Bilinear-class filter used for both the frame downscale and the mask upscale
pub const INTERPOLATION: imageops::FilterType = imageops::FilterType::Triangle;

/// Slack allowed when checking normalized values against their expected range
pub const RANGE_TOLERANCE: f32 = 1e-4;

/// Turns camera frames into model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, normalization: Normalization) -> Self {
        Self {
            target_width,
            target_height,
            normalization,
        }
    }

    /// Resize to model resolution; the source frame is left untouched
    pub fn resize(&self, image: &RgbImage) -> RgbImage {
        let _span = tracing::debug_span!("resize").entered();

        if image.dimensions() == (self.target_width, self.target_height) {
            image.clone()
        } else {
            imageops::resize(image, self.target_width, self.target_height, INTERPOLATION)
        }
    }

    /// Convert a model-resolution image into an NHWC float tensor
    ///
    /// The tensor keeps the image's memory order (rows, then pixels, then
    /// channels) with the model family's normalization applied per channel.
    pub fn normalize(&self, image: &RgbImage) -> Result<NormalizedTensor> {
        let _span = tracing::debug_span!("normalize").entered();

        let (width, height) = image.dimensions();
        let expected = width as usize * height as usize * 3;
        let raw: Vec<f32> = image.as_raw().iter().map(|&v| v as f32).collect();
        let actual = raw.len();

        let mut data = Array4::from_shape_vec((1, height as usize, width as usize, 3), raw)
            .map_err(|_| SegmentationError::BufferSize { expected, actual })?;

        let normalization = self.normalization;
        for (channel, mut plane) in data.axis_iter_mut(Axis(3)).enumerate() {
            plane.par_mapv_inplace(|v| normalization.apply(channel, v));
        }

        let tensor = NormalizedTensor { data };
        check_values_in_range(&tensor, normalization.expected_range);
        Ok(tensor)
    }

    /// Resize then normalize
    pub fn preprocess(&self, image: &RgbImage) -> Result<NormalizedTensor> {
        let resized = self.resize(image);
        self.normalize(&resized)
    }
}

/// Smallest and largest value in the tensor
pub fn value_range(tensor: &NormalizedTensor) -> (f32, f32) {
    tensor
        .data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(debug_assertions)]
fn check_values_in_range(tensor: &NormalizedTensor, (min, max): (f32, f32)) {
    let (lo, hi) = value_range(tensor);
    assert!(
        lo >= min - RANGE_TOLERANCE && hi <= max + RANGE_TOLERANCE,
        "normalized values [{}, {}] outside expected range [{}, {}]",
        lo,
        hi,
        min,
        max
    );
}

#[cfg(not(debug_assertions))]
fn check_values_in_range(_tensor: &NormalizedTensor, _range: (f32, f32)) {}
