use super::adapter::ModelAdapter;
use super::error::{Result, SegmentationError};
use super::preprocess::{Preprocessor, INTERPOLATION};
use super::profile::Decoder;
use super::types::{SegmentationMask, MASK_BACKGROUND};
use crate::debug::DebugTap;
use image::{imageops, RgbImage};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Per-frame background replacement on top of a loaded model
///
/// The normalization and decode strategies are resolved from the adapter's
/// profile once, at construction.
pub struct SegmentationPipeline {
    adapter: ModelAdapter,
    preprocessor: Preprocessor,
    decoder: Decoder,
    debug_tap: Option<Box<dyn DebugTap>>,
    last_inference: Duration,
}

impl SegmentationPipeline {
    pub fn new(adapter: ModelAdapter) -> Self {
        let profile = adapter.profile();
        let preprocessor =
            Preprocessor::new(adapter.width(), adapter.height(), profile.normalization);
        let decoder = profile.decoder;
        Self {
            adapter,
            preprocessor,
            decoder,
            debug_tap: None,
            last_inference: Duration::ZERO,
        }
    }

    /// Hand intermediate buffers to `tap` on every frame
    pub fn with_debug_tap(mut self, tap: Box<dyn DebugTap>) -> Self {
        self.debug_tap = Some(tap);
        self
    }

    pub fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }

    /// Wall-clock duration of the most recent model invocation
    pub fn last_inference_time(&self) -> Duration {
        self.last_inference
    }

    /// Run the model on `frame` and return the mask at model output resolution
    pub fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMask> {
        let geometry = self.adapter.geometry();

        let resized = self.preprocessor.resize(frame);
        if let Some(tap) = self.debug_tap.as_mut() {
            tap.resized_input(&resized);
        }
        let tensor = self.preprocessor.normalize(&resized)?;

        let start = Instant::now();
        let output = {
            let _span = tracing::debug_span!("inference").entered();
            self.adapter.run_inference(&tensor)?
        };
        self.last_inference = start.elapsed();
        tracing::debug!(
            "Inference time: {:.1}ms",
            self.last_inference.as_secs_f64() * 1000.0
        );

        let mask = self
            .decoder
            .decode(output, geometry.mask_width(), geometry.mask_height())?;
        if let Some(tap) = self.debug_tap.as_mut() {
            tap.model_output(&mask);
        }
        Ok(mask)
    }

    /// Replace every background pixel of `frame` with the matching pixel of
    /// `replacement`
    ///
    /// The two images must have the same dimensions; otherwise the frame is
    /// left untouched and `ShapeMismatch` is returned.
    pub fn process(&mut self, frame: &mut RgbImage, replacement: &RgbImage) -> Result<()> {
        let _span = tracing::debug_span!("process").entered();

        check_same_size(frame, replacement)?;

        let mask = self.segment(frame)?;
        let (width, height) = frame.dimensions();
        let mask = upscale_mask(&mask, width, height);
        composite(frame, replacement, &mask)?;

        if let Some(tap) = self.debug_tap.as_mut() {
            tap.output_frame(frame);
        }
        Ok(())
    }
}

fn check_same_size(frame: &RgbImage, replacement: &RgbImage) -> Result<()> {
    if frame.dimensions() != replacement.dimensions() {
        return Err(SegmentationError::ShapeMismatch {
            frame: frame.dimensions(),
            replacement: replacement.dimensions(),
        });
    }
    Ok(())
}

/// Resize a mask to frame resolution with the same filter used on the input
///
/// Interpolating 0/1 cells and rounding keeps the mask binary while placing
/// edges where the downscaled geometry put them.
pub fn upscale_mask(mask: &SegmentationMask, width: u32, height: u32) -> SegmentationMask {
    let _span = tracing::debug_span!("upscale").entered();

    if mask.image.dimensions() == (width, height) {
        return mask.clone();
    }
    SegmentationMask {
        image: imageops::resize(&mask.image, width, height, INTERPOLATION),
    }
}

/// Copy `replacement` pixels into `frame` wherever `mask` marks background
pub fn composite(
    frame: &mut RgbImage,
    replacement: &RgbImage,
    mask: &SegmentationMask,
) -> Result<()> {
    let _span = tracing::debug_span!("composite").entered();

    check_same_size(frame, replacement)?;
    if mask.image.dimensions() != frame.dimensions() {
        let (width, height) = frame.dimensions();
        return Err(SegmentationError::BufferSize {
            expected: width as usize * height as usize,
            actual: mask.cells().len(),
        });
    }

    let pixels: &mut [u8] = &mut **frame;
    pixels
        .par_chunks_exact_mut(3)
        .zip(replacement.as_raw().par_chunks_exact(3))
        .zip(mask.cells().par_iter())
        .for_each(|((dst, src), &cell)| {
            if cell == MASK_BACKGROUND {
                dst.copy_from_slice(src);
            }
        });
    Ok(())
}
