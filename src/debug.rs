//! Read-only views of pipeline intermediates for troubleshooting

use crate::segmentation::SegmentationMask;
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Which intermediate buffers to expose
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub show_output_frame: bool,
    pub show_resized_input: bool,
    pub show_model_output: bool,
}

impl DebugFlags {
    pub fn any(&self) -> bool {
        self.show_output_frame || self.show_resized_input || self.show_model_output
    }
}

/// Observer handed intermediate buffers by the pipeline
///
/// Implementations must not hold on to the buffers past the call.
pub trait DebugTap {
    /// Frame resized to model resolution, before normalization. The
    /// normalized tensor is not passed here; its values are not viewable
    /// pixels.
    fn resized_input(&mut self, _image: &RgbImage) {}

    /// Decoded mask at model output resolution
    fn model_output(&mut self, _mask: &SegmentationMask) {}

    /// Frame after compositing
    fn output_frame(&mut self, _frame: &RgbImage) {}
}

/// Writes the enabled intermediates as PNGs, overwriting the previous frame's
pub struct FrameDumper {
    flags: DebugFlags,
    dir: PathBuf,
}

impl FrameDumper {
    pub fn new<P: AsRef<Path>>(dir: P, flags: DebugFlags) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create debug directory {}", dir.display()))?;
        tracing::info!("Writing debug frames to {}", dir.display());
        Ok(Self { flags, dir })
    }

    fn save(&self, name: &str, image: &RgbImage) {
        let path = self.dir.join(name);
        if let Err(e) = image.save(&path) {
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        }
    }
}

impl DebugTap for FrameDumper {
    fn resized_input(&mut self, image: &RgbImage) {
        if self.flags.show_resized_input {
            self.save("resized_input.png", image);
        }
    }

    fn model_output(&mut self, mask: &SegmentationMask) {
        if self.flags.show_model_output {
            self.save("model_output.png", &mask_to_rgb(mask));
        }
    }

    fn output_frame(&mut self, frame: &RgbImage) {
        if self.flags.show_output_frame {
            self.save("output_frame.png", frame);
        }
    }
}

/// Render a mask for viewing: background white, person black
pub fn mask_to_rgb(mask: &SegmentationMask) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let value = mask.get(x, y).saturating_mul(255);
        image::Rgb([value, value, value])
    })
}
