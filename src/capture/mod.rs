mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Source of camera frames handed to the segmentation pipeline
pub trait CaptureSource {
    /// Capture a single RGB frame
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Resolution frames are delivered at
    fn resolution(&self) -> (u32, u32);
}
