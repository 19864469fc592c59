mod loopback;

pub use loopback::{rgb_to_yuyv, V4L2Output};

use anyhow::Result;
use image::RgbImage;

/// Destination for composited frames
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Resolution frames are written at
    fn resolution(&self) -> (u32, u32);
}
