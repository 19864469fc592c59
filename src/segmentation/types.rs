use super::error::{Result, SegmentationError};
use image::GrayImage;
use ndarray::{Array4, ArrayView4};
use std::fmt;
use std::str::FromStr;

/// The supported segmentation model families
///
/// Each family was trained with its own input normalization and produces its
/// own output encoding, see [`super::ModelProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    DeepLabV3,
    BodyPixResNet,
    BodyPixMobileNet,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::DeepLabV3 => "deeplabv3",
            ModelKind::BodyPixResNet => "bodypix_resnet",
            ModelKind::BodyPixMobileNet => "bodypix_mobilenet",
        }
    }
}

impl FromStr for ModelKind {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deeplabv3" => Ok(ModelKind::DeepLabV3),
            "bodypix_resnet" => Ok(ModelKind::BodyPixResNet),
            "bodypix_mobilenet" => Ok(ModelKind::BodyPixMobileNet),
            other => Err(SegmentationError::UnknownModelKind(other.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type of a model tensor as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Float32,
    Other(String),
}

/// Element type and dimensions of one model input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShape {
    pub element: ElementType,
    pub dims: Vec<i64>,
}

impl TensorShape {
    pub fn float32(dims: &[i64]) -> Self {
        Self {
            element: ElementType::Float32,
            dims: dims.to_vec(),
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")?;
        if let ElementType::Other(name) = &self.element {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

/// Geometry discovered from the loaded model
///
/// Invariant: `stride` divides both `width` and `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub channels: usize,
}

impl TensorGeometry {
    pub fn mask_width(&self) -> u32 {
        self.width / self.stride
    }

    pub fn mask_height(&self) -> u32 {
        self.height / self.stride
    }

    /// Number of float32 elements in one model input
    pub fn input_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Number of float32 elements in one model output
    pub fn output_len(&self) -> usize {
        self.mask_width() as usize * self.mask_height() as usize * self.channels
    }
}

/// Model input for one frame: NHWC float32, shape `[1, height, width, 3]`
#[derive(Debug, Clone)]
pub struct NormalizedTensor {
    pub data: Array4<f32>,
}

impl NormalizedTensor {
    pub fn width(&self) -> u32 {
        self.data.shape()[2] as u32
    }

    pub fn height(&self) -> u32 {
        self.data.shape()[1] as u32
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }
}

/// Mask cell value for pixels that get replaced
pub const MASK_BACKGROUND: u8 = 1;
/// Mask cell value for pixels that are kept
pub const MASK_PERSON: u8 = 0;

/// Binary per-cell decision: 1 = background (replace), 0 = person (keep)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub image: GrayImage,
}

impl SegmentationMask {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.image.get_pixel(x, y)[0]
    }

    pub fn cells(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Opaque inference capability: a loaded model that can be run on one input
///
/// Implementations are not reentrant; the returned output slice is owned by
/// the engine and is overwritten by the next call to `run`.
pub trait InferenceEngine {
    /// Shape of the first model input, available after tensors are allocated
    fn input_shape(&self) -> &TensorShape;

    /// Shape of the first model output
    fn output_shape(&self) -> &TensorShape;

    /// Copy `input` into the model, run it synchronously and return the raw output
    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<&[f32]>;
}
