use super::error::Result;
use super::types::{InferenceEngine, TensorShape};
use ndarray::ArrayView4;

/// Engine that reports fixed shapes and answers every run with the same output
///
/// Stands in for a real model when exercising the adapter and pipeline.
pub struct FixedOutputEngine {
    input: TensorShape,
    output: TensorShape,
    data: Vec<f32>,
}

impl FixedOutputEngine {
    pub fn new(input: TensorShape, output: TensorShape, data: Vec<f32>) -> Self {
        Self {
            input,
            output,
            data,
        }
    }

    /// Float32 model with a `[1, width, height, 3]` input and a
    /// `[1, width / stride, height / stride, channels]` output
    pub fn nhwc(width: i64, height: i64, stride: i64, channels: i64, data: Vec<f32>) -> Self {
        Self::new(
            TensorShape::float32(&[1, width, height, 3]),
            TensorShape::float32(&[1, width / stride, height / stride, channels]),
            data,
        )
    }
}

impl InferenceEngine for FixedOutputEngine {
    fn input_shape(&self) -> &TensorShape {
        &self.input
    }

    fn output_shape(&self) -> &TensorShape {
        &self.output
    }

    fn run(&mut self, _input: ArrayView4<'_, f32>) -> Result<&[f32]> {
        Ok(&self.data)
    }
}
