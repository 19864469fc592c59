use super::error::{Result, SegmentationError};
use super::types::{ElementType, InferenceEngine, TensorShape};
use ndarray::ArrayView4;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use std::path::Path;

/// ONNX Runtime backed inference engine
///
/// Owns the session (and through it any execution provider attached at build
/// time) plus a single reused output buffer. Dropping the engine releases the
/// session, which tears down providers before the model itself.
pub struct OrtEngine {
    session: Session,
    input: TensorShape,
    output: TensorShape,
    output_buffer: Vec<f32>,
    gpu: bool,
}

impl OrtEngine {
    /// Load a model and allocate its tensors
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `threads` - Intra-op thread count
    /// * `gpu` - Attach the CUDA execution provider; failing to attach it is an error
    pub fn open<P: AsRef<Path>>(model_path: P, threads: usize, gpu: bool) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!(
            "Loading model from {} ({} threads, gpu={})",
            path.display(),
            threads,
            gpu
        );

        let session = build_session(path, threads, gpu).map_err(|source| {
            SegmentationError::ModelLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let input = session
            .inputs
            .first()
            .map(|input| describe(&input.input_type))
            .ok_or_else(|| SegmentationError::IncompatibleModel("model has no inputs".into()))?;
        let output = session
            .outputs
            .first()
            .map(|output| describe(&output.output_type))
            .ok_or_else(|| SegmentationError::IncompatibleModel("model has no outputs".into()))?;

        tracing::info!("Input tensor: {}", input);
        tracing::info!("Output tensor: {}", output);

        Ok(Self {
            session,
            input,
            output,
            output_buffer: Vec::new(),
            gpu,
        })
    }
}

fn build_session(path: &Path, threads: usize, gpu: bool) -> ort::Result<Session> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads)?;

    if gpu {
        builder = builder.with_execution_providers([CUDAExecutionProvider::default()
            .build()
            .error_on_failure()])?;
    }

    builder.commit_from_file(path)
}

fn describe(value_type: &ValueType) -> TensorShape {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => describe_tensor(*ty, shape),
        other => TensorShape {
            element: ElementType::Other(format!("{:?}", other)),
            dims: Vec::new(),
        },
    }
}

fn describe_tensor(ty: TensorElementType, dims: &[i64]) -> TensorShape {
    TensorShape {
        element: if ty == TensorElementType::Float32 {
            ElementType::Float32
        } else {
            ElementType::Other(format!("{:?}", ty))
        },
        dims: dims.to_vec(),
    }
}

impl InferenceEngine for OrtEngine {
    fn input_shape(&self) -> &TensorShape {
        &self.input
    }

    fn output_shape(&self) -> &TensorShape {
        &self.output
    }

    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<&[f32]> {
        let _span = tracing::debug_span!("ort_run").entered();

        // The model declares its own dimension order; the data is already in it.
        let value = Tensor::from_array((
            self.input.dims.clone(),
            input.iter().copied().collect::<Vec<f32>>(),
        ))?;

        {
            let outputs = self.session.run(ort::inputs![value])?;
            let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
            self.output_buffer.clear();
            self.output_buffer.extend_from_slice(data);
        }

        Ok(&self.output_buffer)
    }
}

impl Drop for OrtEngine {
    fn drop(&mut self) {
        tracing::debug!("Releasing inference session (gpu={})", self.gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float32_tensors_keep_their_dims() {
        let shape = describe_tensor(TensorElementType::Float32, &[1, 513, 513, 3]);
        assert_eq!(shape, TensorShape::float32(&[1, 513, 513, 3]));
    }

    #[test]
    fn quantized_tensors_are_reported_by_name() {
        let shape = describe_tensor(TensorElementType::Uint8, &[1, 257, 257, 3]);
        assert_eq!(shape.element, ElementType::Other("Uint8".into()));
        assert_eq!(shape.dims, vec![1, 257, 257, 3]);
        assert!(shape.to_string().contains("Uint8"));
    }
}
