use super::engine::OrtEngine;
use super::error::{Result, SegmentationError};
use super::profile::{ModelProfile, ProfileOptions};
use super::types::{
    ElementType, InferenceEngine, ModelKind, NormalizedTensor, TensorGeometry, TensorShape,
};
use std::path::Path;

/// Settings for loading a model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterConfig {
    /// Intra-op thread count, must be positive
    pub threads: usize,
    /// Request the GPU execution provider
    pub gpu: bool,
    pub profile: ProfileOptions,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            gpu: false,
            profile: ProfileOptions::default(),
        }
    }
}

/// A loaded segmentation model with validated geometry
///
/// Not reentrant: `run_inference` takes `&mut self`, so concurrent use needs
/// a dedicated thread or a mutex around the adapter.
pub struct ModelAdapter {
    engine: Box<dyn InferenceEngine>,
    profile: ModelProfile,
    geometry: TensorGeometry,
}

impl ModelAdapter {
    /// Load an ONNX model of the named kind
    ///
    /// Fails on an unknown kind name before touching the model file.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        kind_name: &str,
        config: &AdapterConfig,
    ) -> Result<Self> {
        let kind: ModelKind = kind_name.parse()?;
        if config.threads == 0 {
            return Err(SegmentationError::InvalidOption(
                "thread count must be positive".into(),
            ));
        }
        let profile = ModelProfile::new(kind, &config.profile)?;
        let engine = OrtEngine::open(model_path.as_ref(), config.threads, config.gpu)?;
        Self::from_engine(Box::new(engine), profile)
    }

    /// Wrap an already loaded engine, checking its tensors against the profile
    ///
    /// On failure the engine is dropped here.
    pub fn from_engine(engine: Box<dyn InferenceEngine>, profile: ModelProfile) -> Result<Self> {
        profile.validate()?;
        let geometry = validate_geometry(engine.input_shape(), engine.output_shape(), &profile)?;

        tracing::info!(
            "Initialized {} model with {}x{}px input and stride={}",
            profile.kind,
            geometry.width,
            geometry.height,
            geometry.stride
        );

        Ok(Self {
            engine,
            profile,
            geometry,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn geometry(&self) -> TensorGeometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn stride(&self) -> u32 {
        self.geometry.stride
    }

    /// Run the model synchronously
    ///
    /// The returned slice belongs to the adapter and is overwritten by the
    /// next call.
    pub fn run_inference(&mut self, tensor: &NormalizedTensor) -> Result<&[f32]> {
        let expected = self.geometry.input_len();
        if tensor.len() != expected
            || (tensor.width(), tensor.height()) != (self.geometry.width, self.geometry.height)
        {
            return Err(SegmentationError::BufferSize {
                expected,
                actual: tensor.len(),
            });
        }

        let expected = self.geometry.output_len();
        let output = self.engine.run(tensor.view())?;
        if output.len() != expected {
            return Err(SegmentationError::BufferSize {
                expected,
                actual: output.len(),
            });
        }
        Ok(output)
    }
}

fn incompatible(message: String) -> SegmentationError {
    SegmentationError::IncompatibleModel(message)
}

fn check_float32_rank4(shape: &TensorShape, name: &str) -> Result<()> {
    if shape.element != ElementType::Float32 {
        return Err(incompatible(format!("{name} tensor must be float32, got {shape}")));
    }
    if shape.dims.len() != 4 {
        return Err(incompatible(format!(
            "{name} tensor must have 4 dimensions, got {shape}"
        )));
    }
    Ok(())
}

fn spatial_dim(shape: &TensorShape, index: usize, name: &str) -> Result<u32> {
    let dim = shape.dims[index];
    u32::try_from(dim)
        .ok()
        .filter(|&d| d > 0)
        .ok_or_else(|| incompatible(format!("{name} tensor has unusable dimension {dim} in {shape}")))
}

/// Check discovered tensor shapes against a model profile
///
/// The input must be `[1, width, height, 3]`; the output
/// `[_, width / stride, height / stride, channels]` with the same integer
/// stride on both axes, a stride the profile allows, and the profile's
/// channel count.
pub fn validate_geometry(
    input: &TensorShape,
    output: &TensorShape,
    profile: &ModelProfile,
) -> Result<TensorGeometry> {
    check_float32_rank4(input, "input")?;
    if input.dims[0] != 1 {
        return Err(incompatible(format!("input tensor batch size must be 1, got {input}")));
    }
    if input.dims[3] != 3 {
        return Err(incompatible(format!("input tensor must have 3 channels, got {input}")));
    }
    let width = spatial_dim(input, 1, "input")?;
    let height = spatial_dim(input, 2, "input")?;

    check_float32_rank4(output, "output")?;
    let out_width = spatial_dim(output, 1, "output")?;
    let out_height = spatial_dim(output, 2, "output")?;

    if width % out_width != 0 {
        return Err(incompatible(format!(
            "output width {out_width} does not evenly divide input width {width}"
        )));
    }
    let stride = width / out_width;
    if height % out_height != 0 {
        return Err(incompatible(format!(
            "output height {out_height} does not evenly divide input height {height}"
        )));
    }
    if height / out_height != stride {
        return Err(incompatible(format!(
            "vertical stride {} doesn't match horizontal stride {}",
            height / out_height,
            stride
        )));
    }

    if !profile.legal_strides.contains(&stride) {
        return Err(incompatible(format!(
            "{} requires stride in {:?}, model has stride {}",
            profile.kind, profile.legal_strides, stride
        )));
    }
    let channels = profile.channels();
    if output.dims[3] != channels as i64 {
        return Err(incompatible(format!(
            "{} requires {} output channels, model has {}",
            profile.kind, channels, output.dims[3]
        )));
    }

    Ok(TensorGeometry {
        width,
        height,
        stride,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::profile::Decoder;
    use crate::segmentation::testing::FixedOutputEngine;
    use ndarray::Array4;
    use std::io::Write;

    fn profile(kind: ModelKind) -> ModelProfile {
        ModelProfile::new(kind, &ProfileOptions::default()).unwrap()
    }

    fn adapter(kind: ModelKind, engine: FixedOutputEngine) -> Result<ModelAdapter> {
        ModelAdapter::from_engine(Box::new(engine), profile(kind))
    }

    #[test]
    fn accepts_models_matching_each_contract() {
        let cases = [
            (ModelKind::DeepLabV3, 513, 1, 21),
            (ModelKind::BodyPixResNet, 512, 16, 1),
            (ModelKind::BodyPixResNet, 512, 32, 1),
            (ModelKind::BodyPixMobileNet, 256, 8, 1),
            (ModelKind::BodyPixMobileNet, 256, 16, 1),
        ];
        for (kind, size, stride, channels) in cases {
            let engine = FixedOutputEngine::nhwc(size, size, stride, channels, Vec::new());
            let adapter = adapter(kind, engine).unwrap();
            let geometry = adapter.geometry();
            assert_eq!(adapter.kind(), kind);
            assert_eq!(adapter.stride(), stride as u32);
            assert_eq!(geometry.width % geometry.stride, 0);
            assert_eq!(geometry.height % geometry.stride, 0);
            assert_eq!(geometry.mask_width() * geometry.stride, geometry.width);
            assert_eq!(geometry.mask_height() * geometry.stride, geometry.height);
        }
    }

    #[test]
    fn rejects_wrong_stride_for_kind() {
        let cases = [
            (ModelKind::DeepLabV3, 512, 16, 21),
            (ModelKind::BodyPixResNet, 512, 8, 1),
            (ModelKind::BodyPixMobileNet, 512, 32, 1),
        ];
        for (kind, size, stride, channels) in cases {
            let engine = FixedOutputEngine::nhwc(size, size, stride, channels, Vec::new());
            assert!(matches!(
                adapter(kind, engine),
                Err(SegmentationError::IncompatibleModel(_))
            ));
        }
    }

    #[test]
    fn rejects_wrong_channel_count_for_kind() {
        let cases = [
            (ModelKind::DeepLabV3, 1, 1),
            (ModelKind::BodyPixResNet, 16, 21),
            (ModelKind::BodyPixMobileNet, 8, 2),
        ];
        for (kind, stride, channels) in cases {
            let engine = FixedOutputEngine::nhwc(256, 256, stride, channels, Vec::new());
            assert!(matches!(
                adapter(kind, engine),
                Err(SegmentationError::IncompatibleModel(_))
            ));
        }
    }

    #[test]
    fn rejects_malformed_input_tensors() {
        let output = TensorShape::float32(&[1, 16, 16, 1]);
        let inputs = [
            TensorShape::float32(&[2, 256, 256, 3]),
            TensorShape::float32(&[1, 256, 256, 4]),
            TensorShape::float32(&[1, 256, 256]),
            TensorShape::float32(&[1, -1, 256, 3]),
            TensorShape {
                element: ElementType::Other("Uint8".into()),
                dims: vec![1, 256, 256, 3],
            },
        ];
        for input in inputs {
            let engine = FixedOutputEngine::new(input, output.clone(), Vec::new());
            assert!(adapter(ModelKind::BodyPixMobileNet, engine).is_err());
        }
    }

    #[test]
    fn rejects_uneven_or_mismatched_strides() {
        let input = TensorShape::float32(&[1, 256, 256, 3]);
        let outputs = [
            TensorShape::float32(&[1, 30, 32, 1]),
            TensorShape::float32(&[1, 32, 16, 1]),
            TensorShape::float32(&[1, 32, 32]),
        ];
        for output in outputs {
            let engine = FixedOutputEngine::new(input.clone(), output, Vec::new());
            assert!(adapter(ModelKind::BodyPixMobileNet, engine).is_err());
        }
    }

    #[test]
    fn unknown_kind_fails_before_loading() {
        let result = ModelAdapter::load("/nonexistent/model.onnx", "unet", &AdapterConfig::default());
        assert!(matches!(result, Err(SegmentationError::UnknownModelKind(_))));
    }

    #[test]
    fn zero_threads_is_a_configuration_error() {
        let config = AdapterConfig {
            threads: 0,
            ..Default::default()
        };
        let result = ModelAdapter::load("/nonexistent/model.onnx", "deeplabv3", &config);
        assert!(matches!(result, Err(SegmentationError::InvalidOption(_))));
    }

    #[test]
    fn run_inference_checks_buffer_sizes() {
        let engine = FixedOutputEngine::nhwc(32, 32, 16, 1, vec![0.7; 4]);
        let mut adapter = adapter(ModelKind::BodyPixResNet, engine).unwrap();

        let wrong = NormalizedTensor {
            data: Array4::zeros((1, 16, 16, 3)),
        };
        assert!(matches!(
            adapter.run_inference(&wrong),
            Err(SegmentationError::BufferSize { .. })
        ));

        let right = NormalizedTensor {
            data: Array4::zeros((1, 32, 32, 3)),
        };
        assert_eq!(adapter.run_inference(&right).unwrap(), &[0.7f32; 4]);
    }

    #[test]
    fn run_inference_rejects_short_outputs() {
        let engine = FixedOutputEngine::nhwc(32, 32, 16, 1, vec![0.7; 3]);
        let mut adapter = adapter(ModelKind::BodyPixResNet, engine).unwrap();
        let tensor = NormalizedTensor {
            data: Array4::zeros((1, 32, 32, 3)),
        };
        assert!(matches!(
            adapter.run_inference(&tensor),
            Err(SegmentationError::BufferSize {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn missing_model_file_is_a_load_error() {
        let result = ModelAdapter::load(
            "/nonexistent/model.onnx",
            "deeplabv3",
            &AdapterConfig::default(),
        );
        assert!(matches!(result, Err(SegmentationError::ModelLoad { .. })));
    }

    #[test]
    fn corrupt_model_file_is_a_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an onnx protobuf").unwrap();
        file.flush().unwrap();

        let result = ModelAdapter::load(file.path(), "bodypix_mobilenet", &AdapterConfig::default());
        match result {
            Err(SegmentationError::ModelLoad { path, .. }) => assert_eq!(path, file.path()),
            Err(other) => panic!("expected a load error, got {other}"),
            Ok(_) => panic!("garbage bytes loaded as a model"),
        }
    }

    #[test]
    fn out_of_range_options_fail_before_loading() {
        let config = AdapterConfig {
            profile: ProfileOptions {
                person_class: 99,
                threshold: 7.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = ModelAdapter::load("/nonexistent/model.onnx", "deeplabv3", &config);
        assert!(matches!(result, Err(SegmentationError::InvalidOption(_))));
    }

    #[test]
    fn from_engine_rejects_edited_profiles() {
        let mut deeplab = profile(ModelKind::DeepLabV3);
        deeplab.decoder = Decoder::ArgMax {
            classes: 21,
            person_class: 99,
        };
        let engine = FixedOutputEngine::nhwc(16, 16, 1, 21, Vec::new());
        assert!(matches!(
            ModelAdapter::from_engine(Box::new(engine), deeplab),
            Err(SegmentationError::InvalidOption(_))
        ));

        let mut mobilenet = profile(ModelKind::BodyPixMobileNet);
        mobilenet.decoder = Decoder::Threshold { threshold: 7.0 };
        let engine = FixedOutputEngine::nhwc(256, 256, 8, 1, Vec::new());
        assert!(matches!(
            ModelAdapter::from_engine(Box::new(engine), mobilenet),
            Err(SegmentationError::InvalidOption(_))
        ));
    }
}
