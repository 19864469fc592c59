use super::error::{Result, SegmentationError};
use super::types::ModelKind;

/// Pascal VOC labels produced by the DeepLabV3 model, in output order
pub const DEEPLABV3_LABELS: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "board",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tv",
];

/// Mean pixel values subtracted by the BodyPix ResNet preprocessing
pub const BODYPIX_RESNET_MEAN: [f32; 3] = [123.15, 115.90, 103.06];

/// Tunables that are not derivable from model metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileOptions {
    /// DeepLabV3 class index treated as "person"
    pub person_class: usize,
    /// BodyPix probabilities below this are background
    pub threshold: f32,
    /// Expected normalized range for BodyPix ResNet inputs. Not verified
    /// against the model; only asserted in debug builds.
    pub resnet_range: (f32, f32),
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            person_class: 15,
            threshold: 0.5,
            resnet_range: (-127.0, 255.0),
        }
    }
}

impl ProfileOptions {
    pub fn validate(&self) -> Result<()> {
        if self.person_class >= DEEPLABV3_LABELS.len() {
            return Err(SegmentationError::InvalidOption(format!(
                "person class {} is out of range (0..{})",
                self.person_class,
                DEEPLABV3_LABELS.len()
            )));
        }
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(SegmentationError::InvalidOption(format!(
                "threshold {} must be within [0, 1]",
                self.threshold
            )));
        }
        let (min, max) = self.resnet_range;
        if min.is_nan() || max.is_nan() || min >= max {
            return Err(SegmentationError::InvalidOption(format!(
                "resnet range [{}, {}] is empty",
                min, max
            )));
        }
        Ok(())
    }
}

/// Per-channel affine map from 0-255 pixel values to model input values:
/// `out = in * scale + offset[c]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub scale: f32,
    pub offset: [f32; 3],
    /// Inclusive bounds every normalized value must fall within
    pub expected_range: (f32, f32),
}

impl Normalization {
    /// `in / 255 - 0.5`, landing in [-0.5, 0.5]
    pub fn unit_centered() -> Self {
        Self {
            scale: 1.0 / 255.0,
            offset: [-0.5; 3],
            expected_range: (-0.5, 0.5),
        }
    }

    /// `in - mean[c]`
    pub fn mean_subtracted(mean: [f32; 3], expected_range: (f32, f32)) -> Self {
        Self {
            scale: 1.0,
            offset: [-mean[0], -mean[1], -mean[2]],
            expected_range,
        }
    }

    #[inline]
    pub fn apply(&self, channel: usize, value: f32) -> f32 {
        value * self.scale + self.offset[channel]
    }
}

/// How the raw model output is turned into a mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoder {
    /// One score vector of `classes` floats per cell; the cell is kept only
    /// when `person_class` has the highest score
    ArgMax { classes: usize, person_class: usize },
    /// One person probability per cell; the cell is kept when `p >= threshold`
    Threshold { threshold: f32 },
}

impl Decoder {
    /// Floats per output cell
    pub fn channels(&self) -> usize {
        match self {
            Decoder::ArgMax { classes, .. } => *classes,
            Decoder::Threshold { .. } => 1,
        }
    }
}

/// Everything the pipeline needs to know about a model family, resolved once
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub kind: ModelKind,
    pub normalization: Normalization,
    pub decoder: Decoder,
    pub legal_strides: Vec<u32>,
}

impl ModelProfile {
    /// Resolve the profile for `kind`, rejecting options it could not honor
    pub fn new(kind: ModelKind, options: &ProfileOptions) -> Result<Self> {
        options.validate()?;
        let profile = match kind {
            ModelKind::DeepLabV3 => Self {
                kind,
                normalization: Normalization::unit_centered(),
                decoder: Decoder::ArgMax {
                    classes: DEEPLABV3_LABELS.len(),
                    person_class: options.person_class,
                },
                legal_strides: vec![1],
            },
            ModelKind::BodyPixResNet => Self {
                kind,
                normalization: Normalization::mean_subtracted(
                    BODYPIX_RESNET_MEAN,
                    options.resnet_range,
                ),
                decoder: Decoder::Threshold {
                    threshold: options.threshold,
                },
                legal_strides: vec![16, 32],
            },
            ModelKind::BodyPixMobileNet => Self {
                kind,
                normalization: Normalization::unit_centered(),
                decoder: Decoder::Threshold {
                    threshold: options.threshold,
                },
                legal_strides: vec![8, 16],
            },
        };
        Ok(profile)
    }

    pub fn channels(&self) -> usize {
        self.decoder.channels()
    }

    /// Check a profile whose public fields may have been edited after `new`
    pub fn validate(&self) -> Result<()> {
        match self.decoder {
            Decoder::ArgMax {
                classes,
                person_class,
            } => {
                if classes == 0 || person_class >= classes {
                    return Err(SegmentationError::InvalidOption(format!(
                        "person class {} is out of range (0..{})",
                        person_class, classes
                    )));
                }
            }
            Decoder::Threshold { threshold } => {
                if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                    return Err(SegmentationError::InvalidOption(format!(
                        "threshold {} must be within [0, 1]",
                        threshold
                    )));
                }
            }
        }
        if self.legal_strides.is_empty() || self.legal_strides.contains(&0) {
            return Err(SegmentationError::InvalidOption(format!(
                "{} strides {:?} must be non-empty and positive",
                self.kind, self.legal_strides
            )));
        }
        let (min, max) = self.normalization.expected_range;
        if min.is_nan() || max.is_nan() || min >= max {
            return Err(SegmentationError::InvalidOption(format!(
                "normalized range [{}, {}] is empty",
                min, max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_is_label_fifteen() {
        assert_eq!(DEEPLABV3_LABELS[15], "person");
        assert_eq!(DEEPLABV3_LABELS[0], "background");
    }

    #[test]
    fn profiles_follow_model_contracts() {
        let options = ProfileOptions::default();

        let deeplab = ModelProfile::new(ModelKind::DeepLabV3, &options).unwrap();
        assert_eq!(deeplab.legal_strides, vec![1]);
        assert_eq!(deeplab.channels(), 21);

        let resnet = ModelProfile::new(ModelKind::BodyPixResNet, &options).unwrap();
        assert_eq!(resnet.legal_strides, vec![16, 32]);
        assert_eq!(resnet.channels(), 1);
        assert_eq!(resnet.normalization.scale, 1.0);

        let mobilenet = ModelProfile::new(ModelKind::BodyPixMobileNet, &options).unwrap();
        assert_eq!(mobilenet.legal_strides, vec![8, 16]);
        assert_eq!(mobilenet.channels(), 1);
    }

    #[test]
    fn unit_centered_maps_extremes() {
        let norm = Normalization::unit_centered();
        assert_eq!(norm.apply(0, 0.0), -0.5);
        assert!((norm.apply(2, 255.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mean_subtraction_is_per_channel() {
        let norm = Normalization::mean_subtracted(BODYPIX_RESNET_MEAN, (-127.0, 255.0));
        assert!((norm.apply(0, 123.15)).abs() < 1e-4);
        assert!((norm.apply(1, 115.90)).abs() < 1e-4);
        assert!((norm.apply(2, 103.06)).abs() < 1e-4);
    }

    #[test]
    fn options_are_validated() {
        assert!(ProfileOptions::default().validate().is_ok());

        let bad_class = ProfileOptions {
            person_class: 21,
            ..Default::default()
        };
        assert!(bad_class.validate().is_err());

        let bad_threshold = ProfileOptions {
            threshold: f32::NAN,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());

        let empty_range = ProfileOptions {
            resnet_range: (1.0, 1.0),
            ..Default::default()
        };
        assert!(empty_range.validate().is_err());
    }

    #[test]
    fn out_of_range_options_never_build_a_profile() {
        let options = ProfileOptions {
            person_class: 99,
            threshold: 7.0,
            ..Default::default()
        };
        for kind in [
            ModelKind::DeepLabV3,
            ModelKind::BodyPixResNet,
            ModelKind::BodyPixMobileNet,
        ] {
            assert!(matches!(
                ModelProfile::new(kind, &options),
                Err(SegmentationError::InvalidOption(_))
            ));
        }
    }

    #[test]
    fn edited_profiles_are_revalidated() {
        let options = ProfileOptions::default();

        let mut deeplab = ModelProfile::new(ModelKind::DeepLabV3, &options).unwrap();
        assert!(deeplab.validate().is_ok());
        deeplab.decoder = Decoder::ArgMax {
            classes: 21,
            person_class: 99,
        };
        assert!(deeplab.validate().is_err());

        let mut mobilenet = ModelProfile::new(ModelKind::BodyPixMobileNet, &options).unwrap();
        mobilenet.decoder = Decoder::Threshold { threshold: 7.0 };
        assert!(mobilenet.validate().is_err());

        let mut resnet = ModelProfile::new(ModelKind::BodyPixResNet, &options).unwrap();
        resnet.legal_strides = vec![0];
        assert!(resnet.validate().is_err());
        resnet.legal_strides.clear();
        assert!(resnet.validate().is_err());
    }
}
