use super::error::{Result, SegmentationError};
use super::profile::Decoder;
use super::types::{SegmentationMask, MASK_BACKGROUND, MASK_PERSON};
use image::GrayImage;
use rayon::prelude::*;

impl Decoder {
    /// Decode a raw model output into a `mask_width` x `mask_height` mask
    ///
    /// Cells are laid out row-major (`y * mask_width + x`). Every cell is
    /// decoded independently, so the work is spread across the rayon pool.
    pub fn decode(
        &self,
        output: &[f32],
        mask_width: u32,
        mask_height: u32,
    ) -> Result<SegmentationMask> {
        let _span = tracing::debug_span!("decode").entered();

        let cells = mask_width as usize * mask_height as usize;
        let channels = self.channels();
        let expected = cells * channels;
        if output.len() != expected {
            return Err(SegmentationError::BufferSize {
                expected,
                actual: output.len(),
            });
        }

        let decoded: Vec<u8> = match *self {
            Decoder::ArgMax {
                classes,
                person_class,
            } => output
                .par_chunks_exact(classes)
                .map(|scores| {
                    if argmax(scores) == person_class {
                        MASK_PERSON
                    } else {
                        MASK_BACKGROUND
                    }
                })
                .collect(),
            Decoder::Threshold { threshold } => output
                .par_iter()
                .map(|&p| if p < threshold { MASK_BACKGROUND } else { MASK_PERSON })
                .collect(),
        };

        let actual = decoded.len();
        let image = GrayImage::from_raw(mask_width, mask_height, decoded).ok_or(
            SegmentationError::BufferSize {
                expected: cells,
                actual,
            },
        )?;
        Ok(SegmentationMask { image })
    }
}

/// Index of the highest score; ties go to the lowest index
fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEEPLAB: Decoder = Decoder::ArgMax {
        classes: 21,
        person_class: 15,
    };
    const BODYPIX: Decoder = Decoder::Threshold { threshold: 0.5 };

    fn scores_with(class: usize, score: f32) -> Vec<f32> {
        let mut scores = vec![0.0; 21];
        scores[class] = score;
        scores
    }

    #[test]
    fn person_argmax_is_kept() {
        let mask = DEEPLAB.decode(&scores_with(15, 10.0), 1, 1).unwrap();
        assert_eq!(mask.get(0, 0), MASK_PERSON);
    }

    #[test]
    fn background_argmax_is_replaced() {
        let mask = DEEPLAB.decode(&scores_with(0, 10.0), 1, 1).unwrap();
        assert_eq!(mask.get(0, 0), MASK_BACKGROUND);
    }

    #[test]
    fn other_classes_are_replaced() {
        let mask = DEEPLAB.decode(&scores_with(8, 3.0), 1, 1).unwrap();
        assert_eq!(mask.get(0, 0), MASK_BACKGROUND);
    }

    #[test]
    fn ties_resolve_to_the_first_class() {
        let mut scores = scores_with(15, 5.0);
        scores[0] = 5.0;
        let mask = DEEPLAB.decode(&scores, 1, 1).unwrap();
        assert_eq!(mask.get(0, 0), MASK_BACKGROUND);

        assert_eq!(argmax(&[1.0, 3.0, 3.0]), 1);
    }

    #[test]
    fn threshold_boundaries() {
        let mask = BODYPIX.decode(&[0.5, 0.4999, 0.5001], 3, 1).unwrap();
        assert_eq!(mask.get(0, 0), MASK_PERSON);
        assert_eq!(mask.get(1, 0), MASK_BACKGROUND);
        assert_eq!(mask.get(2, 0), MASK_PERSON);
    }

    #[test]
    fn cells_are_row_major() {
        // 3x2 mask, only (x=2, y=0) and (x=0, y=1) are people
        let output = [0.0, 0.0, 0.9, 0.8, 0.1, 0.1];
        let mask = BODYPIX.decode(&output, 3, 2).unwrap();
        assert_eq!(mask.get(2, 0), MASK_PERSON);
        assert_eq!(mask.get(0, 1), MASK_PERSON);
        assert_eq!(mask.get(1, 1), MASK_BACKGROUND);
        assert_eq!(mask.cells(), &[1u8, 1, 0, 0, 1, 1]);
    }

    #[test]
    fn decode_is_deterministic() {
        let output: Vec<f32> = (0..64 * 48 * 21)
            .map(|i| ((i * 7919) % 1000) as f32 / 100.0)
            .collect();
        let first = DEEPLAB.decode(&output, 64, 48).unwrap();
        let second = DEEPLAB.decode(&output, 64, 48).unwrap();
        assert_eq!(first, second);

        let probabilities: Vec<f32> = (0..64 * 48).map(|i| (i % 100) as f32 / 100.0).collect();
        let first = BODYPIX.decode(&probabilities, 64, 48).unwrap();
        let second = BODYPIX.decode(&probabilities, 64, 48).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        let err = DEEPLAB.decode(&[0.0; 20], 1, 1).unwrap_err();
        assert!(matches!(
            err,
            SegmentationError::BufferSize {
                expected: 21,
                actual: 20
            }
        ));
    }
}
