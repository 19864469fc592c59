//! Person/background segmentation for live video
//!
//! A [`segmentation::ModelAdapter`] loads one of the supported model families
//! and validates its tensors; a [`segmentation::SegmentationPipeline`] turns
//! each camera frame into a person mask and paints a replacement background
//! over everything else.

pub mod capture;
pub mod debug;
pub mod output;
pub mod segmentation;
