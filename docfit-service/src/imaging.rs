//! Pixel-level processing for photo, signature and scanned page renders.
//!
//! This module handles:
//! - Geometric transforms (rotation, clamped crop, resize, zoom)
//! - Colour normalisation onto an opaque white backdrop
//! - Background border trimming and monochrome thresholding
//! - Splitting scanned pages into a lossy base and a lossless ink layer

mod mask;
mod transform;

pub use mask::{BLACK_THRESHOLD, BlackMaskLayer, split_black_mask};
pub use transform::{
    CropRect, Geometry, binarize_to_threshold, crop, normalize_color, resize, rotate,
    scale_by_factor, trim_background_border,
};
