//! Size-targeted JPEG compression.
//!
//! There is no closed-form mapping from JPEG quality to output size, so both
//! budget modes search the quality space with a bounded number of trial
//! encodes:
//!
//! - **Ceiling**: binary search on quality in `[0.2, 0.95]`, keeping the
//!   highest quality whose encode fits.
//! - **Exact**: ceiling search, then zero padding up to the target. If even
//!   the lowest quality overshoots, the image is shrunk by 10% and the search
//!   repeats until a dimension would fall below 120 px.
//!
//! The searches assume output size never shrinks as quality rises.

use bytes::Bytes;
use image::RgbImage;
use tracing::{debug, trace};

use crate::codec::JpegEncoder;
use crate::error::{ServiceError, ServiceResult};
use crate::imaging::scale_by_factor;

/// Lowest quality the search will try
pub const QUALITY_FLOOR: f32 = 0.2;

/// Highest quality the search will try
pub const QUALITY_CEILING: f32 = 0.95;

/// Trial encodes per ceiling search
pub const CEILING_ITERATIONS: usize = 8;

/// Search-and-shrink rounds for an exact budget
pub const EXACT_ROUNDS: usize = 10;

/// Trial encodes per search when probing
pub const FAST_PROBE_ITERATIONS: usize = 4;

const SHRINK_FACTOR: f64 = 0.9;

/// Neither dimension is shrunk below this many pixels.
const MIN_DIMENSION: u32 = 120;

/// Outcome of a size-targeted encode
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub bytes: Bytes,
    pub quality_used: f32,
    /// Linear scale applied to the input before the winning encode
    pub scale_used: f64,
    /// `false` when the budget could not be met within the search floors,
    /// or when the result came from the fast probe.
    pub exact: bool,
}

impl CompressionResult {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Binary search for the highest quality whose encode is `<= max_bytes`.
///
/// When no trial fits, the lowest-quality encode attempted is returned with
/// `exact = false`. The caller decides whether that is acceptable.
pub fn compress_to_ceiling(
    encoder: &dyn JpegEncoder,
    image: &RgbImage,
    dpi: u16,
    max_bytes: usize,
    max_iterations: usize,
) -> ServiceResult<CompressionResult> {
    let mut low = QUALITY_FLOOR;
    let mut high = QUALITY_CEILING;
    let mut best: Option<(Vec<u8>, f32)> = None;
    let mut lowest: Option<(Vec<u8>, f32)> = None;

    for iteration in 0..max_iterations.max(1) {
        let quality = (low + high) / 2.0;
        let data = encoder.encode(image, quality, dpi)?;
        let fits = data.len() <= max_bytes;
        trace!(
            iteration = iteration,
            quality = quality,
            bytes = data.len(),
            max_bytes = max_bytes,
            fits = fits,
            "Quality trial"
        );

        if fits {
            low = quality;
            best = Some((data, quality));
        } else {
            high = quality;
            if lowest.as_ref().is_none_or(|(_, q)| quality < *q) {
                lowest = Some((data, quality));
            }
        }
    }

    let (data, quality, exact) = match (best, lowest) {
        (Some((data, quality)), _) => (data, quality, true),
        (None, Some((data, quality))) => (data, quality, false),
        (None, None) => {
            return Err(ServiceError::Internal {
                message: "quality search ran no trials".to_string(),
            });
        }
    };

    debug!(
        quality = quality,
        bytes = data.len(),
        max_bytes = max_bytes,
        fits = exact,
        "Ceiling search finished"
    );

    Ok(CompressionResult {
        bytes: Bytes::from(data),
        quality_used: quality,
        scale_used: 1.0,
        exact,
    })
}

/// Hit `target_bytes` exactly: search, shrink when the floor quality still
/// overshoots, then pad the winning encode with zero bytes.
pub fn compress_to_floor_and_ceiling(
    encoder: &dyn JpegEncoder,
    image: &RgbImage,
    dpi: u16,
    target_bytes: usize,
    max_rounds: usize,
) -> ServiceResult<CompressionResult> {
    let mut current = image.clone();
    let mut scale = 1.0;

    for round in 0..max_rounds {
        let result = compress_to_ceiling(encoder, &current, dpi, target_bytes, CEILING_ITERATIONS)?;
        if result.len() <= target_bytes {
            debug!(
                round = round,
                scale = scale,
                quality = result.quality_used,
                encoded = result.len(),
                target_bytes = target_bytes,
                "Exact size reached"
            );
            return Ok(CompressionResult {
                bytes: pad_to_size(result.bytes, target_bytes),
                scale_used: scale,
                exact: true,
                ..result
            });
        }

        let Some(next) = shrink_step(current) else {
            debug!(round = round, "Shrink would cross the minimum dimension");
            break;
        };
        current = next;
        scale *= SHRINK_FACTOR;
        debug!(
            round = round,
            scale = scale,
            size = %format!("{}x{}", current.width(), current.height()),
            "Shrinking to reach exact size"
        );
    }

    Err(ServiceError::TargetSizeUnreachable { target_bytes })
}

/// Cheap size estimate: a short search and at most one shrink. Never pads
/// and always reports `exact = false`.
pub fn compress_fast_probe(
    encoder: &dyn JpegEncoder,
    image: &RgbImage,
    dpi: u16,
    target_bytes: usize,
) -> ServiceResult<CompressionResult> {
    let first = compress_to_ceiling(encoder, image, dpi, target_bytes, FAST_PROBE_ITERATIONS)?;
    if first.len() <= target_bytes {
        return Ok(CompressionResult {
            exact: false,
            ..first
        });
    }

    let smaller = scale_by_factor(image.clone(), SHRINK_FACTOR);
    let second = compress_to_ceiling(encoder, &smaller, dpi, target_bytes, FAST_PROBE_ITERATIONS)?;
    Ok(CompressionResult {
        scale_used: SHRINK_FACTOR,
        exact: false,
        ..second
    })
}

/// Shrink by [`SHRINK_FACTOR`], or `None` when either resulting dimension
/// would drop below [`MIN_DIMENSION`].
fn shrink_step(image: RgbImage) -> Option<RgbImage> {
    let next_w = (f64::from(image.width()) * SHRINK_FACTOR).round() as u32;
    let next_h = (f64::from(image.height()) * SHRINK_FACTOR).round() as u32;
    if next_w < MIN_DIMENSION || next_h < MIN_DIMENSION {
        return None;
    }
    Some(scale_by_factor(image, SHRINK_FACTOR))
}

/// Right-pad with zero bytes; decoders stop at the EOI marker.
fn pad_to_size(data: Bytes, target: usize) -> Bytes {
    if data.len() >= target {
        return data;
    }
    let mut padded = Vec::with_capacity(target);
    padded.extend_from_slice(&data);
    padded.resize(target, 0);
    Bytes::from(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::LinearEncoder;
    use crate::codec::{ImageJpegEncoder, decode_raster};
    use image::Rgb;

    fn noise(width: u32, height: u32) -> RgbImage {
        let mut state: u32 = 0x1234_5678;
        RgbImage::from_fn(width, height, |x, y| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let n = (state & 0x3f) as u8;
            Rgb([
                ((x * 255 / width) as u8).saturating_add(n),
                ((y * 255 / height) as u8).saturating_add(n),
                128u8.saturating_add(n),
            ])
        })
    }

    #[test]
    fn test_ceiling_converges_below_budget() {
        // 100 px at 10 bytes/px: output is quality × 1000 bytes
        let encoder = LinearEncoder::new(10.0);
        let image = RgbImage::new(10, 10);
        let result = compress_to_ceiling(&encoder, &image, 200, 500, CEILING_ITERATIONS).unwrap();

        assert!(result.exact);
        assert!(result.quality_used > 0.49 && result.quality_used <= 0.5);
        assert_eq!(result.len(), 498);
        assert_eq!(encoder.calls(), CEILING_ITERATIONS);
    }

    #[test]
    fn test_ceiling_everything_fits_tends_to_top() {
        let encoder = LinearEncoder::new(1.0);
        let image = RgbImage::new(10, 10);
        let result = compress_to_ceiling(&encoder, &image, 200, 10_000, CEILING_ITERATIONS).unwrap();
        assert!(result.exact);
        assert!(result.quality_used > 0.94 && result.quality_used < QUALITY_CEILING);
    }

    #[test]
    fn test_ceiling_returns_lowest_attempt_when_nothing_fits() {
        let encoder = LinearEncoder::new(10.0);
        let image = RgbImage::new(10, 10);
        let result = compress_to_ceiling(&encoder, &image, 200, 10, CEILING_ITERATIONS).unwrap();

        assert!(!result.exact);
        assert!(result.len() > 10);
        assert!(result.quality_used > QUALITY_FLOOR && result.quality_used < 0.21);
        assert_eq!(encoder.calls(), CEILING_ITERATIONS);
    }

    #[test]
    fn test_ceiling_zero_iterations_still_encodes_once() {
        let encoder = LinearEncoder::new(10.0);
        let image = RgbImage::new(10, 10);
        let result = compress_to_ceiling(&encoder, &image, 200, 1_000, 0).unwrap();
        assert_eq!(encoder.calls(), 1);
        assert!((result.quality_used - 0.575).abs() < 1e-6);
    }

    #[test]
    fn test_exact_pads_to_target() {
        let encoder = LinearEncoder::new(10.0);
        let image = RgbImage::new(10, 10);
        let result =
            compress_to_floor_and_ceiling(&encoder, &image, 200, 500, EXACT_ROUNDS).unwrap();

        assert!(result.exact);
        assert_eq!(result.len(), 500);
        assert_eq!(result.scale_used, 1.0);
        assert!(result.bytes[498..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_exact_shrinks_until_floor_quality_fits() {
        // 400x400 at 1 byte/px: the floor quality only fits after three shrinks
        let encoder = LinearEncoder::new(1.0);
        let image = RgbImage::new(400, 400);
        let result =
            compress_to_floor_and_ceiling(&encoder, &image, 200, 20_000, EXACT_ROUNDS).unwrap();

        assert!(result.exact);
        assert_eq!(result.len(), 20_000);
        assert!((result.scale_used - 0.729).abs() < 1e-9);
        assert_eq!(encoder.calls(), 4 * CEILING_ITERATIONS);
    }

    #[test]
    fn test_exact_unreachable_stops_at_min_dimension() {
        let encoder = LinearEncoder::new(1.0);
        let image = RgbImage::new(200, 200);
        let err =
            compress_to_floor_and_ceiling(&encoder, &image, 200, 100, EXACT_ROUNDS).unwrap_err();

        assert!(matches!(
            err,
            ServiceError::TargetSizeUnreachable { target_bytes: 100 }
        ));
        // 200 -> 180 -> 162 -> 146 -> 131, then 118 would cross the floor
        assert_eq!(encoder.calls(), 5 * CEILING_ITERATIONS);
    }

    #[test]
    fn test_exact_small_source_gets_single_round() {
        let encoder = LinearEncoder::new(1.0);
        let image = RgbImage::new(100, 100);
        assert!(compress_to_floor_and_ceiling(&encoder, &image, 200, 10, EXACT_ROUNDS).is_err());
        assert_eq!(encoder.calls(), CEILING_ITERATIONS);
    }

    #[test]
    fn test_fast_probe_is_never_exact() {
        let encoder = LinearEncoder::new(10.0);
        let image = RgbImage::new(10, 10);
        let result = compress_fast_probe(&encoder, &image, 200, 500).unwrap();

        assert!(!result.exact);
        assert_eq!(result.len(), 481);
        assert_eq!(encoder.calls(), FAST_PROBE_ITERATIONS);
    }

    #[test]
    fn test_fast_probe_shrinks_once() {
        let encoder = LinearEncoder::new(1.0);
        let image = RgbImage::new(100, 100);
        let result = compress_fast_probe(&encoder, &image, 200, 1_500).unwrap();

        assert!(!result.exact);
        assert_eq!(result.scale_used, SHRINK_FACTOR);
        assert_eq!(encoder.calls(), 2 * FAST_PROBE_ITERATIONS);
    }

    #[test]
    fn test_real_jpeg_hits_exact_kb() {
        let image = noise(500, 500);
        let result =
            compress_to_floor_and_ceiling(&ImageJpegEncoder, &image, 200, 100 * 1024, EXACT_ROUNDS)
                .unwrap();

        assert!(result.exact);
        assert_eq!(result.len(), 102_400);
        let decoded = decode_raster(&result.bytes).expect("padded output still decodes");
        assert!(decoded.width() <= 500 && decoded.width() >= MIN_DIMENSION);
    }

    #[test]
    fn test_real_jpeg_respects_ceiling() {
        // smooth content fits 40 KB well above the floor quality
        let image = RgbImage::from_fn(600, 800, |x, y| {
            Rgb([(x * 255 / 600) as u8, (y * 255 / 800) as u8, 128])
        });
        let result =
            compress_to_ceiling(&ImageJpegEncoder, &image, 200, 40 * 1024, CEILING_ITERATIONS)
                .unwrap();
        assert!(result.exact);
        assert!(result.len() <= 40 * 1024);
        assert!(result.quality_used > QUALITY_FLOOR);
    }
}
