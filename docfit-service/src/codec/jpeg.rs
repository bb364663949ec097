use image::RgbImage;
use image::codecs::jpeg::{JpegEncoder as BaselineJpegEncoder, PixelDensity};

use crate::error::{CodecError, ServiceResult};

/// Single-shot JPEG encode of an opaque RGB buffer.
///
/// `quality` is in `[0, 1]`. Implementations are expected to produce output
/// that does not shrink as quality rises; the size searches rely on it.
pub trait JpegEncoder: Send + Sync {
    fn encode(&self, image: &RgbImage, quality: f32, dpi: u16) -> ServiceResult<Vec<u8>>;
}

/// Baseline JPEG encoder from the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageJpegEncoder;

impl JpegEncoder for ImageJpegEncoder {
    fn encode(&self, image: &RgbImage, quality: f32, dpi: u16) -> ServiceResult<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = BaselineJpegEncoder::new_with_quality(&mut buf, quality_percent(quality));
        encoder.set_pixel_density(PixelDensity::dpi(dpi));
        encoder.encode_image(image).map_err(CodecError::JpegEncode)?;
        Ok(buf)
    }
}

fn quality_percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}
