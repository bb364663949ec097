//! Encoder and decoder backends.
//!
//! The size-targeting code only talks to these through the [`JpegEncoder`]
//! and [`PageRasterizer`] traits so that searches can be driven by synthetic
//! encoders in tests. PDF output is always built with [`PdfComposer`].

mod jpeg;
mod pdf;
mod pdfium;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use image::DynamicImage;

pub use jpeg::{ImageJpegEncoder, JpegEncoder};
pub use pdf::{ImagePlacement, PdfComposer};
pub use pdfium::{PageRasterizer, PdfiumRasterizer};

/// Decode a JPEG or PNG source. Returns `None` for anything else or for
/// malformed data.
pub fn decode_raster(bytes: &[u8]) -> Option<DynamicImage> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg | image::ImageFormat::Png => image::load_from_memory(bytes).ok(),
        _ => None,
    }
}

/// Codec backends shared by every render
#[derive(Clone)]
pub struct Codecs {
    pub jpeg: Arc<dyn JpegEncoder>,
    pub rasterizer: Arc<dyn PageRasterizer>,
}

impl Default for Codecs {
    fn default() -> Self {
        Self {
            jpeg: Arc::new(ImageJpegEncoder),
            rasterizer: Arc::new(PdfiumRasterizer),
        }
    }
}
