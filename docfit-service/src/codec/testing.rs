//! Deterministic codec stand-ins and fixtures for tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use super::{JpegEncoder, PageRasterizer};
use crate::error::ServiceResult;

/// Emits `pixels × quality × bytes_per_pixel` bytes and counts calls.
#[derive(Debug, Default)]
pub struct LinearEncoder {
    bytes_per_pixel: f32,
    calls: AtomicUsize,
}

impl LinearEncoder {
    pub fn new(bytes_per_pixel: f32) -> Self {
        Self {
            bytes_per_pixel,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl JpegEncoder for LinearEncoder {
    fn encode(&self, image: &RgbImage, quality: f32, _dpi: u16) -> ServiceResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pixels = (image.width() * image.height()) as f32;
        let len = (pixels * quality * self.bytes_per_pixel) as usize;
        Ok(vec![0xAB; len])
    }
}

/// Returns `pages` copies of a text-like page sized from the requested DPI
/// and records every DPI it was asked for.
#[derive(Debug, Default)]
pub struct FakeRasterizer {
    pages: usize,
    dpis: Mutex<Vec<f32>>,
}

impl FakeRasterizer {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            dpis: Mutex::new(Vec::new()),
        })
    }

    pub fn dpis(&self) -> Vec<f32> {
        self.dpis.lock().unwrap().clone()
    }
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        _document: &[u8],
        dpi: f32,
        page_limit: Option<usize>,
    ) -> ServiceResult<Vec<DynamicImage>> {
        self.dpis.lock().unwrap().push(dpi);
        let side = (dpi / 2.0) as u32;
        let page = text_page(side, side);
        let count = page_limit.map_or(self.pages, |limit| limit.min(self.pages));
        Ok((0..count)
            .map(|_| DynamicImage::ImageRgb8(page.clone()))
            .collect())
    }
}

/// Off-white page with black "text" stripes over a noisy lower half
pub fn text_page(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if y % 12 < 2 && x % 7 != 0 {
            Rgb([0, 0, 0])
        } else if y > height / 2 {
            Rgb([(x * 7 % 200) as u8, (y * 3 % 200) as u8, ((x ^ y) % 200) as u8])
        } else {
            Rgb([240, 240, 235])
        }
    })
}

/// Encode `image` in `format` for writing fixture files.
pub fn encode_fixture(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}
