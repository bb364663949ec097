//! Ink separation for scanned pages.

use image::{Rgb, RgbImage, Rgba, RgbaImage};

/// Maximum value of every channel for a pixel to count as ink.
pub const BLACK_THRESHOLD: u8 = 24;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// A page split into a lossy base and a lossless ink overlay.
///
/// `mask` is `None` when no pixel met the ink threshold, so the overlay is
/// left out of the output instead of being encoded as a fully clear layer.
#[derive(Debug, Clone)]
pub struct BlackMaskLayer {
    /// Source with ink pixels forced to white
    pub base: RgbImage,
    /// Opaque black where the source was ink, fully transparent elsewhere
    pub mask: Option<RgbaImage>,
}

impl BlackMaskLayer {
    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }
}

/// Split `image` into base and ink layers. A pixel is ink when all three
/// channels are `<= threshold`.
pub fn split_black_mask(image: &RgbImage, threshold: u8) -> BlackMaskLayer {
    let (width, height) = image.dimensions();
    let mut base = RgbImage::new(width, height);
    let mut mask = RgbaImage::from_pixel(width, height, CLEAR);
    let mut has_ink = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        let Rgb([r, g, b]) = *pixel;
        if r <= threshold && g <= threshold && b <= threshold {
            base.put_pixel(x, y, WHITE);
            mask.put_pixel(x, y, INK);
            has_ink = true;
        } else {
            base.put_pixel(x, y, *pixel);
        }
    }

    BlackMaskLayer {
        base,
        mask: has_ink.then_some(mask),
    }
}
