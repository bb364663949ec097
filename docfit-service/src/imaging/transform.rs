//! Geometric and colour transforms.
//!
//! Every function takes ownership of its input and returns a new buffer;
//! identity cases hand the input back untouched.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use serde::Deserialize;
use tracing::trace;

/// Channel value at or above which a pixel counts as background when trimming.
const WHITE_THRESHOLD: u8 = 245;

/// Luminance below which a pixel becomes black when binarizing, scaled by
/// 1000 to match the integer Rec. 601 weights below.
const LUMINANCE_THRESHOLD_MILLI: u32 = 160_000;

/// Filter used for every resample.
const RESAMPLE_FILTER: FilterType = FilterType::Triangle;

/// Crop rectangle in pixels of the post-rotation image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Request-scoped rotation and crop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub rotate: i32,
    #[serde(default)]
    pub crop: Option<CropRect>,
}

impl Geometry {
    /// Rotate, crop, then flatten to opaque RGB.
    pub fn apply(&self, image: DynamicImage) -> RgbImage {
        let image = rotate(image, self.rotate);
        let image = match self.crop {
            Some(rect) => crop(image, rect.x, rect.y, rect.width, rect.height),
            None => image,
        };
        normalize_color(image)
    }
}

/// Flatten any alpha or non-RGB representation onto a white backdrop.
pub fn normalize_color(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other if !other.color().has_alpha() => other.to_rgb8(),
        other => {
            let rgba = other.to_rgba8();
            RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
                let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
                Rgb([over_white(r, a), over_white(g, a), over_white(b, a)])
            })
        }
    }
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let c = u32::from(channel);
    let a = u32::from(alpha);
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}

/// Rotate clockwise by `degrees` into the bounding box of the rotated
/// rectangle. Quarter turns move pixels exactly; other angles are resampled
/// bilinearly and uncovered corners are transparent.
pub fn rotate(image: DynamicImage, degrees: i32) -> DynamicImage {
    let normalized = degrees.rem_euclid(360);
    if normalized == 0 || image.width() == 0 || image.height() == 0 {
        return image;
    }

    match normalized {
        90 => return image.rotate90(),
        180 => return image.rotate180(),
        270 => return image.rotate270(),
        _ => {}
    }

    use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};

    let radians = f64::from(normalized).to_radians();
    let sin = radians.sin().abs();
    let cos = radians.cos().abs();
    let (w, h) = (f64::from(image.width()), f64::from(image.height()));
    let new_w = (w * cos + h * sin).floor().max(1.0);
    let new_h = (h * cos + w * sin).floor().max(1.0);

    trace!(
        degrees = normalized,
        from = %format!("{}x{}", w, h),
        to = %format!("{}x{}", new_w, new_h),
        "Rotating image"
    );

    // Sampling happens at integer pixel indices, so centres are (n - 1) / 2.
    // The source carries a one pixel replicated border so bilinear lookups
    // along its real edges stay inside the buffer.
    let source = pad_edges(&image.to_rgba8());
    let (src_cx, src_cy) = (w / 2.0 + 0.5, h / 2.0 + 0.5);
    let (dst_cx, dst_cy) = ((new_w - 1.0) / 2.0, (new_h - 1.0) / 2.0);
    let projection = Projection::translate(dst_cx as f32, dst_cy as f32)
        * Projection::rotate(radians as f32)
        * Projection::translate(-src_cx as f32, -src_cy as f32);

    let mut output = RgbaImage::new(new_w as u32, new_h as u32);
    warp_into(
        &source,
        &projection,
        Interpolation::Bilinear,
        Rgba([255, 255, 255, 0]),
        &mut output,
    );

    DynamicImage::ImageRgba8(output)
}

fn pad_edges(image: &RgbaImage) -> RgbaImage {
    let (w, h) = image.dimensions();
    RgbaImage::from_fn(w + 2, h + 2, |x, y| {
        *image.get_pixel(x.saturating_sub(1).min(w - 1), y.saturating_sub(1).min(h - 1))
    })
}

/// Crop to the given rectangle, clamped to the image bounds. A rectangle
/// with no remaining area leaves the image unchanged.
pub fn crop(image: DynamicImage, x: i64, y: i64, width: i64, height: i64) -> DynamicImage {
    let safe_x = x.max(0);
    let safe_y = y.max(0);
    let safe_w = width.min(i64::from(image.width()) - safe_x);
    let safe_h = height.min(i64::from(image.height()) - safe_y);
    if safe_w <= 0 || safe_h <= 0 {
        trace!(x, y, width, height, "Ignoring out-of-range crop");
        return image;
    }
    image.crop_imm(
        safe_x as u32,
        safe_y as u32,
        safe_w as u32,
        safe_h as u32,
    )
}

/// Crop to the tight bounding box of non-white pixels. Blank images are
/// returned unchanged.
pub fn trim_background_border(image: RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        let Rgb([r, g, b]) = *pixel;
        if r < WHITE_THRESHOLD || g < WHITE_THRESHOLD || b < WHITE_THRESHOLD {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if !found {
        return image;
    }

    let crop_w = max_x - min_x + 1;
    let crop_h = max_y - min_y + 1;
    if crop_w == width && crop_h == height {
        return image;
    }
    imageops::crop_imm(&image, min_x, min_y, crop_w, crop_h).to_image()
}

/// Threshold perceptual luminance to pure black or white, kept as 24-bit RGB.
pub fn binarize_to_threshold(image: &RgbImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        let luminance = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
        let value = if luminance < LUMINANCE_THRESHOLD_MILLI {
            0
        } else {
            255
        };
        Rgb([value, value, value])
    })
}

/// Resize to the target box. With `keep_aspect` the result fits inside the
/// box; otherwise it is stretched to exactly `target_w` x `target_h`.
pub fn resize(image: RgbImage, target_w: u32, target_h: u32, keep_aspect: bool) -> RgbImage {
    let target_w = target_w.max(1);
    let target_h = target_h.max(1);
    let (w, h) = image.dimensions();

    let (new_w, new_h) = if keep_aspect {
        let ratio = (f64::from(target_w) / f64::from(w)).min(f64::from(target_h) / f64::from(h));
        (
            ((f64::from(w) * ratio).round() as u32).clamp(1, target_w),
            ((f64::from(h) * ratio).round() as u32).clamp(1, target_h),
        )
    } else {
        (target_w, target_h)
    };

    if (new_w, new_h) == (w, h) {
        return image;
    }
    imageops::resize(&image, new_w, new_h, RESAMPLE_FILTER)
}

/// Scale both dimensions by `factor` (minimum 1 pixel each). Factors at or
/// below 0.05, or exactly 1.0, are no-ops.
pub fn scale_by_factor(image: RgbImage, factor: f64) -> RgbImage {
    if factor <= 0.05 || factor == 1.0 {
        return image;
    }
    let new_w = ((f64::from(image.width()) * factor).round() as u32).max(1);
    let new_h = ((f64::from(image.height()) * factor).round() as u32).max(1);
    imageops::resize(&image, new_w, new_h, RESAMPLE_FILTER)
}
