//! Multi-page PDF assembly under a byte budget.
//!
//! Each build turns every asset into PDF pages: native PDF pages are copied
//! verbatim (or rasterized when requested), raster sources are trimmed and
//! capped. Raster pages are split into a JPEG base and a lossless ink layer.
//! The degrade loop rebuilds the whole document at lower scale and quality
//! until it fits or both floors are reached.

use bytes::Bytes;
use image::RgbImage;
use tracing::{debug, warn};

use crate::codec::{Codecs, ImagePlacement, PdfComposer, decode_raster};
use crate::error::{ServiceError, ServiceResult};
use crate::imaging::{
    BLACK_THRESHOLD, normalize_color, resize, split_black_mask, trim_background_border,
};
use crate::storage::{SourceKind, StoredFile};

/// Resolution used to convert page image pixels to physical size
pub const PAGE_REFERENCE_DPI: f32 = 200.0;

/// Blank margin around every image page
pub const PAGE_PADDING_PTS: f32 = 12.0;

/// Rasterization DPI for PDF pages at scale 1.0
pub const RASTER_DPI: f32 = 240.0;

/// Longest side of a raster source at scale 1.0
pub const MAX_RASTER_DIMENSION: f64 = 2000.0;

const START_SCALE: f64 = 1.0;
const START_QUALITY: f64 = 0.9;
const SCALE_FACTOR: f64 = 0.85;
const QUALITY_STEP: f64 = 0.05;
const SCALE_FLOOR: f64 = 0.8;
const QUALITY_FLOOR: f64 = 0.8;
const MAX_ATTEMPTS: usize = 9;

/// Tolerance for comparing stepped values against their floors.
const FLOOR_EPSILON: f64 = 1e-9;

/// One input of a document set, resolved once per request
#[derive(Debug, Clone)]
pub enum PageAsset {
    Raster { file_id: String, bytes: Bytes },
    Document { file_id: String, bytes: Bytes },
}

impl From<StoredFile> for PageAsset {
    fn from(file: StoredFile) -> Self {
        match file.kind {
            SourceKind::Image => PageAsset::Raster {
                file_id: file.id,
                bytes: file.bytes,
            },
            SourceKind::Pdf => PageAsset::Document {
                file_id: file.id,
                bytes: file.bytes,
            },
        }
    }
}

/// Budget policy for one assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentBudget {
    pub max_bytes: usize,
    /// Render PDF inputs to images instead of copying their pages
    pub rasterize: bool,
    /// Return the last build instead of failing when the budget is missed
    pub best_effort: bool,
}

#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Bytes,
    pub scale: f64,
    pub quality: f32,
    pub within_budget: bool,
}

/// Build the document, degrading scale and quality until it fits `budget`.
pub fn assemble(
    codecs: &Codecs,
    assets: &[PageAsset],
    budget: DocumentBudget,
) -> ServiceResult<AssembledDocument> {
    let mut scale = START_SCALE;
    let mut quality = START_QUALITY;
    let mut last: Option<(Vec<u8>, f64, f64)> = None;
    let mut smallest = usize::MAX;

    for attempt in 0..MAX_ATTEMPTS {
        let output = build_document(codecs, assets, scale, quality as f32, budget.rasterize)?;
        debug!(
            attempt = attempt,
            scale = scale,
            quality = quality,
            bytes = output.len(),
            max_bytes = budget.max_bytes,
            "Document build"
        );

        if output.len() <= budget.max_bytes {
            return Ok(AssembledDocument {
                bytes: Bytes::from(output),
                scale,
                quality: quality as f32,
                within_budget: true,
            });
        }
        smallest = smallest.min(output.len());
        last = Some((output, scale, quality));

        let next_scale = scale * SCALE_FACTOR;
        let next_quality = quality - QUALITY_STEP;
        let can_scale = next_scale >= SCALE_FLOOR - FLOOR_EPSILON;
        let can_degrade = next_quality >= QUALITY_FLOOR - FLOOR_EPSILON;
        if !can_scale && !can_degrade {
            break;
        }
        if can_scale {
            scale = next_scale;
        }
        if can_degrade {
            quality = next_quality;
        }
    }

    match last {
        Some((output, scale, quality)) if budget.best_effort => {
            warn!(
                bytes = output.len(),
                max_bytes = budget.max_bytes,
                scale = scale,
                quality = quality,
                "Document budget not met, returning best effort"
            );
            Ok(AssembledDocument {
                bytes: Bytes::from(output),
                scale,
                quality: quality as f32,
                within_budget: false,
            })
        }
        Some(_) => Err(ServiceError::PdfQualityFloor {
            max_bytes: budget.max_bytes,
            smallest,
        }),
        None => Err(ServiceError::Internal {
            message: "document assembly ran no attempts".to_string(),
        }),
    }
}

/// One full build at a fixed scale and quality.
fn build_document(
    codecs: &Codecs,
    assets: &[PageAsset],
    scale: f64,
    quality: f32,
    rasterize: bool,
) -> ServiceResult<Vec<u8>> {
    let mut composer = PdfComposer::new();

    for asset in assets {
        match asset {
            PageAsset::Document { file_id, bytes } if !rasterize => {
                let copied = composer.append_document(bytes)?;
                debug!(file_id = %file_id, pages = copied, "Copied document pages");
            }
            PageAsset::Document { file_id, bytes } => {
                let dpi = RASTER_DPI * scale as f32;
                let pages = codecs.rasterizer.rasterize(bytes, dpi, None)?;
                debug!(file_id = %file_id, pages = pages.len(), dpi = dpi, "Rasterized document");
                for page in pages {
                    let page = trim_background_border(normalize_color(page));
                    add_raster_page(codecs, &mut composer, &page, quality)?;
                }
            }
            PageAsset::Raster { file_id, bytes } => {
                let image = decode_raster(bytes).ok_or_else(|| ServiceError::InvalidImageData {
                    file_id: file_id.clone(),
                })?;
                let image = trim_background_border(normalize_color(image));
                let max_dim = (MAX_RASTER_DIMENSION * scale).round() as u32;
                let image = cap_dimension(image, max_dim);
                add_raster_page(codecs, &mut composer, &image, quality)?;
            }
        }
    }

    composer.finish()
}

/// Aspect-preserving downscale when either side exceeds `max_dim`.
pub fn cap_dimension(image: RgbImage, max_dim: u32) -> RgbImage {
    if image.width() > max_dim || image.height() > max_dim {
        resize(image, max_dim, max_dim, true)
    } else {
        image
    }
}

fn add_raster_page(
    codecs: &Codecs,
    composer: &mut PdfComposer,
    image: &RgbImage,
    quality: f32,
) -> ServiceResult<()> {
    let layer = split_black_mask(image, BLACK_THRESHOLD);
    let base_jpeg = codecs
        .jpeg
        .encode(&layer.base, quality, PAGE_REFERENCE_DPI as u16)?;
    let placement = ImagePlacement::at_dpi(
        image.width(),
        image.height(),
        PAGE_REFERENCE_DPI,
        PAGE_PADDING_PTS,
    );
    composer.add_image_page(base_jpeg, &layer, placement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{FakeRasterizer, encode_fixture, text_page};
    use crate::codec::{ImageJpegEncoder, JpegEncoder};
    use image::{ImageFormat, Rgb};
    use lopdf::{Document, Object};
    use std::sync::Arc;

    fn codecs_with(rasterizer: Arc<FakeRasterizer>) -> Codecs {
        Codecs {
            jpeg: Arc::new(ImageJpegEncoder),
            rasterizer,
        }
    }

    fn raster_asset(image: &RgbImage) -> PageAsset {
        PageAsset::Raster {
            file_id: "img".to_string(),
            bytes: Bytes::from(encode_fixture(image, ImageFormat::Png)),
        }
    }

    /// A native PDF with `pages` image pages.
    fn native_pdf(pages: usize) -> PageAsset {
        let mut composer = PdfComposer::new();
        let layer = split_black_mask(&text_page(40, 40), BLACK_THRESHOLD);
        for _ in 0..pages {
            let jpeg = ImageJpegEncoder.encode(&layer.base, 0.8, 200).unwrap();
            composer
                .add_image_page(jpeg, &layer, ImagePlacement::at_dpi(40, 40, 200.0, 12.0))
                .unwrap();
        }
        PageAsset::Document {
            file_id: "doc".to_string(),
            bytes: Bytes::from(composer.finish().unwrap()),
        }
    }

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).unwrap().get_pages().len()
    }

    fn first_page_width(bytes: &[u8]) -> f32 {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").and_then(Object::as_array).unwrap();
        media_box[2].as_float().unwrap()
    }

    #[test]
    fn test_native_pages_copied_without_rasterizing() {
        let rasterizer = FakeRasterizer::new(5);
        let codecs = codecs_with(rasterizer.clone());
        let assets = vec![native_pdf(2), raster_asset(&text_page(300, 200))];
        let budget = DocumentBudget {
            max_bytes: 2 * 1024 * 1024,
            rasterize: false,
            best_effort: false,
        };

        let doc = assemble(&codecs, &assets, budget).unwrap();
        assert!(doc.within_budget);
        assert_eq!(doc.scale, 1.0);
        assert!((doc.quality - 0.9).abs() < 1e-6);
        assert_eq!(page_count(&doc.bytes), 3);
        assert!(rasterizer.dpis().is_empty());
    }

    #[test]
    fn test_rasterized_pages_use_scaled_dpi() {
        let rasterizer = FakeRasterizer::new(2);
        let codecs = codecs_with(rasterizer.clone());
        let assets = vec![native_pdf(1), raster_asset(&text_page(300, 200))];
        let budget = DocumentBudget {
            max_bytes: 10 * 1024 * 1024,
            rasterize: true,
            best_effort: true,
        };

        let doc = assemble(&codecs, &assets, budget).unwrap();
        assert_eq!(page_count(&doc.bytes), 3);
        assert_eq!(rasterizer.dpis(), vec![240.0]);
    }

    #[test]
    fn test_degrade_sequence_hits_both_floors() {
        let rasterizer = FakeRasterizer::new(1);
        let codecs = codecs_with(rasterizer.clone());
        let assets = vec![native_pdf(1)];
        let budget = DocumentBudget {
            max_bytes: 100,
            rasterize: true,
            best_effort: true,
        };

        let doc = assemble(&codecs, &assets, budget).unwrap();
        assert!(!doc.within_budget);
        assert!((doc.scale - 0.85).abs() < 1e-9);
        assert!((doc.quality - 0.8).abs() < 1e-6);
        assert_eq!(page_count(&doc.bytes), 1);

        // (1.0, 0.9) -> (0.85, 0.85) -> (0.85, 0.80), then both floors block
        let dpis = rasterizer.dpis();
        assert_eq!(dpis.len(), 3);
        assert!((dpis[0] - 240.0).abs() < 1e-3);
        assert!((dpis[1] - 204.0).abs() < 1e-3);
        assert!((dpis[2] - 204.0).abs() < 1e-3);
    }

    #[test]
    fn test_budget_miss_without_best_effort_fails() {
        let codecs = codecs_with(FakeRasterizer::new(1));
        let assets = vec![raster_asset(&text_page(300, 200))];
        let budget = DocumentBudget {
            max_bytes: 100,
            rasterize: false,
            best_effort: false,
        };

        let err = assemble(&codecs, &assets, budget).unwrap_err();
        match err {
            ServiceError::PdfQualityFloor { max_bytes, smallest } => {
                assert_eq!(max_bytes, 100);
                assert!(smallest > 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_raster_capped_at_max_dimension() {
        let wide = RgbImage::from_fn(2400, 600, |x, _| Rgb([100, (x % 200) as u8, 50]));
        let codecs = codecs_with(FakeRasterizer::new(1));
        let budget = DocumentBudget {
            max_bytes: 10 * 1024 * 1024,
            rasterize: false,
            best_effort: false,
        };

        let doc = assemble(&codecs, &[raster_asset(&wide)], budget).unwrap();
        // 2000 px at 200 DPI is 720 pt, plus 12 pt each side
        assert!((first_page_width(&doc.bytes) - 744.0).abs() < 0.01);
    }

    #[test]
    fn test_invalid_raster_is_reported() {
        let codecs = codecs_with(FakeRasterizer::new(1));
        let assets = vec![PageAsset::Raster {
            file_id: "broken".to_string(),
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\nnope"),
        }];
        let budget = DocumentBudget {
            max_bytes: 1024,
            rasterize: false,
            best_effort: true,
        };

        let err = assemble(&codecs, &assets, budget).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImageData { ref file_id } if file_id == "broken"));
    }

    #[test]
    fn test_cap_dimension_keeps_small_images() {
        let small = RgbImage::new(300, 200);
        assert_eq!(cap_dimension(small, 2000).dimensions(), (300, 200));
        let large = RgbImage::new(4000, 1000);
        assert_eq!(cap_dimension(large, 1700).dimensions(), (1700, 425));
    }
}
