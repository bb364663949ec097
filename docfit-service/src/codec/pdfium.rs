use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

use crate::error::{CodecError, ServiceResult};

/// Renders the pages of a paged document to raster images.
pub trait PageRasterizer: Send + Sync {
    /// Render pages in order at `dpi`, stopping after `page_limit` pages when
    /// one is given.
    fn rasterize(
        &self,
        document: &[u8],
        dpi: f32,
        page_limit: Option<usize>,
    ) -> ServiceResult<Vec<DynamicImage>>;
}

/// PDFium-backed rasterizer, bound dynamically on each call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumRasterizer;

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        document: &[u8],
        dpi: f32,
        page_limit: Option<usize>,
    ) -> ServiceResult<Vec<DynamicImage>> {
        let pdfium = create_pdfium()?;
        let pdf = pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(|e| CodecError::PdfiumRender {
                page: 0,
                message: format!("Failed to load document: {}", e),
            })?;

        let mut pages = Vec::new();
        for (index, page) in pdf.pages().iter().enumerate() {
            if page_limit.is_some_and(|limit| index >= limit) {
                break;
            }

            let width = points_to_px(page.width().value, dpi);
            let height = points_to_px(page.height().value, dpi);
            debug!(
                page = index,
                dpi = dpi,
                size = %format!("{}x{}", width, height),
                "Rasterizing page"
            );

            let config = PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height);
            let bitmap =
                page.render_with_config(&config)
                    .map_err(|e| CodecError::PdfiumRender {
                        page: index,
                        message: e.to_string(),
                    })?;
            pages.push(bitmap.as_image());
        }

        Ok(pages)
    }
}

fn points_to_px(points: f32, dpi: f32) -> i32 {
    (points / 72.0 * dpi).round().max(1.0) as i32
}

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
fn create_pdfium() -> Result<Pdfium, CodecError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| CodecError::PdfiumUnavailable {
            message: format!("Failed to load PDFium library: {:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_to_px() {
        // US letter at 240 DPI
        assert_eq!(points_to_px(612.0, 240.0), 2040);
        assert_eq!(points_to_px(792.0, 240.0), 2640);
        assert_eq!(points_to_px(612.0, 240.0 * 0.85), 1734);
        assert_eq!(points_to_px(0.1, 10.0), 1);
    }
}
