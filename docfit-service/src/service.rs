//! Render operations exposed to the HTTP layer.
//!
//! Every operation is synchronous and CPU-bound; callers on an async runtime
//! should run them on a blocking thread.

use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, compute_content_hash, preview_key, probe_key};
use crate::codec::{Codecs, decode_raster};
use crate::compress::{
    CEILING_ITERATIONS, CompressionResult, EXACT_ROUNDS, compress_fast_probe, compress_to_ceiling,
    compress_to_floor_and_ceiling,
};
use crate::config::RenderConfig;
use crate::document::{
    AssembledDocument, DocumentBudget, MAX_RASTER_DIMENSION, PageAsset, RASTER_DPI, assemble,
    cap_dimension,
};
use crate::error::{ServiceError, ServiceResult};
use crate::imaging::{
    Geometry, binarize_to_threshold, crop, normalize_color, resize, rotate, scale_by_factor,
    trim_background_border,
};
use crate::storage::{FileStore, SourceKind, StoredFile};

/// Preview output fits inside this square
const PREVIEW_BOX: u32 = 900;
const PREVIEW_QUALITY: f32 = 0.75;
const PREVIEW_DPI: u16 = 96;

const DOCUMENT_IMAGE_QUALITY: f32 = 0.9;

/// Result of a size probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub size_bytes: usize,
    pub size_kb: usize,
    pub exact: bool,
}

impl From<&CompressionResult> for ProbeOutcome {
    fn from(result: &CompressionResult) -> Self {
        Self {
            size_bytes: result.len(),
            size_kb: result.len() / 1024,
            exact: result.exact,
        }
    }
}

/// Photo, signature and document rendering over a file store
pub struct RenderService {
    config: RenderConfig,
    store: Arc<dyn FileStore>,
    codecs: Codecs,
    probe_cache: ResultCache<CompressionResult>,
    preview_cache: ResultCache<Bytes>,
}

impl RenderService {
    pub fn new(config: RenderConfig, store: Arc<dyn FileStore>, codecs: Codecs) -> Self {
        let probe_cache = ResultCache::new(config.probe_cache_ttl());
        let preview_cache = ResultCache::new(config.preview_cache_ttl());
        Self {
            config,
            store,
            codecs,
            probe_cache,
            preview_cache,
        }
    }

    /// Photo at the fixed photo box under an allow-listed KB ceiling.
    ///
    /// A ceiling that cannot be met still returns the smallest encode tried,
    /// flagged with `exact = false`.
    pub fn render_photo(
        &self,
        file_id: &str,
        geometry: &Geometry,
        max_kb: i64,
    ) -> ServiceResult<CompressionResult> {
        let max_kb = self.config.photo_ceiling_kb(max_kb);
        let source = self.load_image(file_id, "image render", "image_required")?;
        let (width, height) = self.config.photo_box();
        let image = resize(geometry.apply(source), width, height, false);

        let result = compress_to_ceiling(
            self.codecs.jpeg.as_ref(),
            &image,
            self.config.dpi,
            kb_to_bytes(max_kb),
            CEILING_ITERATIONS,
        )?;
        self.log_ceiling_result("photo", file_id, max_kb, &result);
        Ok(result)
    }

    /// Signature at the fixed signature box, optionally thresholded to
    /// black and white first.
    pub fn render_signature(
        &self,
        file_id: &str,
        geometry: &Geometry,
        binarize: bool,
    ) -> ServiceResult<CompressionResult> {
        let max_kb = self.config.signature_max_kb;
        let source = self.load_image(file_id, "image render", "image_required")?;
        let mut image = geometry.apply(source);
        if binarize {
            image = binarize_to_threshold(&image);
        }
        let (width, height) = self.config.signature_box();
        let image = resize(image, width, height, false);

        let result = compress_to_ceiling(
            self.codecs.jpeg.as_ref(),
            &image,
            self.config.dpi,
            kb_to_bytes(max_kb),
            CEILING_ITERATIONS,
        )?;
        self.log_ceiling_result("signature", file_id, max_kb, &result);
        Ok(result)
    }

    /// Photo padded to exactly the requested KB, at its own dimensions.
    pub fn render_photo_by_kb(
        &self,
        file_id: &str,
        geometry: &Geometry,
        target_kb: i64,
    ) -> ServiceResult<CompressionResult> {
        let target_kb = self.config.exact_kb(target_kb);
        let source = self.load_image(file_id, "image render", "image_required")?;
        let image = geometry.apply(source);

        let result = compress_to_floor_and_ceiling(
            self.codecs.jpeg.as_ref(),
            &image,
            self.config.dpi,
            kb_to_bytes(target_kb),
            EXACT_ROUNDS,
        )?;
        info!(
            file_id = file_id,
            target_kb = target_kb,
            quality = result.quality_used,
            scale = result.scale_used,
            "Rendered photo by KB"
        );
        Ok(result)
    }

    /// Size an exact-KB render would produce, served from the probe cache
    /// when a fresh answer exists.
    ///
    /// When the exact search cannot reach the target, the fast probe's
    /// estimate is cached and returned instead, marked inexact.
    pub fn probe_size(
        &self,
        file_id: &str,
        geometry: &Geometry,
        target_kb: i64,
    ) -> ServiceResult<ProbeOutcome> {
        let target_kb = self.config.exact_kb(target_kb);
        let stored = self.resolve_image(file_id, "image render", "image_required")?;
        let key = probe_key(
            &compute_content_hash(&stored.bytes),
            file_id,
            geometry,
            target_kb,
        );

        if let Some(cached) = self.probe_cache.get(&key) {
            debug!(file_id = file_id, target_kb = target_kb, "Probe answered from cache");
            return Ok(ProbeOutcome::from(&cached));
        }

        let image = geometry.apply(decode_image(&stored)?);
        let encoder = self.codecs.jpeg.as_ref();
        let target_bytes = kb_to_bytes(target_kb);
        let result = match compress_to_floor_and_ceiling(
            encoder,
            &image,
            self.config.dpi,
            target_bytes,
            EXACT_ROUNDS,
        ) {
            Ok(result) => result,
            Err(ServiceError::TargetSizeUnreachable { .. }) => {
                warn!(
                    file_id = file_id,
                    target_kb = target_kb,
                    "Exact size unreachable, falling back to fast estimate"
                );
                compress_fast_probe(encoder, &image, self.config.dpi, target_bytes)?
            }
            Err(e) => return Err(e),
        };

        let outcome = ProbeOutcome::from(&result);
        self.probe_cache.put(key, result);
        debug!(
            file_id = file_id,
            size_bytes = outcome.size_bytes,
            exact = outcome.exact,
            "Probe computed"
        );
        Ok(outcome)
    }

    /// Document set under the fixed budget, native PDF pages copied as-is.
    pub fn render_documents(&self, file_ids: &[String]) -> ServiceResult<AssembledDocument> {
        let assets = self.resolve_assets(file_ids)?;
        let budget = DocumentBudget {
            max_bytes: self.config.document_fixed_budget_bytes,
            rasterize: false,
            best_effort: false,
        };
        self.assemble_logged(&assets, budget)
    }

    /// Document set under a caller KB budget. PDF inputs are always
    /// rasterized and a missed budget returns the last build.
    pub fn render_documents_by_kb(
        &self,
        file_ids: &[String],
        max_kb: i64,
    ) -> ServiceResult<AssembledDocument> {
        let max_kb = self.config.document_kb(max_kb);
        let assets = self.resolve_assets(file_ids)?;
        let budget = DocumentBudget {
            max_bytes: kb_to_bytes(max_kb),
            rasterize: true,
            best_effort: true,
        };
        self.assemble_logged(&assets, budget)
    }

    /// First document of a set as a single trimmed JPEG.
    pub fn render_document_image(&self, file_ids: &[String]) -> ServiceResult<Bytes> {
        let file_id = file_ids.first().ok_or_else(documents_required)?;
        let stored = self.store.resolve(file_id)?;

        let source = match stored.kind {
            SourceKind::Pdf => self
                .codecs
                .rasterizer
                .rasterize(&stored.bytes, RASTER_DPI, Some(1))?
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::InvalidRequest {
                    message: format!("Document {} has no pages", file_id),
                    code: "document_empty",
                })?,
            SourceKind::Image => decode_image(&stored)?,
        };

        let image = trim_background_border(normalize_color(source));
        let image = cap_dimension(image, MAX_RASTER_DIMENSION as u32);
        let bytes = self
            .codecs
            .jpeg
            .encode(&image, DOCUMENT_IMAGE_QUALITY, self.config.dpi)?;
        debug!(
            file_id = %file_id,
            size = %format!("{}x{}", image.width(), image.height()),
            bytes = bytes.len(),
            "Rendered document image"
        );
        Ok(Bytes::from(bytes))
    }

    /// Low-resolution JPEG of an image with the requested edits applied.
    /// Repeated requests for the same edits are served from the preview cache.
    pub fn preview(&self, file_id: &str, geometry: &Geometry, zoom: f64) -> ServiceResult<Bytes> {
        let stored = self.resolve_image(file_id, "preview", "preview_unsupported")?;
        let key = preview_key(
            &compute_content_hash(&stored.bytes),
            file_id,
            geometry,
            zoom,
        );
        if let Some(cached) = self.preview_cache.get(&key) {
            debug!(file_id = file_id, "Preview answered from cache");
            return Ok(cached);
        }

        let image = rotate(decode_image(&stored)?, geometry.rotate);
        let image = match geometry.crop {
            Some(rect) => crop(image, rect.x, rect.y, rect.width, rect.height),
            None => image,
        };
        let image = scale_by_factor(normalize_color(image), zoom);
        let image = resize(image, PREVIEW_BOX, PREVIEW_BOX, true);

        let bytes = Bytes::from(
            self.codecs
                .jpeg
                .encode(&image, PREVIEW_QUALITY, PREVIEW_DPI)?,
        );
        self.preview_cache.put(key, bytes.clone());
        Ok(bytes)
    }

    /// Resolve `file_id` and require an image source, without decoding it.
    fn resolve_image(
        &self,
        file_id: &str,
        operation: &'static str,
        code: &'static str,
    ) -> ServiceResult<StoredFile> {
        let stored = self.store.resolve(file_id)?;
        if stored.kind != SourceKind::Image {
            return Err(ServiceError::UnsupportedInputType { operation, code });
        }
        Ok(stored)
    }

    fn load_image(
        &self,
        file_id: &str,
        operation: &'static str,
        code: &'static str,
    ) -> ServiceResult<DynamicImage> {
        let stored = self.resolve_image(file_id, operation, code)?;
        decode_image(&stored)
    }

    fn resolve_assets(&self, file_ids: &[String]) -> ServiceResult<Vec<PageAsset>> {
        if file_ids.is_empty() {
            return Err(documents_required());
        }
        file_ids
            .iter()
            .map(|id| self.store.resolve(id).map(PageAsset::from))
            .collect()
    }

    fn assemble_logged(
        &self,
        assets: &[PageAsset],
        budget: DocumentBudget,
    ) -> ServiceResult<AssembledDocument> {
        let document = assemble(&self.codecs, assets, budget)?;
        info!(
            inputs = assets.len(),
            bytes = document.bytes.len(),
            max_bytes = budget.max_bytes,
            scale = document.scale,
            quality = document.quality,
            within_budget = document.within_budget,
            "Assembled document"
        );
        Ok(document)
    }

    fn log_ceiling_result(&self, kind: &str, file_id: &str, max_kb: u32, result: &CompressionResult) {
        if result.exact {
            info!(
                kind = kind,
                file_id = file_id,
                max_kb = max_kb,
                bytes = result.len(),
                quality = result.quality_used,
                "Rendered under ceiling"
            );
        } else {
            warn!(
                kind = kind,
                file_id = file_id,
                max_kb = max_kb,
                bytes = result.len(),
                "Ceiling not met, returning lowest quality tried"
            );
        }
    }
}

fn decode_image(stored: &StoredFile) -> ServiceResult<DynamicImage> {
    decode_raster(&stored.bytes).ok_or_else(|| ServiceError::InvalidImageData {
        file_id: stored.id.clone(),
    })
}

fn documents_required() -> ServiceError {
    ServiceError::InvalidRequest {
        message: "No documents provided".to_string(),
        code: "documents_required",
    }
}

fn kb_to_bytes(kb: u32) -> usize {
    kb as usize * 1024
}
