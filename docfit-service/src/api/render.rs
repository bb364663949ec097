//! Render endpoints. Every handler hands its work to the blocking pool.

use axum::{
    Json,
    extract::State,
    http::{HeaderName, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

use super::{AppState, run_blocking};
use crate::compress::CompressionResult;
use crate::error::ServiceError;
use crate::imaging::{CropRect, Geometry};
use crate::service::ProbeOutcome;

const BUDGET_MET: HeaderName = HeaderName::from_static("x-budget-met");

/// Photo render, exact-KB render and size probe request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPhotoRequest {
    pub file_id: String,
    #[serde(default)]
    pub rotate: i32,
    #[serde(default)]
    pub crop: Option<CropRect>,
    /// Zero or absent selects the endpoint's default
    #[serde(default)]
    pub max_kb: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSignatureRequest {
    pub file_id: String,
    #[serde(default)]
    pub rotate: i32,
    #[serde(default)]
    pub crop: Option<CropRect>,
    /// Threshold to black and white before resizing
    #[serde(default)]
    pub bw: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub file_id: String,
    #[serde(default)]
    pub rotate: i32,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub zoom: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderDocumentsRequest {
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub max_kb: i64,
}

fn geometry(rotate: i32, crop: Option<CropRect>) -> Geometry {
    Geometry { rotate, crop }
}

fn jpeg_attachment(bytes: Bytes, disposition: &'static str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// JPEG attachment from a ceiling search, flagged with whether it fit.
fn ceiling_attachment(result: CompressionResult, disposition: &'static str) -> Response {
    (
        [(BUDGET_MET, budget_met(result.exact))],
        jpeg_attachment(result.bytes, disposition),
    )
        .into_response()
}

fn budget_met(met: bool) -> &'static str {
    if met { "true" } else { "false" }
}

fn pdf_attachment() -> [(HeaderName, &'static str); 2] {
    [
        (header::CONTENT_TYPE, "application/pdf"),
        (
            header::CONTENT_DISPOSITION,
            "attachment; filename=documents.pdf",
        ),
    ]
}

/// Preview of an uploaded image with the current edits applied
pub async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let bytes = run_blocking(move || {
        let geometry = geometry(request.rotate, request.crop);
        service.preview(&request.file_id, &geometry, request.zoom)
    })
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        bytes,
    )
        .into_response())
}

/// Photo at the fixed photo box under an allow-listed KB ceiling. A missed
/// ceiling still returns the image, with `X-Budget-Met: false`.
pub async fn render_photo_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderPhotoRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let result = run_blocking(move || {
        let geometry = geometry(request.rotate, request.crop);
        service.render_photo(&request.file_id, &geometry, request.max_kb)
    })
    .await?;

    Ok(ceiling_attachment(result, "attachment; filename=photo.jpg"))
}

/// Photo padded to exactly the requested KB
pub async fn render_photo_by_kb_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderPhotoRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let result = run_blocking(move || {
        let geometry = geometry(request.rotate, request.crop);
        service.render_photo_by_kb(&request.file_id, &geometry, request.max_kb)
    })
    .await?;

    Ok(jpeg_attachment(
        result.bytes,
        "attachment; filename=photo-kb.jpg",
    ))
}

/// Size an exact-KB render would have
pub async fn probe_photo_size_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderPhotoRequest>,
) -> Result<Json<ProbeOutcome>, ServiceError> {
    let service = state.service.clone();
    let outcome = run_blocking(move || {
        let geometry = geometry(request.rotate, request.crop);
        service.probe_size(&request.file_id, &geometry, request.max_kb)
    })
    .await?;

    Ok(Json(outcome))
}

/// Signature at the fixed signature box
pub async fn render_signature_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderSignatureRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let result = run_blocking(move || {
        let geometry = geometry(request.rotate, request.crop);
        service.render_signature(&request.file_id, &geometry, request.bw)
    })
    .await?;

    Ok(ceiling_attachment(result, "attachment; filename=signature.jpg"))
}

/// Document set as a PDF under the fixed budget
pub async fn render_documents_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderDocumentsRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let document = run_blocking(move || service.render_documents(&request.file_ids)).await?;

    Ok((pdf_attachment(), document.bytes).into_response())
}

/// Document set as a PDF under a caller KB budget, best effort
pub async fn render_documents_by_kb_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderDocumentsRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let document = run_blocking(move || {
        service.render_documents_by_kb(&request.file_ids, request.max_kb)
    })
    .await?;

    Ok((
        pdf_attachment(),
        [(BUDGET_MET, budget_met(document.within_budget))],
        document.bytes,
    )
        .into_response())
}

/// First document of a set as a single JPEG
pub async fn render_document_image_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderDocumentsRequest>,
) -> Result<Response, ServiceError> {
    let service = state.service.clone();
    let bytes = run_blocking(move || service.render_document_image(&request.file_ids)).await?;

    Ok(jpeg_attachment(bytes, "attachment; filename=document.jpg"))
}
