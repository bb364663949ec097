//! HTTP API for the render service.
//!
//! This module provides the REST endpoints for:
//! - Health monitoring
//! - Image preview
//! - Photo and signature renders (ceiling, exact KB and size probe)
//! - Document set renders (PDF and single image)

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::service::RenderService;

pub mod render;
use render::{
    preview_handler, probe_photo_size_handler, render_document_image_handler,
    render_documents_by_kb_handler, render_documents_handler, render_photo_by_kb_handler,
    render_photo_handler, render_signature_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<RenderService>,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<RenderService>, server: &ServerConfig) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let api_routes = Router::new()
        .route("/preview", post(preview_handler))
        .route("/kb/preview", post(preview_handler))
        .route("/render/photo", post(render_photo_handler))
        .route("/render/photo-kb", post(render_photo_by_kb_handler))
        .route("/kb/render/photo", post(render_photo_by_kb_handler))
        .route("/kb/size/photo", post(probe_photo_size_handler))
        .route("/render/signature", post(render_signature_handler))
        .route("/render/documents", post(render_documents_handler))
        .route("/render/document-image", post(render_document_image_handler))
        .route("/pdf/render/documents", post(render_documents_by_kb_handler))
        .layer(DefaultBodyLimit::max(server.max_body_bytes));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a CPU-bound render on the blocking pool.
pub(crate) async fn run_blocking<T, F>(task: F) -> ServiceResult<T>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ServiceError::Internal {
            message: format!("Render task failed: {}", e),
        })?
}

// === Health ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{FakeRasterizer, LinearEncoder, encode_fixture, text_page};
    use crate::codec::{Codecs, ImageJpegEncoder};
    use crate::config::RenderConfig;
    use crate::storage::DirectoryStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_router() -> (TempDir, Router) {
        router_with(Codecs {
            jpeg: Arc::new(ImageJpegEncoder),
            rasterizer: FakeRasterizer::new(1),
        })
    }

    fn router_with(codecs: Codecs) -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let photo = RgbImage::from_fn(500, 500, |x, y| Rgb([(x / 2) as u8, (y / 2) as u8, 90]));
        std::fs::write(
            dir.path().join("photo.png"),
            encode_fixture(&photo, ImageFormat::Png),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("scan.png"),
            encode_fixture(&text_page(300, 400), ImageFormat::Png),
        )
        .unwrap();

        let store = Arc::new(DirectoryStore::new(dir.path()));
        let service = Arc::new(RenderService::new(RenderConfig::default(), store, codecs));
        (dir, router(service, &ServerConfig::default()))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = test_router();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_photo_kb_returns_exact_attachment() {
        let (_dir, app) = test_router();
        let response = app
            .oneshot(post_json(
                "/api/render/photo-kb",
                json!({"fileId": "photo", "rotate": 0, "maxKb": 100}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .starts_with("attachment")
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 102_400);
    }

    #[tokio::test]
    async fn test_ceiling_renders_report_budget() {
        let (_dir, app) = test_router();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/render/photo",
                json!({"fileId": "photo", "maxKb": 50}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-budget-met"], "true");

        let response = app
            .oneshot(post_json(
                "/api/render/signature",
                json!({"fileId": "photo", "bw": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-budget-met"], "true");
    }

    #[tokio::test]
    async fn test_missed_ceiling_is_flagged() {
        // 197x276 px at 10 bytes/px exceeds 50 KB even at the floor quality
        let (_dir, app) = router_with(Codecs {
            jpeg: Arc::new(LinearEncoder::new(10.0)),
            rasterizer: FakeRasterizer::new(1),
        });

        for uri in ["/api/render/photo", "/api/render/signature"] {
            let response = app
                .clone()
                .oneshot(post_json(uri, json!({"fileId": "photo", "maxKb": 50})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            assert_eq!(response.headers()["x-budget-met"], "false", "{uri}");
            assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert!(bytes.len() > 50 * 1024);
        }
    }

    #[tokio::test]
    async fn test_probe_reports_size_fields() {
        let (_dir, app) = test_router();
        let response = app
            .oneshot(post_json(
                "/api/kb/size/photo",
                json!({"fileId": "photo", "maxKb": 60, "crop": {"x": 0, "y": 0, "width": 400, "height": 400}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sizeBytes"], 60 * 1024);
        assert_eq!(body["sizeKb"], 60);
        assert_eq!(body["exact"], true);
    }

    #[tokio::test]
    async fn test_documents_by_kb_sets_budget_header() {
        let (_dir, app) = test_router();
        let response = app
            .oneshot(post_json(
                "/api/pdf/render/documents",
                json!({"fileIds": ["scan", "photo"], "maxKb": 2048}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(response.headers()["x-budget-met"], "true");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
    }

    #[tokio::test]
    async fn test_error_bodies_carry_codes() {
        let (_dir, app) = test_router();

        let response = app
            .clone()
            .oneshot(post_json("/api/render/documents", json!({"fileIds": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "documents_required");

        let response = app
            .oneshot(post_json("/api/render/photo", json!({"fileId": "missing"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "file_not_found");
    }
}
