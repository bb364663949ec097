use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("File not found or expired: {file_id}")]
    InputNotFound { file_id: String },

    #[error("Unsupported file for {operation}")]
    UnsupportedInputType {
        operation: &'static str,
        code: &'static str,
    },

    #[error("Invalid image file: {file_id}")]
    InvalidImageData { file_id: String },

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("Target size of {target_bytes} bytes not reachable. Try a smaller KB value.")]
    TargetSizeUnreachable { target_bytes: usize },

    #[error(
        "Target size of {max_bytes} bytes not reachable without quality loss (smallest build was {smallest} bytes)"
    )]
    PdfQualityFloor { max_bytes: usize, smallest: usize },

    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        code: &'static str,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Encoder/decoder backend faults
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to encode image")]
    JpegEncode(#[source] image::ImageError),

    #[error("Failed to read PDF")]
    PdfRead(#[source] lopdf::Error),

    #[error("Failed to build PDF")]
    PdfWrite(#[source] std::io::Error),

    #[error("Failed to build PDF: {message}")]
    PdfStructure { message: String },

    #[error("PDF renderer unavailable: {message}")]
    PdfiumUnavailable { message: String },

    #[error("Failed to render PDF page {page}: {message}")]
    PdfiumRender { page: usize, message: String },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub code: String,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InputNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::UnsupportedInputType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::InvalidImageData { .. }
            | ServiceError::TargetSizeUnreachable { .. }
            | ServiceError::PdfQualityFloor { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Codec(CodecError::PdfRead(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::InputNotFound { .. } => "file_not_found",
            ServiceError::UnsupportedInputType { code, .. } => *code,
            ServiceError::InvalidImageData { .. } => "invalid_image",
            ServiceError::Codec(CodecError::JpegEncode(_)) => "encode_failed",
            ServiceError::Codec(CodecError::PdfRead(_)) => "pdf_read_failed",
            ServiceError::Codec(CodecError::PdfWrite(_))
            | ServiceError::Codec(CodecError::PdfStructure { .. }) => "pdf_failed",
            ServiceError::Codec(CodecError::PdfiumUnavailable { .. }) => "pdf_renderer_unavailable",
            ServiceError::Codec(CodecError::PdfiumRender { .. }) => "pdf_render_failed",
            ServiceError::TargetSizeUnreachable { .. } => "target_size_unreachable",
            ServiceError::PdfQualityFloor { .. } => "pdf_quality_floor",
            ServiceError::InvalidRequest { code, .. } => *code,
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: self.error_code().to_string(),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
