//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::PipelineError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("Document service unavailable: {0}")]
    ExtractionUnavailable(String),
    #[error("No fields could be extracted from the document")]
    NoFieldsExtracted,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::PayloadTooLarge(detail) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                detail.clone(),
            ),
            ApiError::UnsupportedFormat(detail) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FORMAT",
                detail.clone(),
            ),
            ApiError::ExtractionUnavailable(detail) => {
                tracing::warn!(detail, "Extraction service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "EXTRACTION_UNAVAILABLE",
                    "The document service is unavailable, try again later".to_string(),
                )
            }
            ApiError::NoFieldsExtracted => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_FIELDS_EXTRACTED",
                "No identity fields could be read from the document".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Extraction(ExtractionError::UnsupportedFormat(m)) => {
                ApiError::UnsupportedFormat(m)
            }
            PipelineError::Extraction(ExtractionError::ServiceUnavailable(m)) => {
                ApiError::ExtractionUnavailable(m)
            }
            PipelineError::Extraction(ExtractionError::NoFieldsExtracted) => {
                ApiError::NoFieldsExtracted
            }
            other @ PipelineError::Extraction(ExtractionError::LowConfidenceExtraction { .. }) => {
                ApiError::Internal(other.to_string())
            }
            other @ PipelineError::RecordMismatch { .. } => ApiError::BadRequest(other.to_string()),
        }
    }
}
