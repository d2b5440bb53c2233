//! API error types.

use crate::library::LibraryError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("length required")]
    LengthRequired,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("metadata error: {0}")]
    Metadata(#[from] cadence_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] cadence_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::LengthRequired => "length_required",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
            Self::Library(e) => match e {
                LibraryError::InvalidFormat(_) => "invalid_format",
                LibraryError::TooLarge { .. } => "too_large",
                LibraryError::InvalidInput(_) => "invalid_input",
                LibraryError::IncompleteStream { .. } => "incomplete_stream",
                LibraryError::StorageWriteFailed(_) => "storage_write_failed",
                LibraryError::NotFound(_) => "not_found",
                LibraryError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
                LibraryError::Storage(_) => "storage_error",
                LibraryError::Metadata(_) => "metadata_error",
            },
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "invalid_input",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Library(e) => match e {
                LibraryError::InvalidFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                LibraryError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                LibraryError::InvalidInput(_) | LibraryError::IncompleteStream { .. } => {
                    StatusCode::BAD_REQUEST
                }
                LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
                LibraryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
                LibraryError::StorageWriteFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                LibraryError::Storage(e) => match e {
                    cadence_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                    cadence_storage::StorageError::InvalidKey(_)
                    | cadence_storage::StorageError::InvalidRange(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                },
                LibraryError::Metadata(e) => metadata_status(e),
            },
            Self::Metadata(e) => metadata_status(e),
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn metadata_status(e: &cadence_metadata::MetadataError) -> StatusCode {
    match e {
        cadence_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
        cadence_metadata::MetadataError::AlreadyExists(_)
        | cadence_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let unsatisfiable_total = match &self {
            Self::Library(LibraryError::RangeNotSatisfiable { total }) => Some(*total),
            _ => None,
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(total) = unsatisfiable_total
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
