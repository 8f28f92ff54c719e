//! Centralized error types for the CineSync core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for crate::store::StoreError {
    fn code(&self) -> &'static str {
        match self {
            crate::store::StoreError::Unavailable(_) => "store_unavailable",
            crate::store::StoreError::Conflict(_) => "store_conflict",
            crate::store::StoreError::NotFound(_) => "store_not_found",
        }
    }
}

impl ErrorCode for crate::media::MediaError {
    fn code(&self) -> &'static str {
        match self {
            crate::media::MediaError::UpstreamStatus { .. } => "upstream_media_error",
            crate::media::MediaError::Request(_) => "upstream_request_failed",
            crate::media::MediaError::TooLarge { .. } => "media_too_large",
            crate::media::MediaError::InvalidRange(_) => "range_not_satisfiable",
            crate::media::MediaError::Transcode(_) => "transcode_failed",
        }
    }
}

/// Application-wide error type for the CineSync server.
#[derive(Debug, Error)]
pub enum CinesyncError {
    /// Requested room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Session exceeded the join rate limit.
    #[error("Too many join attempts. Please wait.")]
    RateLimited,

    /// The `(room, display name)` pair is already bound to a live session.
    #[error("Already connected")]
    DuplicateSession,

    /// The persistence layer is unreachable.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Upstream media host answered with an error status.
    #[error("Upstream media error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// A `Range` header could not be satisfied against the media size.
    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// Media exceeds the configured size cap.
    #[error("Media too large: {size} bytes exceeds cap of {cap} bytes")]
    MediaTooLarge { size: u64, cap: u64 },

    /// The transcoding pipeline failed.
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CinesyncError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "room_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::DuplicateSession => "duplicate_session",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Upstream { .. } => "upstream_media_error",
            Self::RangeNotSatisfiable(_) => "range_not_satisfiable",
            Self::MediaTooLarge { .. } => "media_too_large",
            Self::Transcode(_) => "transcode_failed",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RoomNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::DuplicateSession => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::MediaTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Transcode(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CinesyncResult<T> = Result<T, CinesyncError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CinesyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::store::StoreError> for CinesyncError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<crate::media::MediaError> for CinesyncError {
    fn from(err: crate::media::MediaError) -> Self {
        use crate::media::MediaError;
        match err {
            MediaError::UpstreamStatus { status, message } => Self::Upstream { status, message },
            MediaError::TooLarge { size, cap } => Self::MediaTooLarge { size, cap },
            MediaError::InvalidRange(r) => Self::RangeNotSatisfiable(r),
            MediaError::Transcode(m) => Self::Transcode(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        let err = CinesyncError::RateLimited;
        assert_eq!(err.code(), "rate_limited");
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn upstream_status_is_propagated() {
        let err = CinesyncError::Upstream {
            status: 404,
            message: "missing".into(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "upstream_media_error");
    }

    #[test]
    fn bogus_upstream_status_falls_back_to_bad_gateway() {
        let err = CinesyncError::Upstream {
            status: 42,
            message: "weird".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn media_too_large_maps_to_413() {
        let err = CinesyncError::MediaTooLarge { size: 10, cap: 5 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
