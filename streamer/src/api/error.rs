//! API error handling.
//!
//! Maps domain errors to status codes and a JSON body.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    /// Seconds for a `Retry-After` header.
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Ask the client to retry after `secs` seconds.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 410: the stream ended for this client and must not be restarted yet.
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "STREAM_ENDED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let retryable = err.is_retryable();
        let api_error = match err {
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::SegmentNotFound { .. } => ApiError::not_found(err.to_string()),
            Error::Flagged { .. } => ApiError::gone("Stream ended for this client"),
            Error::NotReady { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "NOT_READY", "MPD not ready")
            }
            Error::EncoderLaunch { ref channel, ref reason } => {
                tracing::error!(channel = %channel, reason = %reason, "Encoder launch failed");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ENCODER_UNAVAILABLE",
                    "Encoder could not be started",
                )
            }
            Error::Cancelled => ApiError::service_unavailable("Server is shutting down"),
            Error::IoPath { .. } | Error::Io(_) => {
                tracing::error!("IO error: {}", err);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        };

        if retryable {
            api_error.with_retry_after(1)
        } else {
            api_error
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::validation("bad id"), StatusCode::BAD_REQUEST),
            (
                Error::SegmentNotFound {
                    channel: "42".into(),
                    file: "a.ts".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                Error::Flagged {
                    channel: "42".into(),
                },
                StatusCode::GONE,
            ),
            (
                Error::NotReady {
                    channel: "42".into(),
                    waited: Duration::from_secs(15),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (Error::Other("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::from(Error::encoder_launch("42", "spawn failed")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let response = ApiError::from(Error::validation("bad id")).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
