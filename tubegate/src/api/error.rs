//! API error handling.
//!
//! Every failure that happens before the first body byte is rendered as JSON.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use media_extractor::ExtractionError;
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Error code for programmatic handling
    pub code: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 403 Forbidden.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// 409 Conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 410 Gone.
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "GONE", message)
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// 503 Service Unavailable.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            error: self.message,
            code: self.code,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        let reason = serde_json::json!({ "reason": err.reason() });
        let api = match &err {
            ExtractionError::Private => ApiError::forbidden("This video is private"),
            ExtractionError::AgeRestricted => ApiError::forbidden("This video is age-restricted"),
            ExtractionError::Forbidden => ApiError::forbidden("Access to this video is forbidden"),
            ExtractionError::Removed => ApiError::gone("This video has been removed"),
            ExtractionError::Live => ApiError::bad_request("Live streams are not supported"),
            ExtractionError::InvalidUrl(url) => {
                ApiError::bad_request(format!("Unsupported URL: {}", url))
            }
            _ => {
                tracing::error!(error = %err, "Extraction failed");
                ApiError::internal("Failed to extract media information")
            }
        };
        api.with_details(reason)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest(msg) => ApiError::bad_request(msg),
            Error::Extraction(e) => e.into(),
            Error::NoViableFormat(msg) => ApiError::new(
                StatusCode::CONFLICT,
                "NO_VIABLE_FORMAT",
                format!("{}; enable external muxing to combine separate streams", msg),
            ),
            Error::DeliveryFailure { reason, path } => {
                tracing::error!(reason = %reason, path = ?path, "Delivery failed");
                let api = ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DELIVERY_FAILED",
                    format!("Delivery failed: {}", reason),
                );
                match path {
                    Some(path) => api.with_details(
                        serde_json::json!({ "partialPath": path.display().to_string() }),
                    ),
                    None => api,
                }
            }
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::ApiError(msg) => {
                tracing::error!("Server error: {}", msg);
                ApiError::internal(msg)
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ExtractionError) -> StatusCode {
        ApiError::from(Error::from(err)).status
    }

    #[test]
    fn test_server_failure_is_internal() {
        let err: ApiError = Error::ApiError("Failed to bind to 0.0.0.0:8080".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_extraction_reason_mapping() {
        assert_eq!(status_of(ExtractionError::Private), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ExtractionError::AgeRestricted), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ExtractionError::Removed), StatusCode::GONE);
        assert_eq!(status_of(ExtractionError::Live), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ExtractionError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(ExtractionError::Other("weird".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_no_viable_format_is_conflict() {
        let err: ApiError = Error::no_viable_format("only split streams").into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "NO_VIABLE_FORMAT");
    }

    #[test]
    fn test_delivery_failure_reports_partial_path() {
        let err: ApiError = Error::delivery_at("disk full", "/tmp/a.mp4").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.details.unwrap()["partialPath"], "/tmp/a.mp4");
    }

    #[test]
    fn test_body_uses_error_field() {
        let body = ApiErrorResponse {
            error: "bad".into(),
            code: "BAD_REQUEST".into(),
            details: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "bad");
        assert!(json.get("details").is_none());
    }
}
