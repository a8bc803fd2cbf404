//! Error types for the HTTP service

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bus_runtime::{ConfigurationError, QueueError};
use tracing::{error, warn};

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Request handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: the request itself is unusable (missing content type)
/// - `404 Not Found`: the queue, subscription or message does not exist
/// - `413 Payload Too Large`: the body does not fit the receive buffer
/// - `500 Internal Server Error`: any other backend or transport failure
///
/// The response body is `text/plain` and holds only the error message. Full
/// details are logged server-side.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Failure reported by the bus client
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The request is missing something it needs
    #[error("{message}")]
    InvalidRequest { message: String },

    /// Request body larger than the buffer allotted to it
    #[error("Request body exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The request body could not be read
    #[error("Failed to read request body: {message}")]
    BodyRead { message: String },
}

impl ApiError {
    pub fn missing_content_type() -> Self {
        Self::InvalidRequest {
            message: "No content type was provided.".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Queue(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Queue(QueueError::InvalidRequest { .. }) => StatusCode::BAD_REQUEST,
            Self::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BodyRead { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = ?self, status = %status, "Request failed");
        } else {
            warn!(error = %self, status = %status, "Request rejected");
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Invalid backend configuration: {0}")]
    Backend(#[from] ConfigurationError),
}
