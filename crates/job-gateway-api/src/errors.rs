//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use job_gateway_core::{AuthError, DispatchError, ErrorCategory};
use tracing::{error, warn};

/// Webhook handler errors with HTTP status code mapping
///
/// Each error maps to one status through its [`ErrorCategory`]:
///
/// - `400 Bad Request`: malformed timestamp, body or payload, unknown job or
///   function
/// - `401 Unauthorized`: missing, expired or mismatched credentials
/// - `500 Internal Server Error`: missing server-side credentials, or a job
///   function that failed
///
/// The body is always `{"detail": "<message>"}`. For job failures the message
/// is the job's own error message; its full chain is logged and reported to
/// the monitoring channel, never returned.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(e) => e.category(),
            Self::Dispatch(e) => e.category(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
            ErrorCategory::Configuration | ErrorCategory::Execution => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();

        match self.category() {
            ErrorCategory::Configuration => {
                error!(error = %detail, "Webhook credentials are not configured")
            }
            ErrorCategory::Authentication => warn!(error = %detail, "Webhook rejected"),
            ErrorCategory::Validation => warn!(error = %detail, "Invalid webhook request"),
            ErrorCategory::Execution => {}
        }

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
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

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration loading failed: {message}")]
    Load { message: String },
}
