//! API errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use berth_deploy::{DeployError, ErrorCategory};
use tracing::error;

/// Result type for handlers
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for API handlers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Identity headers missing or malformed
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Malformed request outside the deploy pipeline
    #[error("{0}")]
    BadRequest(String),

    /// Deploy pipeline failure
    #[error(transparent)]
    Deploy(#[from] DeployError),
}

impl Error {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Deploy(e) => match e.category() {
                ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                ErrorCategory::Rejected | ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::Forbidden => StatusCode::FORBIDDEN,
                ErrorCategory::Cluster => StatusCode::BAD_GATEWAY,
                ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
