//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sizeit_live::LiveError;
use thiserror::Error;
use tracing::{error, warn};

use crate::metrics;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Unknown resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No user cookie, or an unknown user.
    #[error("Unauthorized")]
    Unauthorized,

    /// Engine failure.
    #[error(transparent)]
    Live(#[from] LiveError),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::Live(LiveError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) | AppError::Live(LiveError::InvalidInput(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Live(LiveError::Storage(_) | LiveError::Render(_)) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) | AppError::Live(LiveError::NotFound(_)) => "not_found",
            AppError::InvalidInput(_) | AppError::Live(LiveError::InvalidInput(_)) => "invalid_input",
            AppError::Unauthorized => "unauthorized",
            AppError::Live(LiveError::Storage(_)) => "storage",
            AppError::Live(LiveError::Render(_)) => "render",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::record_error(self.kind());

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotFound("s".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(LiveError::NotFound("s".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(LiveError::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(LiveError::Storage("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_engine_message_passes_through() {
        let err = AppError::from(LiveError::NotFound("s-1".into()));
        assert_eq!(err.to_string(), "Session not found: s-1");
    }
}
