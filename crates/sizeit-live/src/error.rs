//! Engine errors.

use thiserror::Error;

/// Boxed error returned by external collaborators (storage, renderer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`LiveService`](crate::LiveService) commands.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Unknown session identifier.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Malformed arguments.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage collaborator failed; propagated unchanged.
    #[error("Storage failure: {0}")]
    Storage(#[source] BoxError),

    /// Renderer failed.
    #[error("Render failure: {0}")]
    Render(#[source] BoxError),
}

impl LiveError {
    pub(crate) fn not_found(session_id: &str) -> Self {
        LiveError::NotFound(session_id.to_string())
    }
}
