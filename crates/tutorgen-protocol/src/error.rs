//! Error types for the client core.

use thiserror::Error;

/// Errors surfaced to callers of the client core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered 401. The session has already been torn down.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Any other non-success status, carrying the backend's message.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Text suitable for an inline message next to the failing control.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            Self::Unauthorized(_) => "your session has expired, please sign in again".to_owned(),
            other => other.to_string(),
        }
    }
}

/// Convenience result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
