//! Error types with HTTP status code mapping.

use hyper::StatusCode;

use crate::page::PageId;
use crate::response::{self, HttpResponse};

/// Error type for pagetree operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Auth errors
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Token expired")]
    TokenExpired,

    // Input and tree errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Cannot move page {page} under {parent}: it is the page itself or one of its descendants")]
    Cycle { page: PageId, parent: PageId },

    /// An invariant of the stored tree does not hold. Indicates a bug in a
    /// write path, never retried.
    #[error("Consistency error: {0}")]
    Consistency(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // System errors
    #[error("Store error: {0}")]
    Store(#[from] libsql::Error),

    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized | Error::TokenExpired => StatusCode::UNAUTHORIZED,

            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Cycle { .. } | Error::AddrParse(_) => {
                StatusCode::BAD_REQUEST
            }

            Error::Consistency(_)
            | Error::Config(_)
            | Error::Store(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Jwt(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the whole operation may be retried as is.
    ///
    /// Only store failures qualify: the transaction was rolled back, so nothing
    /// of the failed attempt is visible.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_))
    }

    /// Convert error into HTTP response.
    pub fn into_response(self) -> HttpResponse {
        let status = self.status_code();
        let message = if status.is_server_error() {
            match &self {
                Error::Consistency(_) => {
                    tracing::error!(error = %self, "permission tree invariant violated")
                }
                _ => tracing::error!("Internal error: {self}"),
            }
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        response::error(status, &message)
    }
}

/// Result type alias using pagetree's Error.
pub type Result<T> = std::result::Result<T, Error>;
