//! Crate-wide error kinds.
//!
//! Mirrors the dispositions in the error-handling design: each variant
//! carries just enough context to log without re-deriving it at the call
//! site, and maps onto a single place the orchestrator or admin server
//! reacts to (failure accounting, a process exit code, an HTTP status).

use std::time::Duration;
use thiserror::Error;

impl From<crate::feedset::FeedSetError> for AppError {
    fn from(e: crate::feedset::FeedSetError) -> Self {
        AppError::Other(e.into())
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(e: crate::store::StoreError) -> Self {
        AppError::Other(e.into())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Network error, 5xx, or read timeout while fetching a feed.
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// Recognized 429 or host-specific rate-limit body; retry after `after`.
    #[error("rate limited, retry after {after:?}")]
    RateLimited { after: Duration },

    /// Feed body could not be parsed as RSS/Atom/JSON-Feed.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A `block_rule`/`keep_rule`/`format` call raised or returned the wrong shape.
    #[error("predicate error: {0}")]
    PredicateError(String),

    /// Chat platform responded with a non-429 error.
    #[error("send error: {0}")]
    SendError(String),

    /// The run lock is already held by another process.
    #[error("another run is already in progress")]
    AlreadyRunning,

    /// An admin write was attempted while the run lock is held.
    #[error("run in progress, write rejected")]
    AdminConflict,

    /// Malformed admin request body.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Dedicated process exit code for [`AppError::AlreadyRunning`].
pub const EXIT_ALREADY_RUNNING: i32 = 75;

impl AppError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AppError::AlreadyRunning => Some(EXIT_ALREADY_RUNNING),
            _ => None,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::AdminConflict => StatusCode::CONFLICT,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Io(_) | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TransientFetch(_)
            | AppError::RateLimited { .. }
            | AppError::ParseError(_)
            | AppError::PredicateError(_)
            | AppError::SendError(_)
            | AppError::AlreadyRunning => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
