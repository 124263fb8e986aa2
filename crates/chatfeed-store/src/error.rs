//! Error types for the store client.

use thiserror::Error;

/// Errors that can occur when talking to the remote document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// The credentials were rejected or lack access to the collection.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Error response from the store API.
    #[error("store error ({status}): {error} - {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// WebSocket error on the change stream.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
