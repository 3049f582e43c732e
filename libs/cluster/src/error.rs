//! Error types for cluster API access.

use thiserror::Error;

/// Errors surfaced by the cluster API client and views.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Connection-level failure (reset, refused, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success response from the API.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The server rejected a bind for an already-bound pod.
    #[error("binding conflict: {0}")]
    Conflict(String),

    /// The referenced object does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credential file missing or malformed.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Failed to decode an API payload.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The initial view sync did not complete.
    #[error("view sync failed: {0}")]
    SyncFailed(String),
}
