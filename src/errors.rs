//! Typed error hierarchy for the bridge.
//!
//! Two top-level enums cover the two subsystems:
//! - `ClientError` — failures talking to either HTTP API
//! - `SyncError` — failures in the sync/mapping layer above the clients

use thiserror::Error;

/// Errors from the HTTP clients (internal backend or external service).
///
/// Timeouts surface as `Transport` — they are treated as ordinary upstream
/// failures, not distinguished further.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {service} response: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    /// Whether the upstream answered with 404. Callers that treat not-found
    /// as a normal negative result match on this.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Status { status: 404, .. })
    }
}

/// Errors from the sync and identity-mapping layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
