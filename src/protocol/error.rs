use thiserror::Error;

/// Errors surfaced by the sync client.
///
/// Per-record failures inside a sync cycle are not returned through this
/// type; they are folded into the cycle's error list so one bad record
/// never aborts the cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote call timed out: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
