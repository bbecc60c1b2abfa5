//! Client-side error types.

use thiserror::Error;

/// Transport and probe errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection establishment failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A stream-level read or write failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// A frame violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A probe was attempted again before its minimum interval elapsed.
    /// Logged and dropped, never retried immediately.
    #[error("probe rate limit exceeded, retry after {min_interval_ms}ms")]
    RateLimited {
        /// The enforced minimum interval.
        min_interval_ms: u64,
    },
}

/// Session driver errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Durable storage failed during session setup.
    #[error(transparent)]
    Storage(#[from] chatwire_core::StorageError),

    /// The session configuration was unusable.
    #[error("invalid session config: {0}")]
    Config(String),
}
