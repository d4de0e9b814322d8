//! Crate-wide error type

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the connection manager.
///
/// Every variant maps to a stable string code (see [`Error::code`]) so the
/// bridge layer can forward `{code, message}` pairs without matching on
/// display text.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed URL, empty connection id, undecodable pin, or similar
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A live connection already uses this id
    #[error("connection id '{0}' already exists")]
    DuplicateId(String),

    /// No live connection with this id
    #[error("no connection with id '{0}'")]
    NotFound(String),

    /// The server presented a chain and no configured pin matched
    #[error("certificate pinning failed: {0}")]
    PinningFailed(String),

    /// Handshake or upgrade exceeded its configured bound
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The WebSocket upgrade response was not a valid 101 switch
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed frame or other protocol violation; fatal to the connection
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation not valid for the connection's current ready state
    #[error("invalid state: expected {expected}, connection is {actual}")]
    InvalidState {
        /// State(s) the operation requires
        expected: String,
        /// State the connection was actually in
        actual: String,
    },

    /// Operation aborted by a subsequent `close()` or `cleanup()`
    #[error("operation cancelled")]
    Cancelled,

    /// TLS-level failure other than a pinning rejection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Transport-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code for the bridge boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::DuplicateId(_) => "duplicate_id",
            Self::NotFound(_) => "not_found",
            Self::PinningFailed(_) => "pinning_failed",
            Self::Timeout(_) => "timeout",
            Self::HandshakeFailed(_) => "handshake_failed",
            Self::Protocol(_) => "protocol_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::Tls(_) => "tls_error",
            Self::Io(_) => "io_error",
        }
    }
}
