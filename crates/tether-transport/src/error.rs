//! Transport layer errors.

use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address binding failed
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        /// Requested bind address
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Outbound connection failed
    #[error("connection to {addr} failed: {source}")]
    ConnectionFailed {
        /// Dialed address
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Inconsistent or unusable transport configuration
    #[error("invalid transport configuration: {0}")]
    Configuration(String),

    /// Address could not be interpreted
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Operation did not complete in time
    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    /// Whether an accept error only affects the one connection being
    /// accepted, so the listener can keep going.
    pub fn is_transient_accept_error(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
