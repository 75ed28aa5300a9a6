//! Relay error types.

use std::io;
use tether_core::{FrameError, IdError};
use tether_transport::TransportError;

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A peer id could not be decoded
    #[error("malformed peer id: {0}")]
    MalformedId(#[from] IdError),

    /// The remote end broke the framing rules
    #[error("protocol violation: {0}")]
    Protocol(FrameError),

    /// A peer id announce arrived after the handshake
    #[error("protocol violation: peer id announce after handshake")]
    UnexpectedAnnounce,

    /// The underlying stream failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The id handshake did not complete
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Inconsistent or unusable configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The session is closed
    #[error("session closed")]
    SessionClosed,

    /// A deadline passed
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Outbound payload exceeds the frame body limit; nothing was sent
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Largest body a frame can carry
        max: usize,
    },

    /// Caller buffer cannot hold the message body
    #[error("buffer too small: message is {needed} bytes, buffer holds {available}")]
    BufferTooSmall {
        /// Body length of the consumed message
        needed: usize,
        /// Length of the caller's buffer
        available: usize,
    },
}

impl From<FrameError> for RelayError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => RelayError::Transport(TransportError::Io(io)),
            FrameError::Closed => RelayError::SessionClosed,
            other => RelayError::Protocol(other),
        }
    }
}

impl From<io::Error> for RelayError {
    fn from(e: io::Error) -> Self {
        RelayError::Transport(TransportError::Io(e))
    }
}

impl RelayError {
    /// Whether the session that produced this error is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Protocol(_)
                | RelayError::UnexpectedAnnounce
                | RelayError::Transport(_)
                | RelayError::Handshake(_)
                | RelayError::SessionClosed
        )
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
