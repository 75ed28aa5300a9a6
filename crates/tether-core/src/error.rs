//! Error types for identifiers and the frame codec.

use thiserror::Error;

/// Errors decoding a [`PeerId`](crate::PeerId) from bytes or text.
///
/// These are always local validation failures and are never sent over the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Input does not have the required length
    #[error("malformed peer id: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Text form is not valid hexadecimal
    #[error("malformed peer id: {0}")]
    InvalidHex(String),
}

/// Frame-level errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Stream ended cleanly at a frame boundary
    #[error("stream closed")]
    Closed,

    /// Stream or buffer ended in the middle of a frame
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required to complete the frame
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Unknown frame type byte
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownType(u8),

    /// Body length exceeds the codec limit
    #[error("frame body too large: {len} bytes (max {max})")]
    BodyTooLarge {
        /// Declared or supplied body length
        len: usize,
        /// Maximum permitted body length
        max: usize,
    },

    /// A body-less frame type declared a body
    #[error("{frame_type:?} frame must not carry a body ({len} bytes declared)")]
    UnexpectedBody {
        /// Offending frame type
        frame_type: crate::FrameType,
        /// Declared body length
        len: usize,
    },

    /// Buffer holds more bytes than the frame it encodes
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// Underlying stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether this error means the peer broke the wire contract, as
    /// opposed to the stream itself failing or closing.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, FrameError::Closed | FrameError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_classification() {
        assert!(FrameError::UnknownType(9).is_protocol_violation());
        assert!(
            FrameError::Truncated {
                expected: 21,
                actual: 3
            }
            .is_protocol_violation()
        );
        assert!(!FrameError::Closed.is_protocol_violation());
        assert!(
            !FrameError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
                .is_protocol_violation()
        );
    }

    #[test]
    fn test_error_display() {
        let err = FrameError::UnknownType(0x2A);
        assert_eq!(err.to_string(), "unknown frame type: 0x2A");

        let err = IdError::InvalidLength {
            expected: 16,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "malformed peer id: expected 16 bytes, got 3"
        );
    }
}
