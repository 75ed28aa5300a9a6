//! # Tether Core
//!
//! Wire-level building blocks for the Tether rendezvous relay.
//!
//! This crate provides:
//! - [`PeerId`]: the 16-byte relay-assigned peer identifier
//! - [`Frame`] encoding and decoding, both over byte buffers and over
//!   async byte streams
//! - Error types for identifier and frame handling
//!
//! ## Wire format
//!
//! ```text
//! ┌────────┬──────────────────┬──────────────────┬─────────────────┐
//! │ type   │ peer id          │ body length      │ body            │
//! │ 1 byte │ 16 bytes         │ 4 bytes (BE u32) │ body length     │
//! └────────┴──────────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! The meaning of the peer id field depends on the frame type and on the
//! direction of travel: a DATA frame sent by a client carries the
//! destination, the same frame forwarded by the relay carries the source.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod peer_id;

pub use error::{FrameError, IdError};
pub use frame::{Frame, FrameHeader, FrameType, read_frame, write_frame};
pub use peer_id::PeerId;

/// Length of a [`PeerId`] in bytes
pub const PEER_ID_LEN: usize = 16;

/// Fixed frame header size in bytes (type + peer id + body length)
pub const FRAME_HEADER_SIZE: usize = 1 + PEER_ID_LEN + 4;

/// Maximum frame body size accepted by the codec (64 KiB)
pub const MAX_BODY_SIZE: usize = 64 * 1024;
