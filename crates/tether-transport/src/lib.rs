//! # Tether Transport
//!
//! Byte-stream transport for the Tether relay.
//!
//! This crate provides:
//! - A transport factory that binds listeners and dials relays
//! - Plaintext TCP, or TLS when key/certificate PEM material is supplied
//! - A single [`RelayStream`] type that hides which of the two is in use
//!
//! Nothing above this crate inspects TLS state. Framing and sessions only
//! ever see `AsyncRead + AsyncWrite`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod factory;
pub mod stream;
pub mod tls;

pub use error::{TransportError, TransportResult};
pub use factory::{
    PendingStream, RelayListener, TransportConfig, dial, dial_with_config, listen,
    listen_with_config,
};
pub use stream::RelayStream;
