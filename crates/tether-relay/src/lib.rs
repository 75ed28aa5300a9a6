//! # Tether Relay
//!
//! Rendezvous relay server and peer client.
//!
//! Peers behind NATs dial the relay once, receive a server-assigned
//! [`PeerId`], and address each other by id from then on. The relay forwards
//! opaque payloads and never looks inside them.
//!
//! ## Architecture
//!
//! ```text
//!   Peer A                     Relay                      Peer B
//!     │ ── dial ──────────────▶ │                           │
//!     │ ◀── ANNOUNCE(id A) ──── │ ◀────────────── dial ──── │
//!     │                         │ ──── ANNOUNCE(id B) ────▶ │
//!     │ ── DATA(to B, body) ──▶ │                           │
//!     │                         │ ── DATA(from A, body) ──▶ │
//! ```
//!
//! Delivery is at most once and in order per sender, for as long as both
//! connections survive. Unknown destinations are dropped silently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_relay::{RelayServer, RelayServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = tether_transport::listen("127.0.0.1:0", None, None).await?;
//! let addr = listener.local_addr()?.to_string();
//! tokio::spawn(async move { RelayServer::new(RelayServerConfig::default()).serve(listener).await });
//!
//! let a = tether_relay::dial(&addr, None).await?;
//! let b = tether_relay::dial(&addr, None).await?;
//! a.send(b.id(), b"Hello".to_vec()).await?;
//! assert_eq!(b.receive().await?.body, b"Hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use client::{ClientConfig, Message, Peer, dial, dial_with_config};
pub use error::{RelayError, Result};
pub use registry::SessionRegistry;
pub use server::{RelayServer, RelayServerConfig};
pub use session::{FrameSink, Session, SessionRole};
pub use tether_core::PeerId;
