//! Peer client handle.

use crate::error::{RelayError, Result};
use crate::session::{FrameSink, Session, SessionRole};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Frame, PeerId};
use tether_transport::TransportConfig;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket settings for dialing the relay
    pub transport: TransportConfig,
    /// Deadline for the relay's peer id announce
    pub handshake_timeout: Duration,
    /// Capacity of the queue between the read loop and [`Peer::receive`]
    pub receive_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            receive_queue: 64,
        }
    }
}

impl ClientConfig {
    /// Set the transport settings
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set the handshake deadline
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the receive queue capacity
    #[must_use]
    pub fn with_receive_queue(mut self, capacity: usize) -> Self {
        self.receive_queue = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.receive_queue == 0 {
            return Err(RelayError::Configuration(
                "receive_queue must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A message delivered through the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender's peer id
    pub from: PeerId,
    /// Opaque payload
    pub body: Vec<u8>,
}

/// Hands DATA frames from the read loop to `Peer::receive`
struct Delivery {
    tx: mpsc::Sender<Message>,
}

impl FrameSink for Delivery {
    fn deliver(&mut self, frame: Frame) -> impl Future<Output = ()> + Send {
        let message = Message {
            from: frame.peer_id(),
            body: frame.into_body(),
        };
        async move {
            if self.tx.send(message).await.is_err() {
                trace!("Receiver dropped, discarding message");
            }
        }
    }
}

/// Connect to a relay with default settings and complete the id handshake.
///
/// Plaintext when `trusted_cert_pem` is `None`, TLS trusting only that
/// certificate otherwise.
///
/// # Errors
///
/// Returns `RelayError::Transport` if the relay cannot be reached and
/// `RelayError::Handshake` if it does not announce an id.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), tether_relay::RelayError> {
/// let peer = tether_relay::dial("127.0.0.1:7400", None).await?;
/// println!("I am {}", peer.id());
/// let message = peer.receive().await?;
/// peer.send(message.from, b"Hello Yourself!".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn dial(addr: &str, trusted_cert_pem: Option<&[u8]>) -> Result<Peer> {
    dial_with_config(addr, trusted_cert_pem, &ClientConfig::default()).await
}

/// Connect to a relay with custom settings.
pub async fn dial_with_config(
    addr: &str,
    trusted_cert_pem: Option<&[u8]>,
    config: &ClientConfig,
) -> Result<Peer> {
    config.validate()?;

    let stream =
        tether_transport::dial_with_config(addr, trusted_cert_pem, &config.transport).await?;
    let session = Arc::new(Session::new(stream, SessionRole::Client));

    let id = match tokio::time::timeout(config.handshake_timeout, session.connect_handshake()).await
    {
        Ok(result) => result?,
        Err(_) => {
            session.close();
            return Err(RelayError::Handshake(format!(
                "no peer id announced within {:?}",
                config.handshake_timeout
            )));
        }
    };

    let (tx, rx) = mpsc::channel(config.receive_queue);
    tokio::spawn({
        let session = Arc::clone(&session);
        async move {
            let mut delivery = Delivery { tx };
            if let Err(e) = session.run_read_loop(&mut delivery).await {
                debug!("Relay connection lost: {}", e);
            }
        }
    });

    Ok(Peer {
        id,
        session,
        rx: Mutex::new(rx),
    })
}

/// Client-side handle on one relay connection.
///
/// Dropping the handle closes the connection.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    session: Arc<Session>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl Peer {
    /// Id the relay assigned to this peer
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Send `payload` to `destination`.
    ///
    /// An unknown destination is not an error; the relay drops the message.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Transport` if the write fails,
    /// `RelayError::SessionClosed` after close, and
    /// `RelayError::PayloadTooLarge` if the payload exceeds one frame.
    pub async fn send(&self, destination: PeerId, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.session
            .send_frame(&Frame::data(destination, payload))
            .await
    }

    /// Send a keep-alive frame
    pub async fn send_keepalive(&self) -> Result<()> {
        self.session
            .send_frame(&Frame::keepalive(PeerId::ZERO))
            .await
    }

    /// Wait for the next message.
    ///
    /// Messages that arrived before the connection closed are still
    /// returned; after that every call fails.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::SessionClosed` once the connection is closed and
    /// no queued message remains.
    pub async fn receive(&self) -> Result<Message> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(RelayError::SessionClosed)
    }

    /// [`receive`](Self::receive) with a deadline.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Message> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| RelayError::Timeout("receive"))?
    }

    /// Receive into a caller buffer, returning the sender and body length.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::BufferTooSmall` if the body does not fit; the
    /// message is consumed either way.
    pub async fn receive_into(&self, buf: &mut [u8]) -> Result<(PeerId, usize)> {
        let message = self.receive().await?;
        let len = message.body.len();
        let Some(dest) = buf.get_mut(..len) else {
            return Err(RelayError::BufferTooSmall {
                needed: len,
                available: buf.len(),
            });
        };
        dest.copy_from_slice(&message.body);
        Ok((message.from, len))
    }

    /// Send keep-alives every `interval` until the connection closes.
    pub fn spawn_keepalive(&self, interval: Duration) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = session.closed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = session.send_frame(&Frame::keepalive(PeerId::ZERO)).await {
                            debug!("Keep-alive stopped: {}", e);
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.session.close();
    }

    /// Whether the connection is closed
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Relay's socket address
    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.session.remote_addr()
    }

    /// Whether the connection is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        self.session.is_encrypted()
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{FrameType, read_frame, write_frame};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal relay stand-in: announces `id` and hands back the raw socket.
    async fn fake_relay(id: PeerId) -> (String, JoinHandle<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            write_frame(&mut stream, &Frame::announce(id)).await.unwrap();
            stream
        });
        (addr, handle)
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.receive_queue, 64);
        assert!(config.validate().is_ok());
        assert!(config.with_receive_queue(0).validate().is_err());
    }

    #[tokio::test]
    async fn test_dial_learns_id() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;

        let peer = dial(&addr, None).await.unwrap();
        assert_eq!(peer.id(), id);
        assert!(!peer.is_encrypted());
        assert!(!peer.is_closed());
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let config = ClientConfig::default().with_handshake_timeout(Duration::from_millis(50));
        let err = dial_with_config(&addr, None, &config).await.unwrap_err();
        assert!(matches!(err, RelayError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_send_and_keepalive_frames() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;
        let peer = dial(&addr, None).await.unwrap();
        let mut raw = relay.await.unwrap();

        let dest = PeerId::generate();
        peer.send(dest, b"hello".to_vec()).await.unwrap();
        peer.send_keepalive().await.unwrap();

        let data = read_frame(&mut raw).await.unwrap();
        assert_eq!(data.frame_type(), FrameType::Data);
        assert_eq!(data.peer_id(), dest);
        assert_eq!(data.body(), b"hello");

        let keepalive = read_frame(&mut raw).await.unwrap();
        assert_eq!(keepalive.frame_type(), FrameType::KeepAlive);
        assert!(keepalive.body().is_empty());
    }

    #[tokio::test]
    async fn test_receive_skips_keepalives() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;
        let peer = dial(&addr, None).await.unwrap();
        let mut raw = relay.await.unwrap();

        let from = PeerId::generate();
        write_frame(&mut raw, &Frame::keepalive(PeerId::ZERO)).await.unwrap();
        write_frame(&mut raw, &Frame::data(from, b"msg".to_vec()))
            .await
            .unwrap();

        let message = peer.receive_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(message.from, from);
        assert_eq!(message.body, b"msg");
    }

    #[tokio::test]
    async fn test_receive_drains_queue_after_close() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;
        let peer = dial(&addr, None).await.unwrap();
        let mut raw = relay.await.unwrap();

        let from = PeerId::generate();
        write_frame(&mut raw, &Frame::data(from, b"first".to_vec()))
            .await
            .unwrap();
        write_frame(&mut raw, &Frame::data(from, b"second".to_vec()))
            .await
            .unwrap();
        drop(raw);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(peer.is_closed());

        assert_eq!(peer.receive().await.unwrap().body, b"first");
        assert_eq!(peer.receive().await.unwrap().body, b"second");
        assert!(matches!(
            peer.receive().await,
            Err(RelayError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_receive_timeout_and_buffer() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;
        let peer = dial(&addr, None).await.unwrap();
        let mut raw = relay.await.unwrap();

        assert!(matches!(
            peer.receive_timeout(Duration::from_millis(30)).await,
            Err(RelayError::Timeout(_))
        ));

        let from = PeerId::generate();
        write_frame(&mut raw, &Frame::data(from, b"0123456789".to_vec()))
            .await
            .unwrap();
        write_frame(&mut raw, &Frame::data(from, b"fits".to_vec()))
            .await
            .unwrap();

        let mut small = [0u8; 4];
        assert!(matches!(
            peer.receive_into(&mut small).await,
            Err(RelayError::BufferTooSmall {
                needed: 10,
                available: 4
            })
        ));
        let (sender, len) = peer.receive_into(&mut small).await.unwrap();
        assert_eq!(sender, from);
        assert_eq!(&small[..len], b"fits");
    }

    #[tokio::test]
    async fn test_close_stops_everything() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;
        let peer = dial(&addr, None).await.unwrap();
        let mut raw = relay.await.unwrap();

        let keepalive = peer.spawn_keepalive(Duration::from_millis(10));
        peer.close();
        peer.close();

        assert!(peer.is_closed());
        assert!(matches!(
            peer.send(PeerId::generate(), b"late".to_vec()).await,
            Err(RelayError::SessionClosed)
        ));
        assert!(matches!(peer.receive().await, Err(RelayError::SessionClosed)));
        tokio::time::timeout(Duration::from_secs(1), keepalive)
            .await
            .unwrap()
            .unwrap();

        // The relay side sees the connection end.
        let mut seen_eof = false;
        for _ in 0..10 {
            match read_frame(&mut raw).await {
                Ok(frame) => assert_eq!(frame.frame_type(), FrameType::KeepAlive),
                Err(_) => {
                    seen_eof = true;
                    break;
                }
            }
        }
        assert!(seen_eof);
    }

    #[tokio::test]
    async fn test_spawn_keepalive_sends_periodically() {
        let id = PeerId::generate();
        let (addr, relay) = fake_relay(id).await;
        let peer = dial(&addr, None).await.unwrap();
        let mut raw = relay.await.unwrap();

        let _keepalive = peer.spawn_keepalive(Duration::from_millis(20));
        for _ in 0..2 {
            let frame = tokio::time::timeout(Duration::from_secs(1), read_frame(&mut raw))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame.frame_type(), FrameType::KeepAlive);
        }
    }
}
