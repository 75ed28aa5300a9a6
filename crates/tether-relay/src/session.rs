//! Connection sessions.
//!
//! A [`Session`] owns one [`RelayStream`] split into halves. The read half
//! belongs to whoever runs the handshake and then the read loop; the write
//! half sits behind an async mutex so the application, the keep-alive task
//! and the router never interleave partial frames on the wire.
//!
//! Lifecycle is `Handshaking -> Registered -> Closed`. Closing is one-way and
//! wakes every task blocked on the session's stream.

use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tether_core::{Frame, FrameError, FrameType, PeerId, read_frame};
use tether_transport::RelayStream;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, watch};
use tracing::{debug, trace};

/// Upper bound on flushing a graceful shutdown to the remote end
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Which end of the connection a session represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Accepted by the relay server
    Server,
    /// Dialed by a peer
    Client,
}

/// Destination for DATA frames decoded by a session's read loop.
pub trait FrameSink {
    /// Handle one DATA frame.
    fn deliver(&mut self, frame: Frame) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionState {
    peer_id: Option<PeerId>,
    closed: bool,
}

/// One live relay connection
pub struct Session {
    role: SessionRole,
    remote_addr: Option<SocketAddr>,
    encrypted: bool,
    reader: Mutex<Option<ReadHalf<RelayStream>>>,
    /// Write guard: at most one frame in flight
    writer: Mutex<Option<WriteHalf<RelayStream>>>,
    /// Peer id and closed flag; also the close signal for blocked tasks
    state: watch::Sender<SessionState>,
    /// Set on server sessions so close can unregister
    registry: OnceLock<SessionRegistry>,
    created: Instant,
    /// Milliseconds after `created` of the last decoded frame
    last_activity: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state.borrow();
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("peer_id", &state.peer_id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Session {
    /// Wrap an established stream.
    pub fn new(stream: RelayStream, role: SessionRole) -> Self {
        let remote_addr = stream.peer_addr().ok();
        let encrypted = stream.is_encrypted();
        let (reader, writer) = tokio::io::split(stream);
        let (state, _) = watch::channel(SessionState::default());

        Self {
            role,
            remote_addr,
            encrypted,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            state,
            registry: OnceLock::new(),
            created: Instant::now(),
            last_activity: AtomicU64::new(0),
        }
    }

    /// Server side of the handshake.
    ///
    /// Reserves a fresh id in `registry` and writes the announce frame while
    /// holding the write guard, so the announce is always the first frame on
    /// the wire even if another peer routes to the new id immediately.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Transport` if the announce cannot be written and
    /// `RelayError::SessionClosed` if the session closed meanwhile. Either
    /// way the reservation is released.
    pub async fn accept_handshake(self: &Arc<Self>, registry: &SessionRegistry) -> Result<PeerId> {
        if self.role != SessionRole::Server {
            return Err(RelayError::Handshake(
                "announce can only be sent by the server".into(),
            ));
        }
        if self.peer_id().is_some() {
            return Err(RelayError::Handshake("handshake already completed".into()));
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(RelayError::SessionClosed);
        };

        let _ = self.registry.set(registry.clone());
        let id = loop {
            let candidate = PeerId::generate();
            if registry.register(candidate, Arc::clone(self)) {
                break candidate;
            }
            debug!("Peer id collision on {:?}, regenerating", candidate);
        };

        if !self.attach(id) {
            registry.unregister(&id, self);
            return Err(RelayError::SessionClosed);
        }

        let announce = Frame::announce(id).encode()?;
        let written = tokio::select! {
            biased;
            _ = self.closed() => Err(RelayError::SessionClosed),
            result = write_all_flush(writer, &announce) => result,
        };
        drop(guard);

        if let Err(e) = written {
            self.close();
            return Err(e);
        }
        Ok(id)
    }

    /// Client side of the handshake: the first frame must be an announce.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Handshake` if anything else arrives or the
    /// stream ends first. The session is closed on failure.
    pub async fn connect_handshake(&self) -> Result<PeerId> {
        if self.role != SessionRole::Client {
            return Err(RelayError::Handshake(
                "announce can only be received by a client".into(),
            ));
        }

        let frame = {
            let mut guard = self.reader.lock().await;
            let Some(reader) = guard.as_mut() else {
                return Err(RelayError::SessionClosed);
            };
            self.read_next(reader).await
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(RelayError::Transport(e)) => {
                self.close();
                return Err(RelayError::Transport(e));
            }
            Err(e) => {
                self.close();
                return Err(RelayError::Handshake(format!(
                    "no peer id announced: {e}"
                )));
            }
        };

        if frame.frame_type() != FrameType::PeerIdAnnounce {
            self.close();
            return Err(RelayError::Handshake(format!(
                "expected peer id announce, got {:?} frame",
                frame.frame_type()
            )));
        }

        let id = frame.peer_id();
        if !self.attach(id) {
            return Err(RelayError::SessionClosed);
        }
        debug!("Relay assigned peer id {}", id);
        Ok(id)
    }

    /// Decode frames until the session closes or fails.
    ///
    /// DATA frames go to `sink`, keep-alives only refresh the activity
    /// timestamp, and a repeated announce is a protocol violation. On exit
    /// the session is closed and its stream shut down.
    ///
    /// # Errors
    ///
    /// Returns the decode or transport error that ended the loop. A clean
    /// end of stream or an explicit close returns `Ok(())`.
    pub async fn run_read_loop<S>(&self, sink: &mut S) -> Result<()>
    where
        S: FrameSink + Send,
    {
        let mut guard = self.reader.lock().await;
        let result = match guard.as_mut() {
            Some(reader) => self.pump(reader, sink).await,
            None => Err(RelayError::SessionClosed),
        };
        guard.take();
        drop(guard);

        self.close();
        self.shutdown_writer().await;

        match result {
            Err(RelayError::SessionClosed) => Ok(()),
            other => other,
        }
    }

    async fn pump<S>(&self, reader: &mut ReadHalf<RelayStream>, sink: &mut S) -> Result<()>
    where
        S: FrameSink + Send,
    {
        loop {
            let frame = self.read_next(reader).await?;
            match frame.frame_type() {
                FrameType::Data => {
                    tokio::select! {
                        biased;
                        _ = self.closed() => return Err(RelayError::SessionClosed),
                        () = sink.deliver(frame) => {}
                    }
                }
                FrameType::KeepAlive => {
                    trace!("Keep-alive from {:?}", self.peer_id());
                }
                FrameType::PeerIdAnnounce => return Err(RelayError::UnexpectedAnnounce),
            }
        }
    }

    async fn read_next(&self, reader: &mut ReadHalf<RelayStream>) -> Result<Frame> {
        tokio::select! {
            biased;
            _ = self.closed() => Err(RelayError::SessionClosed),
            frame = read_frame(reader) => {
                let frame = frame?;
                self.touch();
                Ok(frame)
            }
        }
    }

    /// Write one frame under the write guard.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::SessionClosed` on a closed session,
    /// `RelayError::PayloadTooLarge` if the body cannot be framed (the
    /// session stays open), and `RelayError::Transport` if the write fails,
    /// which also closes the session.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode().map_err(|e| match e {
            FrameError::BodyTooLarge { len, max } => RelayError::PayloadTooLarge { len, max },
            other => RelayError::Protocol(other),
        })?;

        let result = tokio::select! {
            biased;
            _ = self.closed() => return Err(RelayError::SessionClosed),
            result = self.write_locked(&bytes) => result,
        };

        if let Err(e) = result {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    async fn write_locked(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RelayError::SessionClosed)?;
        write_all_flush(writer, bytes).await
    }

    async fn shutdown_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
        }
    }

    /// Close the session. Idempotent.
    ///
    /// A registered server session is removed from the registry before any
    /// blocked reader or writer is woken.
    pub fn close(&self) {
        let mut id = None;
        let newly_closed = self.state.send_if_modified(|state| {
            id = state.peer_id;
            !std::mem::replace(&mut state.closed, true)
        });
        if !newly_closed {
            return;
        }

        if let (Some(id), Some(registry)) = (id, self.registry.get()) {
            registry.unregister(&id, self);
        }
        debug!("Session {:?} closed", id);
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.closed).await;
    }

    fn attach(&self, id: PeerId) -> bool {
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.peer_id = Some(id);
            true
        })
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity.store(elapsed, Ordering::Relaxed);
    }

    /// Id assigned at handshake
    pub fn peer_id(&self) -> Option<PeerId> {
        self.state.borrow().peer_id
    }

    /// Which end of the connection this is
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Remote socket address, if known
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the session is closed
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Time since the last decoded frame (or creation)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }
}

async fn write_all_flush(writer: &mut WriteHalf<RelayStream>, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::write_frame;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (RelayStream, RelayStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            RelayStream::Plain(accepted.unwrap().0),
            RelayStream::Plain(client.unwrap()),
        )
    }

    #[derive(Default)]
    struct Collect(Vec<Frame>);

    impl FrameSink for Collect {
        fn deliver(&mut self, frame: Frame) -> impl Future<Output = ()> + Send {
            self.0.push(frame);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_handshake_assigns_and_registers() {
        let (server_stream, client_stream) = tcp_pair().await;
        let registry = SessionRegistry::new();

        let server = Arc::new(Session::new(server_stream, SessionRole::Server));
        let client = Session::new(client_stream, SessionRole::Client);

        let assigned = server.accept_handshake(&registry).await.unwrap();
        let learned = client.connect_handshake().await.unwrap();

        assert_eq!(assigned, learned);
        assert_eq!(server.peer_id(), Some(assigned));
        assert_eq!(client.peer_id(), Some(assigned));
        assert!(registry.contains(&assigned));
        assert!(!server.is_encrypted());
        assert!(server.remote_addr().is_some());
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_announce() {
        let (mut raw, client_stream) = tcp_pair().await;
        let client = Session::new(client_stream, SessionRole::Client);

        write_frame(&mut raw, &Frame::data(PeerId::generate(), b"early".to_vec()))
            .await
            .unwrap();

        let err = client.connect_handshake().await.unwrap_err();
        assert!(matches!(err, RelayError::Handshake(_)));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_handshake_on_eof() {
        let (raw, client_stream) = tcp_pair().await;
        let client = Session::new(client_stream, SessionRole::Client);
        drop(raw);

        let err = client.connect_handshake().await.unwrap_err();
        assert!(matches!(err, RelayError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_handshake_role_mismatch() {
        let (a, b) = tcp_pair().await;
        let registry = SessionRegistry::new();
        let client = Arc::new(Session::new(a, SessionRole::Client));
        let server = Session::new(b, SessionRole::Server);

        assert!(client.accept_handshake(&registry).await.is_err());
        assert!(server.connect_handshake().await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_read_loop_filters_keepalives() {
        let (mut raw, server_stream) = tcp_pair().await;
        let session = Session::new(server_stream, SessionRole::Server);
        let dest = PeerId::generate();

        write_frame(&mut raw, &Frame::keepalive(PeerId::ZERO)).await.unwrap();
        write_frame(&mut raw, &Frame::data(dest, b"one".to_vec())).await.unwrap();
        write_frame(&mut raw, &Frame::keepalive(PeerId::ZERO)).await.unwrap();
        write_frame(&mut raw, &Frame::data(dest, b"two".to_vec())).await.unwrap();
        drop(raw);

        let mut sink = Collect::default();
        session.run_read_loop(&mut sink).await.unwrap();

        let bodies: Vec<&[u8]> = sink.0.iter().map(Frame::body).collect();
        assert_eq!(bodies, vec![&b"one"[..], &b"two"[..]]);
        assert!(sink.0.iter().all(|f| f.peer_id() == dest));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_second_announce_closes_session() {
        let (mut raw, server_stream) = tcp_pair().await;
        let session = Session::new(server_stream, SessionRole::Server);

        write_frame(&mut raw, &Frame::announce(PeerId::generate()))
            .await
            .unwrap();

        let mut sink = Collect::default();
        let err = session.run_read_loop(&mut sink).await.unwrap_err();
        assert!(matches!(err, RelayError::UnexpectedAnnounce));
        assert!(session.is_closed());

        // Stream was shut down: the remote sees end of stream.
        let mut buf = [0u8; 1];
        assert_eq!(raw.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_session() {
        let (mut raw, server_stream) = tcp_pair().await;
        let session = Session::new(server_stream, SessionRole::Server);

        let mut bogus = [0u8; tether_core::FRAME_HEADER_SIZE];
        bogus[0] = 7;
        tokio::io::AsyncWriteExt::write_all(&mut raw, &bogus)
            .await
            .unwrap();

        let mut sink = Collect::default();
        let err = session.run_read_loop(&mut sink).await.unwrap_err();
        assert!(matches!(err, RelayError::Protocol(FrameError::UnknownType(7))));
        assert!(sink.0.is_empty());
    }

    #[tokio::test]
    async fn test_close_unblocks_read_loop() {
        let (_raw, server_stream) = tcp_pair().await;
        let session = Arc::new(Session::new(server_stream, SessionRole::Server));

        let looping = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            let mut sink = Collect::default();
            looping.run_read_loop(&mut sink).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("read loop did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unregisters() {
        let (server_stream, _client_stream) = tcp_pair().await;
        let registry = SessionRegistry::new();
        let session = Arc::new(Session::new(server_stream, SessionRole::Server));
        let id = session.accept_handshake(&registry).await.unwrap();

        session.close();
        session.close();

        assert!(session.is_closed());
        assert!(!registry.contains(&id));
        assert!(matches!(
            session.send_frame(&Frame::keepalive(PeerId::ZERO)).await,
            Err(RelayError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversize_payload_keeps_session_open() {
        let (stream, _raw) = tcp_pair().await;
        let session = Session::new(stream, SessionRole::Client);

        let frame = Frame::data(PeerId::generate(), vec![0u8; tether_core::MAX_BODY_SIZE + 1]);
        let err = session.send_frame(&frame).await.unwrap_err();
        assert!(matches!(err, RelayError::PayloadTooLarge { .. }));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_activity_tracking() {
        let (mut raw, server_stream) = tcp_pair().await;
        let session = Arc::new(Session::new(server_stream, SessionRole::Server));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(session.idle_for() >= Duration::from_millis(50));

        let looping = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            let mut sink = Collect::default();
            looping.run_read_loop(&mut sink).await
        });

        write_frame(&mut raw, &Frame::keepalive(PeerId::ZERO)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.idle_for() < Duration::from_millis(50));

        drop(raw);
        handle.await.unwrap().unwrap();
    }
}
