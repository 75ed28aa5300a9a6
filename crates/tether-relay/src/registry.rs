//! Server-side routing table.

use crate::session::Session;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Frame, PeerId};
use tracing::{debug, trace};

/// Registered sessions keyed by peer id.
///
/// Sharded, so operations on distinct ids do not contend. Clones share the
/// same table.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<PeerId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under `id` unless the id is taken.
    ///
    /// Returns `true` if the session was inserted.
    pub fn register(&self, id: PeerId, session: Arc<Session>) -> bool {
        match self.sessions.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Remove `id` if, and only if, it maps to `session`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, id: &PeerId, session: &Session) -> bool {
        self.sessions
            .remove_if(id, |_, registered| std::ptr::eq(Arc::as_ptr(registered), session))
            .is_some()
    }

    /// Look up a session
    pub fn get(&self, id: &PeerId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &PeerId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the registered ids
    pub fn ids(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Sessions that have been silent for at least `threshold`
    pub fn idle_sessions(&self, threshold: Duration) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= threshold)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Close every registered session.
    pub fn close_all(&self) {
        // Collect first: closing unregisters, which needs the shard lock.
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.close();
        }
    }

    /// Forward a DATA frame from `from` to the peer named in its id field.
    ///
    /// The destination receives the frame with the id field rewritten to the
    /// sender. Unknown destinations are dropped silently. A failed write
    /// closes the destination only.
    pub async fn route(&self, from: PeerId, frame: Frame) {
        let to = frame.peer_id();
        let Some(dest) = self.get(&to) else {
            trace!(
                "Dropping {} bytes from {:?} for unknown peer {:?}",
                frame.body().len(),
                from,
                to
            );
            return;
        };

        let forwarded = Frame::data(from, frame.into_body());
        match dest.send_frame(&forwarded).await {
            Ok(()) => trace!(
                "Routed {} bytes {:?} -> {:?}",
                forwarded.body().len(),
                from,
                to
            ),
            Err(e) => debug!("Delivery to {:?} failed: {}", to, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRole;
    use tether_core::read_frame;
    use tether_transport::RelayStream;
    use tokio::net::{TcpListener, TcpStream};

    async fn server_session() -> (Arc<Session>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let session = Session::new(RelayStream::Plain(accepted.unwrap().0), SessionRole::Server);
        (Arc::new(session), client.unwrap())
    }

    #[tokio::test]
    async fn test_register_is_vacant_only() {
        let registry = SessionRegistry::new();
        let (a, _ra) = server_session().await;
        let (b, _rb) = server_session().await;
        let id = PeerId::generate();

        assert!(registry.register(id, Arc::clone(&a)));
        assert!(!registry.register(id, Arc::clone(&b)));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &a));
    }

    #[tokio::test]
    async fn test_unregister_only_owner() {
        let registry = SessionRegistry::new();
        let (a, _ra) = server_session().await;
        let (b, _rb) = server_session().await;
        let id = PeerId::generate();

        registry.register(id, Arc::clone(&a));
        assert!(!registry.unregister(&id, &b));
        assert!(registry.contains(&id));

        assert!(registry.unregister(&id, &a));
        assert!(!registry.unregister(&id, &a));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_ids_snapshot() {
        let registry = SessionRegistry::new();
        let (a, _ra) = server_session().await;
        let (b, _rb) = server_session().await;
        let ida = a.accept_handshake(&registry).await.unwrap();
        let idb = b.accept_handshake(&registry).await.unwrap();

        let mut ids = registry.ids();
        ids.sort();
        let mut expected = vec![ida, idb];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_route_rewrites_source() {
        let registry = SessionRegistry::new();
        let (dest, mut remote) = server_session().await;
        let dest_id = dest.accept_handshake(&registry).await.unwrap();

        // Consume the announce
        let announce = read_frame(&mut remote).await.unwrap();
        assert_eq!(announce.peer_id(), dest_id);

        let source = PeerId::generate();
        registry
            .route(source, Frame::data(dest_id, b"payload".to_vec()))
            .await;

        let delivered = read_frame(&mut remote).await.unwrap();
        assert_eq!(delivered.peer_id(), source);
        assert_eq!(delivered.body(), b"payload");
    }

    #[tokio::test]
    async fn test_route_unknown_destination_is_silent() {
        let registry = SessionRegistry::new();
        registry
            .route(PeerId::generate(), Frame::data(PeerId::generate(), b"x".to_vec()))
            .await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_idle_sessions_and_close_all() {
        let registry = SessionRegistry::new();
        let (a, _ra) = server_session().await;
        a.accept_handshake(&registry).await.unwrap();

        assert!(registry.idle_sessions(Duration::from_secs(60)).is_empty());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.idle_sessions(Duration::from_millis(20)).len(), 1);

        registry.close_all();
        assert!(a.is_closed());
        assert!(registry.is_empty());
    }
}
