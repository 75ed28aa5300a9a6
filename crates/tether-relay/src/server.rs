//! Relay server: accept loop, handshake, forwarding and idle watchdog.

use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;
use crate::session::{FrameSink, Session, SessionRole};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tether_core::{Frame, PeerId};
use tether_transport::{PendingStream, RelayListener};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Maximum number of concurrent connections, handshaking ones included
    pub max_sessions: usize,
    /// Close sessions silent for this long (`None` disables the watchdog)
    pub idle_timeout: Option<Duration>,
    /// How often the idle watchdog sweeps the registry
    pub sweep_interval: Duration,
    /// Deadline for writing the peer id announce
    pub handshake_timeout: Duration,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            idle_timeout: None,
            sweep_interval: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl RelayServerConfig {
    /// Set the connection limit
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Enable the idle watchdog
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the watchdog sweep interval
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the handshake deadline
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(RelayError::Configuration(
                "max_sessions must be at least 1".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(RelayError::Configuration(
                "sweep_interval must be non-zero".into(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(RelayError::Configuration(
                "handshake_timeout must be non-zero".into(),
            ));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(RelayError::Configuration(
                "idle_timeout must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

/// Forwards DATA frames read from one session through the registry
struct Router {
    registry: SessionRegistry,
    from: PeerId,
}

impl FrameSink for Router {
    fn deliver(&mut self, frame: Frame) -> impl Future<Output = ()> + Send {
        self.registry.route(self.from, frame)
    }
}

/// Counts a live connection against `max_sessions` until dropped
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(active)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Closes every registered session when the accept loop ends or its future
/// is dropped
struct CloseOnExit<'a>(&'a SessionRegistry);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close_all();
    }
}

/// Rendezvous relay server
#[derive(Debug)]
pub struct RelayServer {
    config: RelayServerConfig,
    registry: SessionRegistry,
    active: Arc<AtomicUsize>,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new(RelayServerConfig::default())
    }
}

impl RelayServer {
    /// Create a server. Nothing is bound until [`serve`](Self::serve).
    pub fn new(config: RelayServerConfig) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run the accept loop until a fatal accept error.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` for an invalid configuration and
    /// `RelayError::Transport` if the listener fails in a way that is not
    /// specific to one connection.
    pub async fn serve(&self, listener: RelayListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Run the accept loop until `shutdown` resolves, then close every
    /// session.
    ///
    /// Connection tasks still in their TLS or relay handshake are cancelled
    /// before registered sessions are closed, so nothing is admitted after
    /// this returns. Dropping the future cancels those tasks and closes the
    /// registered sessions too.
    pub async fn serve_with_shutdown<F>(&self, listener: RelayListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        if let Ok(addr) = listener.local_addr() {
            info!(
                "Relay serving on {} ({})",
                addr,
                if listener.is_tls() { "tls" } else { "plaintext" }
            );
        }

        let _close_on_exit = CloseOnExit(&self.registry);
        let mut tasks = JoinSet::new();
        self.spawn_idle_watchdog(&mut tasks);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((pending, addr)) => self.admit(&mut tasks, pending, addr),
                    Err(e) if e.is_transient_accept_error() => {
                        warn!("Accept error: {}", e);
                    }
                    Err(e) => {
                        error!("Listener failed: {}", e);
                        break Err(RelayError::Transport(e));
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection task panicked: {}", e);
                        }
                    }
                }
            }
        };

        drop(listener);
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        result
    }

    fn admit(&self, tasks: &mut JoinSet<()>, pending: PendingStream, addr: SocketAddr) {
        let Some(slot) = ConnectionSlot::acquire(&self.active, self.config.max_sessions) else {
            warn!(
                "Refusing {}: at capacity ({} sessions)",
                addr, self.config.max_sessions
            );
            return;
        };

        let registry = self.registry.clone();
        let handshake_timeout = self.config.handshake_timeout;
        tasks.spawn(async move {
            let _slot = slot;
            handle_connection(pending, addr, registry, handshake_timeout).await;
        });
    }

    fn spawn_idle_watchdog(&self, tasks: &mut JoinSet<()>) {
        let Some(threshold) = self.config.idle_timeout else {
            return;
        };
        let registry = self.registry.clone();
        let interval = self.config.sweep_interval;

        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for session in registry.idle_sessions(threshold) {
                    info!(
                        "Closing idle session {:?} (silent for {:?})",
                        session.peer_id(),
                        session.idle_for()
                    );
                    session.close();
                }
            }
        });
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// The routing table
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Server configuration
    pub fn config(&self) -> &RelayServerConfig {
        &self.config
    }
}

async fn handle_connection(
    pending: PendingStream,
    addr: SocketAddr,
    registry: SessionRegistry,
    handshake_timeout: Duration,
) {
    let stream = match pending.establish().await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Transport handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let session = Arc::new(Session::new(stream, SessionRole::Server));
    let id = match tokio::time::timeout(handshake_timeout, session.accept_handshake(&registry)).await
    {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            debug!("Handshake with {} failed: {}", addr, e);
            session.close();
            return;
        }
        Err(_) => {
            debug!("Handshake with {} timed out", addr);
            session.close();
            return;
        }
    };
    info!("Session {} registered from {}", id, addr);

    let mut router = Router {
        registry,
        from: id,
    };
    match session.run_read_loop(&mut router).await {
        Ok(()) => debug!("Session {} ended", id),
        Err(e) => debug!("Session {} failed: {}", id, e),
    }
    session.close();
    info!("Session {} closed", id);
}
