//! Transport factory for listening and dialing.
//!
//! Whether a relay endpoint speaks plaintext TCP or TLS is decided here, from
//! the key/certificate material supplied, and nowhere else. Both paths hand
//! back a [`RelayStream`].

use crate::error::{TransportError, TransportResult};
use crate::stream::RelayStream;
use crate::tls;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info};

/// Default timeout for establishing an outbound TCP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for completing a TLS handshake
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket-level transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for the outbound TCP connect
    pub connect_timeout: Duration,
    /// Timeout for the TLS handshake, both directions
    pub tls_handshake_timeout: Duration,
    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the TLS handshake timeout
    #[must_use]
    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY`
    #[must_use]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// A bound relay listener, plaintext or TLS.
pub struct RelayListener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    config: TransportConfig,
}

impl std::fmt::Debug for RelayListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayListener")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl RelayListener {
    /// Accept the next raw TCP connection.
    ///
    /// The TLS handshake, if any, is deferred to
    /// [`PendingStream::establish`] so the accept loop never waits on a
    /// remote peer.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the underlying accept fails; see
    /// [`TransportError::is_transient_accept_error`].
    pub async fn accept(&self) -> TransportResult<(PendingStream, SocketAddr)> {
        let (tcp, addr) = self.listener.accept().await?;
        if self.config.nodelay {
            set_nodelay_best_effort(&tcp, addr);
        }
        Ok((
            PendingStream {
                tcp,
                acceptor: self.acceptor.clone(),
                handshake_timeout: self.config.tls_handshake_timeout,
            },
            addr,
        ))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Whether accepted connections are TLS-wrapped
    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }
}

/// A failure here concerns one connection only, so it is logged and ignored.
fn set_nodelay_best_effort(tcp: &TcpStream, addr: SocketAddr) {
    if let Err(e) = tcp.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }
}

/// An accepted connection whose transport handshake has not run yet
pub struct PendingStream {
    tcp: TcpStream,
    acceptor: Option<TlsAcceptor>,
    handshake_timeout: Duration,
}

impl PendingStream {
    /// Complete the transport handshake and yield the usable stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Handshake` or `TransportError::Timeout` if
    /// the TLS handshake fails.
    pub async fn establish(self) -> TransportResult<RelayStream> {
        let Some(acceptor) = self.acceptor else {
            return Ok(RelayStream::Plain(self.tcp));
        };

        let tls = tokio::time::timeout(self.handshake_timeout, acceptor.accept(self.tcp))
            .await
            .map_err(|_| TransportError::Timeout("TLS handshake"))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        Ok(RelayStream::Tls(Box::new(tls.into())))
    }
}

/// Bind a relay listener with default settings.
///
/// Plaintext when neither key nor certificate is supplied, TLS when both
/// are.
///
/// # Errors
///
/// Returns `TransportError::Configuration` if exactly one of the two is
/// supplied or the material is unusable, and `TransportError::BindFailed`
/// if the address cannot be bound.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = tether_transport::listen("127.0.0.1:0", None, None).await?;
/// println!("listening on {}", listener.local_addr()?);
/// # Ok(())
/// # }
/// ```
pub async fn listen(
    addr: &str,
    key_pem: Option<&[u8]>,
    cert_pem: Option<&[u8]>,
) -> TransportResult<RelayListener> {
    listen_with_config(addr, key_pem, cert_pem, TransportConfig::default()).await
}

/// Bind a relay listener with custom socket settings.
pub async fn listen_with_config(
    addr: &str,
    key_pem: Option<&[u8]>,
    cert_pem: Option<&[u8]>,
    config: TransportConfig,
) -> TransportResult<RelayListener> {
    let acceptor = match (key_pem, cert_pem) {
        (None, None) => None,
        (Some(key), Some(cert)) => Some(TlsAcceptor::from(tls::server_config(key, cert)?)),
        (Some(_), None) => {
            return Err(TransportError::Configuration(
                "private key supplied without a certificate".into(),
            ));
        }
        (None, Some(_)) => {
            return Err(TransportError::Configuration(
                "certificate supplied without a private key".into(),
            ));
        }
    };

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::BindFailed {
            addr: addr.to_string(),
            source,
        })?;

    info!(
        "Listening on {} ({})",
        listener.local_addr()?,
        if acceptor.is_some() { "tls" } else { "plaintext" }
    );

    Ok(RelayListener {
        listener,
        acceptor,
        config,
    })
}

/// Connect to a relay with default settings.
///
/// Plaintext when `trusted_cert_pem` is `None`; otherwise TLS, trusting
/// only the supplied certificate(s).
///
/// # Errors
///
/// Returns `TransportError::ConnectionFailed` or `TransportError::Timeout`
/// if the TCP connection cannot be made, and `TransportError::Handshake` if
/// TLS fails.
pub async fn dial(addr: &str, trusted_cert_pem: Option<&[u8]>) -> TransportResult<RelayStream> {
    dial_with_config(addr, trusted_cert_pem, &TransportConfig::default()).await
}

/// Connect to a relay with custom socket settings.
pub async fn dial_with_config(
    addr: &str,
    trusted_cert_pem: Option<&[u8]>,
    config: &TransportConfig,
) -> TransportResult<RelayStream> {
    // Build TLS state first so bad material fails before any network I/O.
    let tls = match trusted_cert_pem {
        Some(pem) => Some((
            TlsConnector::from(tls::client_config(pem)?),
            tls::server_name(addr)?,
        )),
        None => None,
    };

    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout("connect"))?
        .map_err(|source| TransportError::ConnectionFailed {
            addr: addr.to_string(),
            source,
        })?;

    if config.nodelay {
        tcp.set_nodelay(true)?;
    }

    let Some((connector, server_name)) = tls else {
        debug!("Connected to {} (plaintext)", addr);
        return Ok(RelayStream::Plain(tcp));
    };

    let stream = tokio::time::timeout(
        config.tls_handshake_timeout,
        connector.connect(server_name, tcp),
    )
    .await
    .map_err(|_| TransportError::Timeout("TLS handshake"))?
    .map_err(|e| TransportError::Handshake(e.to_string()))?;

    debug!("Connected to {} (tls)", addr);
    Ok(RelayStream::Tls(Box::new(stream.into())))
}
