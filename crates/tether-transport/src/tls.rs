//! TLS configuration from PEM material.
//!
//! Key and certificate material arrives as opaque PEM blobs; loading them
//! from disk is the caller's business. The relay is private infrastructure,
//! so clients trust exactly the certificate(s) they are handed and never the
//! system store.

use crate::error::{TransportError, TransportResult};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::net::IpAddr;
use std::sync::Arc;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Parse every certificate in a PEM blob.
pub fn parse_certificates(pem: &[u8]) -> TransportResult<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Configuration(format!("unreadable certificate PEM: {e}")))?;

    if certs.is_empty() {
        return Err(TransportError::Configuration(
            "no certificate found in PEM material".into(),
        ));
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM blob.
pub fn parse_private_key(pem: &[u8]) -> TransportResult<PrivateKeyDer<'static>> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::Configuration(format!("unreadable key PEM: {e}")))?
        .ok_or_else(|| TransportError::Configuration("no private key found in PEM material".into()))
}

/// Build a server configuration from a private key and certificate chain.
pub fn server_config(key_pem: &[u8], cert_pem: &[u8]) -> TransportResult<Arc<ServerConfig>> {
    let certs = parse_certificates(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Configuration(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Configuration(format!("unusable key or certificate: {e}")))?;

    Ok(Arc::new(config))
}

/// Build a client configuration whose only trust roots are the given
/// certificate(s).
pub fn client_config(trusted_cert_pem: &[u8]) -> TransportResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(trusted_cert_pem)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Configuration(format!("unusable trust root: {e}")))?;
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Configuration(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Server name to verify for a `host:port` address.
pub fn server_name(addr: &str) -> TransportResult<ServerName<'static>> {
    let host = split_host(addr)?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::from(ip));
    }
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| TransportError::InvalidAddress(format!("not a valid host name: {host}")))
}

/// Host part of `host:port`, `ip:port` or `[ipv6]:port`.
pub(crate) fn split_host(addr: &str) -> TransportResult<&str> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(format!("missing port in {addr}")))?;

    if port.parse::<u16>().is_err() {
        return Err(TransportError::InvalidAddress(format!(
            "invalid port in {addr}"
        )));
    }

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() {
        return Err(TransportError::InvalidAddress(format!(
            "missing host in {addr}"
        )));
    }
    Ok(host)
}
