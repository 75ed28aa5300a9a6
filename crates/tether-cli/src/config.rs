//! Configuration file for the Tether CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_relay::{ClientConfig, RelayServerConfig};
use tether_transport::TransportConfig;

/// Tether configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Peer client settings
    #[serde(default)]
    pub client: ClientSection,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// PEM private key; TLS is enabled when set together with `cert_file`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// PEM certificate chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    /// Connection limit
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Idle timeout in seconds (0 disables the watchdog)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Watchdog sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Handshake deadline in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

/// `[client]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Relay address to dial
    #[serde(default = "default_relay_addr")]
    pub relay_addr: String,
    /// PEM certificate to trust; plaintext when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Keep-alive cadence in seconds (0 disables)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Receive queue capacity
    #[serde(default = "default_receive_queue")]
    pub receive_queue: usize,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_relay_addr() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_receive_queue() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            key_file: None,
            cert_file: None,
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            relay_addr: default_relay_addr(),
            ca_file: None,
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            receive_queue: default_receive_queue(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("tether/config.toml")
    }

    /// Load config from the default path, or fall back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_host_port(&self.server.listen_addr, "listen_addr")?;
        validate_host_port(&self.client.relay_addr, "relay_addr")?;

        if self.server.key_file.is_some() != self.server.cert_file.is_some() {
            anyhow::bail!("key_file and cert_file must be set together");
        }
        if self.server.max_sessions == 0 {
            anyhow::bail!("max_sessions must be at least 1");
        }
        if self.server.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be at least 1");
        }
        if self.server.handshake_timeout_secs == 0 {
            anyhow::bail!("handshake_timeout_secs must be at least 1");
        }
        if self.client.receive_queue == 0 {
            anyhow::bail!("receive_queue must be at least 1");
        }
        if self.client.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }
        Ok(())
    }

    /// Relay server settings
    pub fn relay_server_config(&self) -> RelayServerConfig {
        let mut config = RelayServerConfig::default()
            .with_max_sessions(self.server.max_sessions)
            .with_sweep_interval(Duration::from_secs(self.server.sweep_interval_secs))
            .with_handshake_timeout(Duration::from_secs(self.server.handshake_timeout_secs));
        if self.server.idle_timeout_secs > 0 {
            config = config.with_idle_timeout(Duration::from_secs(self.server.idle_timeout_secs));
        }
        config
    }

    /// Peer client settings
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_transport(
                TransportConfig::default()
                    .with_connect_timeout(Duration::from_secs(self.client.connect_timeout_secs)),
            )
            .with_receive_queue(self.client.receive_queue)
    }

    /// Keep-alive cadence, if enabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.client.keepalive_secs > 0).then(|| Duration::from_secs(self.client.keepalive_secs))
    }
}

fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        anyhow::bail!(
            "{} '{}' missing port (expected format: host:port)",
            name,
            addr
        );
    };
    if host.is_empty() {
        anyhow::bail!("{} '{}' missing host", name, addr);
    }
    if port.parse::<u16>().is_err() {
        anyhow::bail!("{} '{}' has an invalid port", name, addr);
    }
    Ok(())
}
