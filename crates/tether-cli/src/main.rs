//! Tether CLI
//!
//! Run a rendezvous relay, or talk to peers through one.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_core::PeerId;
use tether_relay::{Peer, RelayError, RelayServer};
use tracing_subscriber::EnvFilter;

use config::Config;

/// Tether - rendezvous relay for peers behind NATs
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the peer commands
#[derive(clap::Args)]
struct RelayArgs {
    /// Relay address (host:port)
    #[arg(short, long)]
    relay: Option<String>,

    /// PEM certificate to trust; enables TLS
    #[arg(long)]
    ca: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay server
    Serve {
        /// Listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// PEM private key (requires --cert)
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        /// PEM certificate chain (requires --key)
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// Close sessions silent for this many seconds (0 disables)
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Maximum concurrent connections
        #[arg(long)]
        max_sessions: Option<usize>,
    },

    /// Print this peer's id, then every message received
    Recv {
        #[command(flatten)]
        relay: RelayArgs,

        /// Keep-alive interval in seconds (0 disables)
        #[arg(long)]
        keepalive: Option<u64>,
    },

    /// Send one message to a peer
    Send {
        #[command(flatten)]
        relay: RelayArgs,

        /// Destination peer id (hex)
        #[arg(required = true)]
        destination: String,

        /// Message text
        #[arg(required = true)]
        message: String,
    },

    /// Print the id the relay assigns and exit
    Id {
        #[command(flatten)]
        relay: RelayArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            listen,
            key,
            cert,
            idle_timeout,
            max_sessions,
        } => {
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            if key.is_some() {
                config.server.key_file = key;
                config.server.cert_file = cert;
            }
            if let Some(secs) = idle_timeout {
                config.server.idle_timeout_secs = secs;
            }
            if let Some(max) = max_sessions {
                config.server.max_sessions = max;
            }
            config.validate()?;
            serve(&config).await?;
        }
        Commands::Recv { relay, keepalive } => {
            apply_relay_args(&mut config, relay);
            if let Some(secs) = keepalive {
                config.client.keepalive_secs = secs;
            }
            config.validate()?;
            receive_messages(&config).await?;
        }
        Commands::Send {
            relay,
            destination,
            message,
        } => {
            apply_relay_args(&mut config, relay);
            config.validate()?;
            send_message(&config, &destination, message).await?;
        }
        Commands::Id { relay } => {
            apply_relay_args(&mut config, relay);
            config.validate()?;
            let peer = connect(&config).await?;
            println!("{}", peer.id());
            peer.close();
        }
    }

    Ok(())
}

fn apply_relay_args(config: &mut Config, args: RelayArgs) {
    if let Some(relay) = args.relay {
        config.client.relay_addr = relay;
    }
    if args.ca.is_some() {
        config.client.ca_file = args.ca;
    }
}

fn read_pem(path: Option<&Path>) -> anyhow::Result<Option<Vec<u8>>> {
    path.map(|p| std::fs::read(p).with_context(|| format!("failed to read {}", p.display())))
        .transpose()
}

/// Run the relay until Ctrl+C
async fn serve(config: &Config) -> anyhow::Result<()> {
    let key = read_pem(config.server.key_file.as_deref())?;
    let cert = read_pem(config.server.cert_file.as_deref())?;

    let listener =
        tether_transport::listen(&config.server.listen_addr, key.as_deref(), cert.as_deref())
            .await?;
    println!(
        "Relay listening on {} ({})",
        listener.local_addr()?,
        if listener.is_tls() { "tls" } else { "plaintext" }
    );

    let server = RelayServer::new(config.relay_server_config());
    server
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("Relay stopped");
    Ok(())
}

/// Dial the configured relay
async fn connect(config: &Config) -> anyhow::Result<Peer> {
    let ca = read_pem(config.client.ca_file.as_deref())?;
    let peer = tether_relay::dial_with_config(
        &config.client.relay_addr,
        ca.as_deref(),
        &config.client_config(),
    )
    .await
    .with_context(|| format!("failed to reach relay {}", config.client.relay_addr))?;

    tracing::debug!(
        "Connected to {} as {} ({})",
        config.client.relay_addr,
        peer.id(),
        if peer.is_encrypted() { "tls" } else { "plaintext" }
    );
    Ok(peer)
}

/// Print incoming messages until the relay goes away or Ctrl+C
async fn receive_messages(config: &Config) -> anyhow::Result<()> {
    let peer = connect(config).await?;
    println!("{}", peer.id());

    let _keepalive = config
        .keepalive_interval()
        .map(|interval| peer.spawn_keepalive(interval));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = peer.receive() => match received {
                Ok(message) => {
                    println!("{} {}", message.from, String::from_utf8_lossy(&message.body));
                }
                Err(RelayError::SessionClosed) => {
                    tracing::warn!("Relay closed the connection");
                    break;
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    peer.close();
    Ok(())
}

/// Send one message and exit
async fn send_message(config: &Config, destination: &str, message: String) -> anyhow::Result<()> {
    let destination: PeerId = destination
        .parse()
        .with_context(|| format!("invalid peer id: {destination}"))?;

    let peer = connect(config).await?;
    peer.send(destination, message.into_bytes()).await?;
    tracing::info!("Sent message to {}", destination);

    // Give the relay a moment to read the frame before the connection ends.
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer.close();
    Ok(())
}
