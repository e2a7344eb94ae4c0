//! fanout daemon - WebSocket fan-out hub
//!
//! Accepts WebSocket clients on `/ws?username=<name>`, announces every join
//! and disconnect with the current roster, and relays client messages to
//! every connected session.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080)
//! fanoutd
//!
//! # Serve a web client from ./public on port 9000
//! fanoutd --listen 127.0.0.1:9000 --static-dir ./public
//!
//! # Same, configured through the environment
//! FANOUT_LISTEN=127.0.0.1:9000 FANOUT_STATIC_DIR=./public fanoutd
//!
//! # Enable debug logging
//! RUST_LOG=fanoutd=debug fanoutd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fanoutd::config::{
    HubConfig, DEFAULT_LISTEN_ADDR, DEFAULT_MAILBOX_CAPACITY, DEFAULT_MAX_MESSAGE_SIZE,
};
use fanoutd::pool::{spawn_pool, PoolConfig, DEFAULT_COMMAND_BUFFER};
use fanoutd::server::{ConnectionConfig, HubServer};

/// fanout daemon - real-time WebSocket broadcast hub
#[derive(Parser, Debug)]
#[command(name = "fanoutd", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "FANOUT_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Directory served for paths other than /ws
    #[arg(long, env = "FANOUT_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Outbound mailbox capacity per session
    #[arg(long, env = "FANOUT_MAILBOX_CAPACITY", default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    mailbox_capacity: usize,

    /// Seconds without any inbound frame before a session is dropped
    #[arg(long, env = "FANOUT_READ_TIMEOUT_SECS", default_value_t = 600)]
    read_timeout_secs: u64,

    /// Seconds a single write may take before a session is dropped
    #[arg(long, env = "FANOUT_WRITE_TIMEOUT_SECS", default_value_t = 300)]
    write_timeout_secs: u64,

    /// Largest accepted inbound message, in bytes
    #[arg(long, env = "FANOUT_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Capacity of each coordinator request channel
    #[arg(long, env = "FANOUT_COMMAND_BUFFER", default_value_t = DEFAULT_COMMAND_BUFFER)]
    command_buffer: usize,
}

impl Args {
    fn into_config(self) -> HubConfig {
        HubConfig {
            listen: self.listen,
            static_dir: self.static_dir,
            connection: ConnectionConfig {
                read_timeout: Duration::from_secs(self.read_timeout_secs),
                write_timeout: Duration::from_secs(self.write_timeout_secs),
                max_message_size: self.max_message_size,
            },
            mailbox_capacity: self.mailbox_capacity,
            pool: PoolConfig {
                command_buffer: self.command_buffer,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config();
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "fanout daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Spawn the session pool
    let pool = spawn_pool(config.pool);
    info!("Session pool started");

    let listen = config.listen;
    let server = HubServer::new(config, pool, cancel_token);

    info!(addr = %listen, "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e).context("Hub server failed");
    }

    info!("fanout daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

/// Log directives used when `RUST_LOG` is unset.
const DEFAULT_LOG_DIRECTIVES: &str = "fanoutd=info,fanout_core=info,fanout_protocol=info";

/// Builds the log filter. `RUST_LOG` replaces the defaults entirely; an
/// empty or unparseable value falls back to them.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVES))
}
