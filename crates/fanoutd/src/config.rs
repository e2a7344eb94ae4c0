//! Hub configuration.
//!
//! Defaults match the timings the hub has always shipped with: a ten minute
//! read deadline, a five minute write deadline, a keepalive ping at 90% of
//! the read deadline, and a 512 byte inbound message limit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pool::PoolConfig;
use crate::server::ConnectionConfig;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default per-session mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default read deadline (10 minutes)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(600);

/// Default write deadline (5 minutes)
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default maximum inbound message size in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Complete configuration for a hub instance.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the HTTP listener binds to
    pub listen: SocketAddr,

    /// Directory served for non-`/ws` paths, if any
    pub static_dir: Option<PathBuf>,

    /// Read/write deadlines and message size limit
    pub connection: ConnectionConfig,

    /// Capacity of each session's outbound mailbox
    pub mailbox_capacity: usize,

    /// Coordinator channel sizes
    pub pool: PoolConfig,
}

impl HubConfig {
    /// Interval between keepalive pings: 90% of the read deadline, so a
    /// healthy peer's pong always lands before the deadline expires.
    pub fn keepalive_period(&self) -> Duration {
        keepalive_period(self.connection.read_timeout)
    }

    /// Checks the configuration for values that would stall the hub.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` naming the first zero-valued setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Zero("mailbox_capacity"));
        }
        if self.connection.read_timeout.is_zero() {
            return Err(ConfigError::Zero("read_timeout"));
        }
        if self.connection.write_timeout.is_zero() {
            return Err(ConfigError::Zero("write_timeout"));
        }
        if self.connection.max_message_size == 0 {
            return Err(ConfigError::Zero("max_message_size"));
        }
        if self.pool.command_buffer == 0 {
            return Err(ConfigError::Zero("command_buffer"));
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            static_dir: None,
            connection: ConnectionConfig::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            pool: PoolConfig::default(),
        }
    }
}

/// Keepalive period for a given read deadline.
pub fn keepalive_period(read_timeout: Duration) -> Duration {
    read_timeout * 9 / 10
}

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
