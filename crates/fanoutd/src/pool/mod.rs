//! Session pool using the Actor pattern.
//!
//! The pool is the central coordinator for all connected sessions. It owns
//! the active set and every session's mailbox sender, and it is the only
//! place membership changes or fan-out happen.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ register   ┌─────────────────┐  try_send  ┌─────────────────┐
//! │  Session pumps  │──────────▶│    PoolActor    │──────────▶│ Session mailbox │
//! └─────────────────┘ unregister └─────────────────┘            └─────────────────┘
//!         │           broadcast          │                              │
//!         │           query              │ Dispatcher                   │
//!         ▼                              ▼                              ▼
//!    PoolHandle               HashMap<SessionId, Member>        outbound pump
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::PoolActor;
pub use commands::{
    BroadcastRequest, Mailbox, MailboxReceiver, PoolError, PoolQuery, Registration,
    RemovalReason,
};
pub use handle::PoolHandle;

use crate::dispatch::Dispatcher;

/// Default capacity of each coordinator request channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Coordinator channel sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Capacity of each of the register, unregister, broadcast, and query channels
    pub command_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Spawn the pool coordinator with the default dispatcher.
///
/// Client messages are relayed to every session.
///
/// # Example
///
/// ```no_run
/// use fanoutd::pool::{spawn_pool, PoolConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let pool = spawn_pool(PoolConfig::default());
///     let members = pool.member_count().await;
/// }
/// ```
pub fn spawn_pool(config: PoolConfig) -> PoolHandle {
    spawn_pool_with(config, Dispatcher::new())
}

/// Spawn the pool coordinator with a custom dispatcher.
///
/// The coordinator runs until every `PoolHandle` clone has been dropped.
pub fn spawn_pool_with(config: PoolConfig, dispatcher: Dispatcher) -> PoolHandle {
    let buffer = config.command_buffer.max(1);

    let (register_tx, register_rx) = mpsc::channel(buffer);
    let (unregister_tx, unregister_rx) = mpsc::channel(buffer);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(buffer);
    let (query_tx, query_rx) = mpsc::channel(buffer);

    let actor = PoolActor::new(register_rx, unregister_rx, broadcast_rx, query_rx, dispatcher);
    tokio::spawn(actor.run());

    PoolHandle::new(register_tx, unregister_tx, broadcast_tx, query_tx)
}
