//! fanout daemon - Session pool and broadcast server
//!
//! This crate provides the core infrastructure for the hub:
//! - `pool` - Coordinator actor owning the set of active sessions
//! - `dispatch` - Translation of hub events into broadcasts and targeted sends
//! - `session` - Per-connection inbound and outbound pumps
//! - `server` - HTTP listener, WebSocket upgrade, and connection halves
//! - `config` - Tunables for timeouts, mailbox sizes, and listen address
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        fanoutd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  register/  ┌──────────────────────┐   │
//! │  │   HubServer     │  unregister │     PoolActor        │   │
//! │  │  (axum, /ws)    │────────────▶│ (active set owner)   │   │
//! │  └────────┬────────┘  broadcast  └──────────┬───────────┘   │
//! │           │ upgrade                         │ try_send      │
//! │           ▼                                 ▼               │
//! │  ┌─────────────────┐              ┌──────────────────────┐  │
//! │  │  inbound pump   │              │  mailbox (mpsc)      │  │
//! │  │  (per session)  │              │  → outbound pump     │  │
//! │  └─────────────────┘              └──────────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod dispatch;
pub mod pool;
pub mod server;
pub mod session;
