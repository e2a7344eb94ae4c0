//! Pool coordinator requests, errors, and removal reasons.
//!
//! This module defines the message types for communicating with the `PoolActor`:
//! - `Registration`: a session asking to join the active set
//! - `BroadcastRequest`: fan-out, targeted emit, or event dispatch
//! - `PoolQuery`: read-only snapshots answered over a oneshot channel
//! - `PoolError`: errors that can occur while talking to the coordinator
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::sync::Arc;

use fanout_core::{Identity, SessionId};
use fanout_protocol::{SocketEvent, UserEntry};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::HubEvent;

/// Sending end of a session's outbound mailbox. Held only by the coordinator.
pub type Mailbox = mpsc::Sender<Arc<SocketEvent>>;

/// Receiving end of a session's outbound mailbox. Held only by the outbound pump.
pub type MailboxReceiver = mpsc::Receiver<Arc<SocketEvent>>;

// ============================================================================
// Requests
// ============================================================================

/// Request to add a session to the active set.
///
/// Ownership of the mailbox sender moves to the coordinator; dropping it
/// there is what closes the mailbox.
#[derive(Debug)]
pub struct Registration {
    /// Who is joining
    pub identity: Identity,

    /// Where events for this session are enqueued
    pub mailbox: Mailbox,
}

/// Requests carried on the broadcast channel.
#[derive(Debug)]
pub enum BroadcastRequest {
    /// Enqueue an event on every member's mailbox.
    All {
        /// Event to fan out (shared, not cloned per member)
        event: Arc<SocketEvent>,
    },

    /// Enqueue an event on one member's mailbox.
    ///
    /// Unknown session IDs are ignored.
    To {
        /// Target session
        session_id: SessionId,
        /// Event to deliver
        event: Arc<SocketEvent>,
    },

    /// Run a hub event through the dispatcher inside the coordinator.
    Dispatch {
        /// Event to interpret
        event: HubEvent,
    },
}

/// Read-only queries answered by the coordinator.
#[derive(Debug)]
pub enum PoolQuery {
    /// Snapshot of every active session as a roster.
    Roster {
        /// Channel to send the result
        respond_to: oneshot::Sender<Vec<UserEntry>>,
    },

    /// Number of active sessions.
    MemberCount {
        /// Channel to send the result
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The coordinator has shut down and no longer accepts requests.
    #[error("pool coordinator is not running")]
    ChannelClosed,
}

// ============================================================================
// Removal Reasons
// ============================================================================

/// Reason why a session left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The session's inbound pump requested unregistration.
    Unregistered,

    /// The mailbox was full during fan-out.
    SlowConsumer,

    /// The mailbox receiver was already gone (outbound pump exited).
    MailboxClosed,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::SlowConsumer => write!(f, "mailbox full (slow consumer)"),
            Self::MailboxClosed => write!(f, "mailbox closed"),
        }
    }
}
