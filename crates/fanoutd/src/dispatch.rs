//! Event dispatcher.
//!
//! Translates hub events into actions the pool coordinator applies to the
//! active set. The dispatcher runs inside the coordinator task, so the roster
//! it sees always reflects the membership change that triggered the event.
//!
//! | Event        | Action                                              |
//! |--------------|-----------------------------------------------------|
//! | `Join`       | broadcast `join` with the full roster               |
//! | `Disconnect` | broadcast `disconnect` with the remaining roster    |
//! | `Message`    | whatever the installed [`MessageHandler`] returns   |
//! | `Unknown`    | logged and dropped                                  |

use fanout_core::{Identity, SessionId};
use fanout_protocol::{InboundMessage, SocketEvent, UserEntry};
use tracing::{debug, warn};

/// Something that happened in the hub and may need to reach clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A session was added to the active set.
    Join { subject: SessionId },

    /// A session was removed from the active set.
    Disconnect { subject: SessionId },

    /// A session sent a message.
    Message {
        origin: Identity,
        message: InboundMessage,
    },

    /// An event this hub has no handler for.
    Unknown { event_name: String },
}

impl HubEvent {
    /// Event name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Join { .. } => "join",
            Self::Disconnect { .. } => "disconnect",
            Self::Message { .. } => "message",
            Self::Unknown { event_name } => event_name,
        }
    }
}

/// What the coordinator should do in response to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Enqueue on every member's mailbox.
    Broadcast(SocketEvent),

    /// Enqueue on one member's mailbox.
    EmitTo {
        session_id: SessionId,
        event: SocketEvent,
    },
}

// ============================================================================
// Message Handlers
// ============================================================================

/// Decides what happens to messages sent by clients.
pub trait MessageHandler: Send + 'static {
    /// Returns the action for one inbound message, or `None` to drop it.
    fn on_message(&self, origin: &Identity, message: InboundMessage) -> Option<Action>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Identity, InboundMessage) -> Option<Action> + Send + 'static,
{
    fn on_message(&self, origin: &Identity, message: InboundMessage) -> Option<Action> {
        self(origin, message)
    }
}

/// Relays every inbound message to all sessions as a `message` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayMessages;

impl MessageHandler for RelayMessages {
    fn on_message(&self, _origin: &Identity, message: InboundMessage) -> Option<Action> {
        Some(Action::Broadcast(SocketEvent::message(message)))
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Maps hub events to actions.
pub struct Dispatcher {
    handler: Box<dyn MessageHandler>,
}

impl Dispatcher {
    /// Dispatcher that relays client messages to everyone.
    pub fn new() -> Self {
        Self::with_handler(RelayMessages)
    }

    /// Dispatcher with a custom message handler.
    pub fn with_handler(handler: impl MessageHandler) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Interprets one event.
    ///
    /// `roster` is only called for membership events.
    pub fn dispatch<R>(&self, event: HubEvent, roster: R) -> Option<Action>
    where
        R: FnOnce() -> Vec<UserEntry>,
    {
        match event {
            HubEvent::Join { subject } => {
                let users = roster();
                debug!(session_id = %subject, users = users.len(), "Join event triggered");
                Some(Action::Broadcast(SocketEvent::join(subject, users)))
            }
            HubEvent::Disconnect { subject } => {
                let users = roster();
                debug!(session_id = %subject, users = users.len(), "Disconnect event triggered");
                Some(Action::Broadcast(SocketEvent::disconnect(subject, users)))
            }
            HubEvent::Message { origin, message } => {
                debug!(
                    session_id = %origin.id,
                    username = %origin.display_name,
                    kind = ?message.kind,
                    "Message event triggered"
                );
                self.handler.on_message(&origin, message)
            }
            HubEvent::Unknown { event_name } => {
                warn!(event_name = %event_name, "No handler for event, dropping");
                None
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
