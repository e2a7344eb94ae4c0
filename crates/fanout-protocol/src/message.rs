//! Outbound event envelope.
//!
//! Every frame the hub writes is one JSON object:
//!
//! ```json
//! {"eventName": "join", "eventPayload": {"userID": "...", "users": [...]}}
//! ```

use fanout_core::{Identity, SessionId};
use serde::{Deserialize, Serialize};

use crate::parse::{InboundMessage, ProtocolError};

/// Event announcing that a session joined.
pub const EVENT_JOIN: &str = "join";

/// Event announcing that a session left.
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Event relaying a raw inbound message.
pub const EVENT_MESSAGE: &str = "message";

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "userID")]
    pub user_id: SessionId,
    pub username: String,
}

impl From<&Identity> for UserEntry {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.id.clone(),
            username: identity.display_name.clone(),
        }
    }
}

/// Payload of `join` and `disconnect` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterPayload {
    /// The session that joined or left
    #[serde(rename = "userID")]
    pub user_id: SessionId,

    /// Every session active after the change, in no particular order
    pub users: Vec<UserEntry>,
}

/// Event payload variants.
///
/// Untagged on the wire; the event name says which shape to expect.
/// `Raw` carries anything an application-level handler chooses to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Roster(RosterPayload),
    Message(InboundMessage),
    Raw(serde_json::Value),
}

/// The envelope written to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketEvent {
    #[serde(rename = "eventName")]
    pub event_name: String,

    #[serde(rename = "eventPayload")]
    pub event_payload: EventPayload,
}

impl SocketEvent {
    /// Creates an event with an arbitrary name and payload.
    pub fn new(event_name: impl Into<String>, event_payload: EventPayload) -> Self {
        Self {
            event_name: event_name.into(),
            event_payload,
        }
    }

    /// Creates a `join` event.
    pub fn join(user_id: SessionId, users: Vec<UserEntry>) -> Self {
        Self::new(
            EVENT_JOIN,
            EventPayload::Roster(RosterPayload { user_id, users }),
        )
    }

    /// Creates a `disconnect` event.
    pub fn disconnect(user_id: SessionId, users: Vec<UserEntry>) -> Self {
        Self::new(
            EVENT_DISCONNECT,
            EventPayload::Roster(RosterPayload { user_id, users }),
        )
    }

    /// Creates a `message` event relaying a raw inbound message.
    pub fn message(message: InboundMessage) -> Self {
        Self::new(EVENT_MESSAGE, EventPayload::Message(message))
    }

    /// Returns the roster payload, if this event carries one.
    pub fn roster(&self) -> Option<&RosterPayload> {
        match &self.event_payload {
            EventPayload::Roster(roster) => Some(roster),
            _ => None,
        }
    }

    /// Serializes the envelope to JSON text.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::encode)
    }

    /// Parses an envelope from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::decode)
    }
}
