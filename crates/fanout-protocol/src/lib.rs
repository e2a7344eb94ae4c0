//! fanout protocol - Wire format for hub events
//!
//! This crate provides the outbound event envelope sent to every connected
//! client and the decoding of raw inbound frames into domain messages.

pub mod message;
pub mod parse;

pub use message::{
    EventPayload, RosterPayload, SocketEvent, UserEntry, EVENT_DISCONNECT, EVENT_JOIN,
    EVENT_MESSAGE,
};
pub use parse::{InboundMessage, MessageKind, ProtocolError};
