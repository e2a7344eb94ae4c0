//! fanout core - Shared types for the fanout hub
//!
//! This crate provides the domain types shared between
//! the wire protocol (`fanout-protocol`) and the hub daemon (`fanoutd`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod session;

// Re-exports for convenience
pub use session::{Identity, SessionId};
