//! Session identity value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a connected session.
///
/// Wraps a UUID v4 string (e.g., "8e11bfb5-7dc2-432b-9206-928fa5c35731").
/// Generated once when the connection upgrade succeeds and never changes.
/// Serialized as a bare string so it can appear directly in `userID` fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh, globally unique session ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier.
    ///
    /// Note: This does not validate UUID format. Used for lookups
    /// and for identifiers read back from the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Who a session is: its ID and the display name chosen at connect time.
///
/// Both fields are fixed for the lifetime of the session; there is no
/// rename operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Unique session ID
    pub id: SessionId,

    /// Display name supplied by the client (may be empty)
    pub display_name: String,

    /// When the session was created
    pub connected_at: DateTime<Utc>,
}

impl Identity {
    /// Creates an identity with a freshly generated session ID.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self::with_id(SessionId::generate(), display_name)
    }

    /// Creates an identity with a caller-chosen session ID.
    pub fn with_id(id: SessionId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            connected_at: Utc::now(),
        }
    }

    /// Seconds elapsed since the session connected.
    pub fn connected_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.connected_at)
            .num_seconds()
            .max(0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<SessionId> = (0..100).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_generated_id_is_uuid() {
        let id = SessionId::generate();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("8e11bfb5-7dc2-432b-9206-928fa5c35731");
        assert_eq!(id.short(), "8e11bfb5");

        let tiny = SessionId::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_session_id_serializes_as_string() {
        let id = SessionId::new("user-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user-1\"");
    }

    #[test]
    fn test_identity_new_generates_id() {
        let a = Identity::new("alice");
        let b = Identity::new("alice");
        assert_eq!(a.display_name, "alice");
        assert_ne!(a.id, b.id);
        assert!(a.connected_secs() >= 0);
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity::with_id(SessionId::new("0123456789"), "bob");
        assert_eq!(identity.to_string(), "bob (01234567)");
    }
}
