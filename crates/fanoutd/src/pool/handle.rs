//! Client interface for interacting with the PoolActor.
//!
//! The `PoolHandle` provides a cheap-to-clone interface for sending requests
//! to the pool coordinator. Sessions, the HTTP server, and application code
//! all talk to the active set exclusively through it.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `PoolError::ChannelClosed`

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use fanout_core::{Identity, SessionId};
use fanout_protocol::{SocketEvent, UserEntry};

use super::commands::{BroadcastRequest, Mailbox, PoolError, PoolQuery, Registration};
use crate::dispatch::HubEvent;

// ============================================================================
// Pool Handle
// ============================================================================

/// Handle for interacting with the pool coordinator.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// The coordinator stops once every handle has been dropped.
///
/// # Usage
///
/// ```ignore
/// let pool = spawn_pool(PoolConfig::default());
///
/// let (mailbox, mut events) = tokio::sync::mpsc::channel(16);
/// pool.register(Identity::new("alice"), mailbox).await?;
///
/// // First event is the join announcement
/// let join = events.recv().await;
/// ```
#[derive(Clone)]
pub struct PoolHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<SessionId>,
    broadcast_tx: mpsc::Sender<BroadcastRequest>,
    query_tx: mpsc::Sender<PoolQuery>,
}

impl PoolHandle {
    /// Create a new pool handle from the coordinator's request channels.
    pub fn new(
        register_tx: mpsc::Sender<Registration>,
        unregister_tx: mpsc::Sender<SessionId>,
        broadcast_tx: mpsc::Sender<BroadcastRequest>,
        query_tx: mpsc::Sender<PoolQuery>,
    ) -> Self {
        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            query_tx,
        }
    }

    /// Request that a session join the active set.
    ///
    /// Returns once the request is queued; the coordinator announces the
    /// join to every member, including the new one.
    ///
    /// # Errors
    ///
    /// - `PoolError::ChannelClosed` if the coordinator has shut down
    pub async fn register(&self, identity: Identity, mailbox: Mailbox) -> Result<(), PoolError> {
        self.register_tx
            .send(Registration { identity, mailbox })
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }

    /// Request that a session leave the active set.
    ///
    /// Unregistering a session that is not a member is a no-op.
    ///
    /// # Errors
    ///
    /// - `PoolError::ChannelClosed` if the coordinator has shut down
    pub async fn unregister(&self, session_id: SessionId) -> Result<(), PoolError> {
        self.unregister_tx
            .send(session_id)
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }

    /// Fan an event out to every active session.
    ///
    /// # Errors
    ///
    /// - `PoolError::ChannelClosed` if the coordinator has shut down
    pub async fn broadcast(&self, event: SocketEvent) -> Result<(), PoolError> {
        self.send_broadcast(BroadcastRequest::All {
            event: Arc::new(event),
        })
        .await
    }

    /// Deliver an event to a single session, if it is active.
    ///
    /// # Errors
    ///
    /// - `PoolError::ChannelClosed` if the coordinator has shut down
    pub async fn emit_to(&self, session_id: SessionId, event: SocketEvent) -> Result<(), PoolError> {
        self.send_broadcast(BroadcastRequest::To {
            session_id,
            event: Arc::new(event),
        })
        .await
    }

    /// Hand a hub event to the dispatcher running inside the coordinator.
    ///
    /// # Errors
    ///
    /// - `PoolError::ChannelClosed` if the coordinator has shut down
    pub async fn dispatch(&self, event: HubEvent) -> Result<(), PoolError> {
        self.send_broadcast(BroadcastRequest::Dispatch { event }).await
    }

    /// Snapshot of the active sessions.
    ///
    /// Returns an empty vector if communication with the coordinator fails.
    pub async fn roster(&self) -> Vec<UserEntry> {
        let (tx, rx) = oneshot::channel();

        if self
            .query_tx
            .send(PoolQuery::Roster { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Number of active sessions.
    ///
    /// Returns 0 if communication with the coordinator fails.
    pub async fn member_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .query_tx
            .send(PoolQuery::MemberCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    /// Check if the coordinator is still running.
    pub fn is_connected(&self) -> bool {
        !self.register_tx.is_closed()
    }

    async fn send_broadcast(&self, request: BroadcastRequest) -> Result<(), PoolError> {
        self.broadcast_tx
            .send(request)
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_protocol::{EVENT_JOIN, EVENT_MESSAGE};

    struct Receivers {
        register: mpsc::Receiver<Registration>,
        unregister: mpsc::Receiver<SessionId>,
        broadcast: mpsc::Receiver<BroadcastRequest>,
        query: mpsc::Receiver<PoolQuery>,
    }

    fn create_test_handle() -> (PoolHandle, Receivers) {
        let (register_tx, register) = mpsc::channel(16);
        let (unregister_tx, unregister) = mpsc::channel(16);
        let (broadcast_tx, broadcast) = mpsc::channel(16);
        let (query_tx, query) = mpsc::channel(16);
        let handle = PoolHandle::new(register_tx, unregister_tx, broadcast_tx, query_tx);
        (
            handle,
            Receivers {
                register,
                unregister,
                broadcast,
                query,
            },
        )
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_register_sends_request() {
        let (handle, mut rx) = create_test_handle();
        let (mailbox, _events) = mpsc::channel(1);

        handle.register(Identity::new("alice"), mailbox).await.unwrap();

        let registration = rx.register.recv().await.unwrap();
        assert_eq!(registration.identity.display_name, "alice");
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let (mailbox, _events) = mpsc::channel(1);
        let result = handle.register(Identity::new("alice"), mailbox).await;
        assert_eq!(result, Err(PoolError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_unregister_sends_session_id() {
        let (handle, mut rx) = create_test_handle();

        handle.unregister(SessionId::new("s-1")).await.unwrap();
        assert_eq!(rx.unregister.recv().await, Some(SessionId::new("s-1")));
    }

    #[tokio::test]
    async fn test_broadcast_emit_and_dispatch_share_channel() {
        let (handle, mut rx) = create_test_handle();

        handle
            .broadcast(SocketEvent::join(SessionId::new("a"), Vec::new()))
            .await
            .unwrap();
        handle
            .emit_to(
                SessionId::new("b"),
                SocketEvent::message(fanout_protocol::InboundMessage::text("hi")),
            )
            .await
            .unwrap();
        handle
            .dispatch(HubEvent::Unknown {
                event_name: "wordsubmission".into(),
            })
            .await
            .unwrap();

        match rx.broadcast.recv().await.unwrap() {
            BroadcastRequest::All { event } => assert_eq!(event.event_name, EVENT_JOIN),
            other => panic!("expected All, got {other:?}"),
        }
        match rx.broadcast.recv().await.unwrap() {
            BroadcastRequest::To { session_id, event } => {
                assert_eq!(session_id.as_str(), "b");
                assert_eq!(event.event_name, EVENT_MESSAGE);
            }
            other => panic!("expected To, got {other:?}"),
        }
        assert!(matches!(
            rx.broadcast.recv().await.unwrap(),
            BroadcastRequest::Dispatch { .. }
        ));
    }

    #[tokio::test]
    async fn test_queries_default_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.roster().await.is_empty());
        assert_eq!(handle.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_member_count_roundtrip() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            if let Some(PoolQuery::MemberCount { respond_to }) = rx.query.recv().await {
                let _ = respond_to.send(2);
            }
        });

        assert_eq!(handle.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();
        assert!(handle.is_connected());

        drop(rx);
        assert!(!handle.is_connected());
    }
}
