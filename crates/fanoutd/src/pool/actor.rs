//! Pool actor - owns the active set and processes membership and fan-out.
//!
//! The PoolActor is the single owner of the active set. It receives requests
//! on four channels and never blocks on a session: every mailbox write is a
//! `try_send`, and a session whose mailbox is full is evicted on the spot.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Mailbox and response send failures are handled, never propagated

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use fanout_core::{Identity, SessionId};
use fanout_protocol::{SocketEvent, UserEntry};

use super::commands::{BroadcastRequest, Mailbox, PoolQuery, Registration, RemovalReason};
use crate::dispatch::{Action, Dispatcher, HubEvent};

/// One entry in the active set.
#[derive(Debug)]
struct Member {
    identity: Identity,
    mailbox: Mailbox,
}

/// Sessions whose mailbox rejected a delivery.
type Rejected = Vec<(SessionId, RemovalReason)>;

// ============================================================================
// Pool Actor
// ============================================================================

/// The pool actor - owns the active set.
///
/// # Ownership
///
/// The actor owns:
/// - `members`: the active set, keyed by session ID
/// - every member's mailbox sender; removing a member drops it, which
///   closes that session's mailbox
///
/// # Ordering
///
/// Channels are polled in a fixed priority: register, broadcast, unregister,
/// queries. A registration queued before a broadcast is always applied
/// first, so a newly registered session sees every later broadcast. A
/// session dispatches its messages before it unregisters, so its last
/// message is relayed before its disconnect is announced.
pub struct PoolActor {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<SessionId>,
    broadcast_rx: mpsc::Receiver<BroadcastRequest>,
    query_rx: mpsc::Receiver<PoolQuery>,

    members: HashMap<SessionId, Member>,

    dispatcher: Dispatcher,
}

impl PoolActor {
    /// Creates a new pool actor.
    pub fn new(
        register_rx: mpsc::Receiver<Registration>,
        unregister_rx: mpsc::Receiver<SessionId>,
        broadcast_rx: mpsc::Receiver<BroadcastRequest>,
        query_rx: mpsc::Receiver<PoolQuery>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            register_rx,
            unregister_rx,
            broadcast_rx,
            query_rx,
            members: HashMap::new(),
            dispatcher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes requests until every channel is closed (all handles dropped).
    pub async fn run(mut self) {
        info!("Pool coordinator starting");

        loop {
            tokio::select! {
                biased;

                Some(registration) = self.register_rx.recv() => {
                    self.handle_register(registration);
                }
                Some(request) = self.broadcast_rx.recv() => {
                    self.handle_broadcast(request);
                }
                Some(session_id) = self.unregister_rx.recv() => {
                    self.handle_unregister(&session_id);
                }
                Some(query) = self.query_rx.recv() => {
                    self.handle_query(query);
                }
                else => break,
            }
        }

        info!(members = self.members.len(), "Pool coordinator stopped");
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    fn handle_register(&mut self, registration: Registration) {
        let Registration { identity, mailbox } = registration;

        if self.members.contains_key(&identity.id) {
            // Dropping the rejected mailbox closes it, so the duplicate's
            // outbound pump shuts its connection down.
            warn!(
                session_id = %identity.id,
                username = %identity.display_name,
                "Duplicate registration rejected"
            );
            return;
        }

        let session_id = identity.id.clone();
        info!(
            session_id = %session_id,
            username = %identity.display_name,
            members = self.members.len() + 1,
            "Session registered"
        );
        self.members.insert(session_id.clone(), Member { identity, mailbox });

        self.dispatch(HubEvent::Join { subject: session_id });
    }

    fn handle_unregister(&mut self, session_id: &SessionId) {
        if self.remove(session_id, RemovalReason::Unregistered) {
            self.dispatch(HubEvent::Disconnect {
                subject: session_id.clone(),
            });
        } else {
            debug!(session_id = %session_id, "Unregister for non-member ignored");
        }
    }

    fn handle_broadcast(&mut self, request: BroadcastRequest) {
        match request {
            BroadcastRequest::All { event } => {
                let rejected = self.fan_out(&event);
                self.evict(rejected);
            }
            BroadcastRequest::To { session_id, event } => {
                let rejected = self.deliver_to(&session_id, &event);
                self.evict(rejected);
            }
            BroadcastRequest::Dispatch { event } => self.dispatch(event),
        }
    }

    fn handle_query(&self, query: PoolQuery) {
        match query {
            PoolQuery::Roster { respond_to } => {
                let _ = respond_to.send(self.roster());
            }
            PoolQuery::MemberCount { respond_to } => {
                let _ = respond_to.send(self.members.len());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------------

    fn dispatch(&mut self, event: HubEvent) {
        let name = event.name().to_string();
        let action = self.dispatcher.dispatch(event, || self.roster());

        let rejected = match action {
            Some(Action::Broadcast(event)) => self.fan_out(&Arc::new(event)),
            Some(Action::EmitTo { session_id, event }) => {
                self.deliver_to(&session_id, &Arc::new(event))
            }
            None => {
                trace!(event = %name, "Event produced no action");
                return;
            }
        };
        self.evict(rejected);
    }

    /// Offers the event to every member exactly once.
    fn fan_out(&self, event: &Arc<SocketEvent>) -> Rejected {
        let mut rejected = Vec::new();
        for (session_id, member) in &self.members {
            if let Err(reason) = offer(member, event) {
                rejected.push((session_id.clone(), reason));
            }
        }

        debug!(
            event = %event.event_name,
            delivered = self.members.len() - rejected.len(),
            rejected = rejected.len(),
            "Broadcast event"
        );
        rejected
    }

    fn deliver_to(&self, session_id: &SessionId, event: &Arc<SocketEvent>) -> Rejected {
        let Some(member) = self.members.get(session_id) else {
            debug!(session_id = %session_id, event = %event.event_name, "Emit target not active");
            return Vec::new();
        };

        match offer(member, event) {
            Ok(()) => Vec::new(),
            Err(reason) => vec![(session_id.clone(), reason)],
        }
    }

    /// Removes sessions whose mailbox rejected a delivery.
    ///
    /// Evictions are not announced: the evicted session's pumps tear the
    /// connection down and its later unregister finds nothing to remove.
    fn evict(&mut self, rejected: Rejected) {
        for (session_id, reason) in rejected {
            self.remove(&session_id, reason);
        }
    }

    /// Removes a member, dropping its mailbox sender. Returns whether it was present.
    fn remove(&mut self, session_id: &SessionId, reason: RemovalReason) -> bool {
        let Some(member) = self.members.remove(session_id) else {
            return false;
        };

        let connected_secs = member.identity.connected_secs();
        match reason {
            RemovalReason::Unregistered => info!(
                session_id = %session_id,
                username = %member.identity.display_name,
                connected_secs,
                members = self.members.len(),
                "Session unregistered"
            ),
            RemovalReason::SlowConsumer | RemovalReason::MailboxClosed => warn!(
                session_id = %session_id,
                username = %member.identity.display_name,
                reason = %reason,
                members = self.members.len(),
                "Session evicted"
            ),
        }
        true
    }

    fn roster(&self) -> Vec<UserEntry> {
        self.members
            .values()
            .map(|member| UserEntry::from(&member.identity))
            .collect()
    }
}

/// Non-blocking enqueue onto one mailbox.
fn offer(member: &Member, event: &Arc<SocketEvent>) -> Result<(), RemovalReason> {
    match member.mailbox.try_send(Arc::clone(event)) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(RemovalReason::SlowConsumer),
        Err(TrySendError::Closed(_)) => Err(RemovalReason::MailboxClosed),
    }
}
