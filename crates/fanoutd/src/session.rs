//! Per-connection session pumps.
//!
//! Every connected client runs two tasks:
//!
//! ```text
//!   connection ──▶ inbound pump ──dispatch──▶ PoolHandle
//!                                               │
//!   connection ◀── outbound pump ◀── mailbox ◀──┘
//! ```
//!
//! The inbound pump owns the [`ConnectionReader`] and turns frames into
//! `HubEvent::Message`s. The outbound pump owns the [`ConnectionWriter`] and
//! the mailbox receiver, coalescing whatever is queued into one flush and
//! sending keepalive pings. Either pump ending closes the shared connection,
//! which ends the other one.
//!
//! # Teardown
//!
//! - Read error or close: inbound pump unregisters, closes the reader.
//!   The coordinator drops the mailbox, the outbound pump sends a Close
//!   frame and exits.
//! - Write error: outbound pump closes the writer, which wakes the inbound
//!   pump with `Closed` and it unregisters.
//! - Eviction: the mailbox closes first, then the same path as above.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use fanout_core::{Identity, SessionId};
use fanout_protocol::{InboundMessage, ProtocolError, SocketEvent};

use crate::config::{keepalive_period, HubConfig, DEFAULT_MAILBOX_CAPACITY, DEFAULT_READ_TIMEOUT};
use crate::dispatch::HubEvent;
use crate::pool::{MailboxReceiver, PoolError, PoolHandle};
use crate::server::{ConnectionError, ConnectionReader, ConnectionWriter, Frame};

/// Per-session tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of the outbound mailbox
    pub mailbox_capacity: usize,

    /// Interval between keepalive pings
    pub keepalive: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            keepalive: keepalive_period(DEFAULT_READ_TIMEOUT),
        }
    }
}

impl From<&HubConfig> for SessionConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            keepalive: config.keepalive_period(),
        }
    }
}

/// Join handles for a session's two pumps.
#[derive(Debug)]
pub struct SessionTasks {
    /// Session the pumps belong to
    pub session_id: SessionId,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl SessionTasks {
    /// Waits for both pumps to finish.
    pub async fn join(self) {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        if let Err(e) = inbound {
            warn!(session_id = %self.session_id, error = %e, "Inbound pump task failed");
        }
        if let Err(e) = outbound {
            warn!(session_id = %self.session_id, error = %e, "Outbound pump task failed");
        }
    }
}

/// Registers a session and starts its pumps.
///
/// The registration is queued before either pump starts, so an unregister
/// from the inbound pump can never overtake it.
///
/// # Errors
///
/// - `PoolError::ChannelClosed` if the coordinator has shut down; the
///   connection is closed before returning
pub async fn spawn_session<S, E, K>(
    identity: Identity,
    reader: ConnectionReader<S>,
    mut writer: ConnectionWriter<K>,
    pool: PoolHandle,
    config: SessionConfig,
) -> Result<SessionTasks, PoolError>
where
    S: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    K: Sink<Frame> + Unpin + Send + 'static,
    K::Error: Display + Send,
{
    let (mailbox, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));

    if let Err(e) = pool.register(identity.clone(), mailbox).await {
        warn!(session_id = %identity.id, error = %e, "Registration failed, closing connection");
        writer.close().await;
        return Err(e);
    }

    info!(
        session_id = %identity.id,
        username = %identity.display_name,
        "Session started"
    );

    let outbound = tokio::spawn(run_outbound(
        identity.clone(),
        writer,
        mailbox_rx,
        config.keepalive,
    ));
    let session_id = identity.id.clone();
    let inbound = tokio::spawn(run_inbound(identity, reader, pool));

    Ok(SessionTasks {
        session_id,
        inbound,
        outbound,
    })
}

// ============================================================================
// Inbound Pump
// ============================================================================

async fn run_inbound<S, E>(identity: Identity, mut reader: ConnectionReader<S>, pool: PoolHandle)
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = match reader.receive().await {
            Ok(frame) => frame,
            Err(ConnectionError::Closed) => {
                debug!(session_id = %identity.id, "Connection closed");
                break;
            }
            Err(e) => {
                info!(session_id = %identity.id, error = %e, "Read failed, ending session");
                break;
            }
        };

        let message = match decode(frame) {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(session_id = %identity.id, error = %e, "Dropping undecodable message");
                continue;
            }
            None => continue,
        };

        debug!(
            session_id = %identity.id,
            username = %identity.display_name,
            body = %message.body,
            "Message received"
        );

        let event = HubEvent::Message {
            origin: identity.clone(),
            message,
        };
        if pool.dispatch(event).await.is_err() {
            warn!(session_id = %identity.id, "Pool stopped, ending session");
            break;
        }
    }

    if let Err(e) = pool.unregister(identity.id.clone()).await {
        debug!(session_id = %identity.id, error = %e, "Unregister skipped");
    }
    reader.close();

    debug!(session_id = %identity.id, "Inbound pump stopped");
}

/// Converts a data frame to a domain message. Control frames yield `None`.
fn decode(frame: Frame) -> Option<Result<InboundMessage, ProtocolError>> {
    match frame {
        Frame::Text(text) => Some(Ok(InboundMessage::text(text))),
        Frame::Binary(data) => Some(InboundMessage::binary(data)),
        Frame::Ping(_) | Frame::Pong(_) | Frame::Close => None,
    }
}

// ============================================================================
// Outbound Pump
// ============================================================================

async fn run_outbound<K>(
    identity: Identity,
    mut writer: ConnectionWriter<K>,
    mut mailbox: MailboxReceiver,
    keepalive: Duration,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = mailbox.recv() => {
                let Some(event) = event else {
                    debug!(session_id = %identity.id, "Mailbox closed, sending close frame");
                    if let Err(e) = writer.send_close().await {
                        trace!(session_id = %identity.id, error = %e, "Close frame not sent");
                    }
                    break;
                };

                match write_batch(&mut writer, &mut mailbox, event).await {
                    Ok(written) => trace!(session_id = %identity.id, written, "Flushed events"),
                    Err(e) => {
                        debug!(session_id = %identity.id, error = %e, "Write failed, ending session");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = writer.send(Frame::Ping(Vec::new())).await {
                    debug!(session_id = %identity.id, error = %e, "Keepalive failed, ending session");
                    break;
                }
                trace!(session_id = %identity.id, "Keepalive ping sent");
            }
        }
    }

    writer.close().await;
    debug!(session_id = %identity.id, "Outbound pump stopped");
}

/// Writes `first` plus everything queued behind it, then flushes once.
///
/// Only the events already queued when `first` arrived are taken, so a
/// steady stream of new events cannot starve the flush.
async fn write_batch<K>(
    writer: &mut ConnectionWriter<K>,
    mailbox: &mut MailboxReceiver,
    first: Arc<SocketEvent>,
) -> Result<usize, ConnectionError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut written = usize::from(feed_event(writer, &first).await?);

    for _ in 0..mailbox.len() {
        let Ok(event) = mailbox.try_recv() else {
            break;
        };
        written += usize::from(feed_event(writer, &event).await?);
    }

    writer.flush().await?;
    Ok(written)
}

/// Buffers one event as a text frame. Returns `false` if it could not be encoded.
async fn feed_event<K>(
    writer: &mut ConnectionWriter<K>,
    event: &SocketEvent,
) -> Result<bool, ConnectionError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match event.to_json() {
        Ok(json) => {
            writer.feed(Frame::Text(json)).await?;
            Ok(true)
        }
        Err(e) => {
            warn!(event = %event.event_name, error = %e, "Dropping unencodable event");
            Ok(false)
        }
    }
}
