//! Connection halves over an opaque duplex transport.
//!
//! The transport is any `Stream` of inbound frames paired with a `Sink` of
//! outbound frames. [`split`] wraps them into a [`ConnectionReader`] owned by
//! the inbound pump and a [`ConnectionWriter`] owned by the outbound pump.
//! Both halves share one close state, so closing from either side is
//! idempotent and wakes a reader blocked in [`ConnectionReader::receive`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport errors are mapped to `ConnectionError`

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{error::Elapsed, timeout};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};

/// Transport-neutral message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload size in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data.len(),
            Self::Close => 0,
        }
    }
}

/// Deadlines and limits for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum idle time between received frames (pongs included)
    pub read_timeout: Duration,

    /// Maximum time a single write or flush may take
    pub write_timeout: Duration,

    /// Largest accepted inbound data frame, in bytes
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Close state shared by both halves.
#[derive(Debug, Clone, Default)]
struct CloseState {
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CloseState {
    /// Marks the connection closed. Returns `true` only for the first call.
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.token.cancel();
        }
        first
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Splits a transport into reader and writer halves.
pub fn split<S, K>(
    stream: S,
    sink: K,
    config: ConnectionConfig,
) -> (ConnectionReader<S>, ConnectionWriter<K>) {
    let state = CloseState::default();

    let reader = ConnectionReader {
        stream,
        state: state.clone(),
        read_timeout: config.read_timeout,
        max_message_size: config.max_message_size,
    };

    let writer = ConnectionWriter {
        sink,
        state,
        write_timeout: config.write_timeout,
        sink_closed: false,
    };

    (reader, writer)
}

// ============================================================================
// Reader
// ============================================================================

/// Receiving half of a connection.
pub struct ConnectionReader<S> {
    stream: S,
    state: CloseState,
    read_timeout: Duration,
    max_message_size: usize,
}

impl<S, E> ConnectionReader<S>
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    /// Waits for the next data frame (text or binary).
    ///
    /// Ping and pong frames are consumed here; each one counts as activity
    /// and restarts the read deadline.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Closed` if the peer closed, the stream ended, or
    ///   either half called `close`
    /// - `ConnectionError::ReadTimeout` if nothing arrived within the deadline
    /// - `ConnectionError::MessageTooLarge` if a data frame exceeds the limit
    /// - `ConnectionError::Transport` on transport failure
    pub async fn receive(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            if self.state.is_closed() {
                return Err(ConnectionError::Closed);
            }

            let next = tokio::select! {
                biased;
                _ = self.state.token.cancelled() => return Err(ConnectionError::Closed),
                next = timeout(self.read_timeout, self.stream.next()) => next,
            };

            let frame = match next {
                Err(_) => return Err(ConnectionError::ReadTimeout),
                Ok(None) => return Err(ConnectionError::Closed),
                Ok(Some(Err(e))) => return Err(ConnectionError::Transport(e.to_string())),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Frame::Ping(_) | Frame::Pong(_) => {
                    trace!("Control frame received, read deadline refreshed");
                }
                Frame::Close => return Err(ConnectionError::Closed),
                data => {
                    let size = data.payload_len();
                    if size > self.max_message_size {
                        return Err(ConnectionError::MessageTooLarge {
                            size,
                            max: self.max_message_size,
                        });
                    }
                    return Ok(data);
                }
            }
        }
    }
}

impl<S> ConnectionReader<S> {
    /// Closes the connection. Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        self.state.close()
    }

    /// Whether either half has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Sending half of a connection.
pub struct ConnectionWriter<K> {
    sink: K,
    state: CloseState,
    write_timeout: Duration,
    sink_closed: bool,
}

impl<K> ConnectionWriter<K>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    /// Writes and flushes one frame within the write deadline.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Closed` if the connection was closed
    /// - `ConnectionError::WriteTimeout` if the deadline expired
    /// - `ConnectionError::Transport` on sink failure
    pub async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        deadline_result(timeout(self.write_timeout, self.sink.send(frame)).await)
    }

    /// Buffers one frame without flushing. Pair with [`Self::flush`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub async fn feed(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        deadline_result(timeout(self.write_timeout, self.sink.feed(frame)).await)
    }

    /// Flushes frames buffered by [`Self::feed`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        deadline_result(timeout(self.write_timeout, self.sink.flush()).await)
    }

    /// Writes a Close frame to the peer.
    ///
    /// Unlike [`Self::send`] this still works after the reader half closed
    /// the connection; it only fails once the sink itself has been closed.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Closed` if the sink was already closed
    /// - `ConnectionError::WriteTimeout` if the deadline expired
    /// - `ConnectionError::Transport` on sink failure
    pub async fn send_close(&mut self) -> Result<(), ConnectionError> {
        if self.sink_closed {
            return Err(ConnectionError::Closed);
        }
        deadline_result(timeout(self.write_timeout, self.sink.send(Frame::Close)).await)
    }

    /// Closes the connection and the underlying sink.
    ///
    /// The sink is closed at most once no matter how often this is called.
    /// Returns `true` if this call transitioned the connection to closed.
    pub async fn close(&mut self) -> bool {
        let first = self.state.close();
        if !self.sink_closed {
            self.sink_closed = true;
            if let Ok(Err(e)) = timeout(self.write_timeout, self.sink.close()).await {
                trace!(error = %e, "Sink close failed");
            }
        }
        first
    }
}

impl<K> ConnectionWriter<K> {
    /// Whether either half has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.state.is_closed() {
            Err(ConnectionError::Closed)
        } else {
            Ok(())
        }
    }
}

fn deadline_result<E: Display>(
    result: Result<Result<(), E>, Elapsed>,
) -> Result<(), ConnectionError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur on a connection.
///
/// All of them are terminal for the pump that sees them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("Read timeout")]
    ReadTimeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Transport error: {0}")]
    Transport(String),
}
