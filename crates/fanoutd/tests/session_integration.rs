//! Integration tests for session pumps over an in-memory transport.
//!
//! Each session reads from a `futures` channel and writes into a recording
//! sink, so tests can inject transport failures and inspect exactly what
//! reached the wire, including how often the sink was closed.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::mpsc as transport;
use futures::Sink;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use fanout_core::{Identity, SessionId};
use fanout_protocol::{InboundMessage, SocketEvent, EVENT_DISCONNECT, EVENT_JOIN, EVENT_MESSAGE};
use fanoutd::pool::{spawn_pool, PoolConfig, PoolError, PoolHandle};
use fanoutd::server::{split, ConnectionConfig, Frame};
use fanoutd::session::{spawn_session, SessionConfig, SessionTasks};

// ============================================================================
// Test Helpers
// ============================================================================

/// Sink that records frames and counts closes.
#[derive(Clone, Default)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<Frame>>>,
    closes: Arc<AtomicUsize>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<SocketEvent> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(json) => Some(SocketEvent::from_json(&json).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Sink<Frame> for RecordingSink {
    type Error = Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.frames.lock().unwrap().push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Sink whose every write fails, as if the peer vanished.
struct BrokenSink;

impl Sink<Frame> for BrokenSink {
    type Error = String;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err("broken pipe".to_string()))
    }

    fn start_send(self: Pin<&mut Self>, _item: Frame) -> Result<(), Self::Error> {
        Err("broken pipe".to_string())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err("broken pipe".to_string()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink that never accepts a frame, as if the peer stopped reading.
#[derive(Clone, Default)]
struct StalledSink {
    closes: Arc<AtomicUsize>,
}

impl Sink<Frame> for StalledSink {
    type Error = Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Frame) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

type Inbound = transport::UnboundedSender<Result<Frame, String>>;

struct TestSession {
    identity: Identity,
    inbound: Inbound,
    outbound: RecordingSink,
    tasks: SessionTasks,
}

async fn connect(pool: &PoolHandle, name: &str, config: SessionConfig) -> TestSession {
    let identity = Identity::with_id(SessionId::new(format!("id-{name}")), name);
    let (inbound, stream) = transport::unbounded();
    let outbound = RecordingSink::default();

    let (reader, writer) = split(stream, outbound.clone(), ConnectionConfig::default());
    let tasks = spawn_session(identity.clone(), reader, writer, pool.clone(), config)
        .await
        .expect("pool is running");

    TestSession {
        identity,
        inbound,
        outbound,
        tasks,
    }
}

/// Polls until `check` passes, failing the test after one second.
async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let waited = timeout(Duration::from_secs(1), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

// ============================================================================
// Teardown Tests
// ============================================================================

#[tokio::test]
async fn test_receive_failure_tears_session_down() {
    let pool = spawn_pool(PoolConfig::default());
    let (observer_mailbox, mut observer) = mpsc::channel(16);
    pool.register(Identity::new("observer"), observer_mailbox)
        .await
        .unwrap();

    let alice = connect(&pool, "alice", SessionConfig::default()).await;
    let sink = alice.outbound.clone();
    wait_until("alice's join", || !sink.frames().is_empty()).await;

    alice
        .inbound
        .unbounded_send(Err("connection reset".into()))
        .unwrap();
    timeout(Duration::from_secs(1), alice.tasks.join())
        .await
        .expect("both pumps should stop");

    assert_eq!(pool.member_count().await, 1);

    let frames = alice.outbound.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], Frame::Close);
    assert_eq!(alice.outbound.closes(), 1, "sink closed exactly once");

    // observer: own join, alice's join, alice's disconnect
    let mut disconnects = 0;
    while let Ok(event) = observer.try_recv() {
        if event.event_name == EVENT_DISCONNECT {
            assert_eq!(event.roster().unwrap().user_id, alice.identity.id);
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_last_message_is_relayed_before_disconnect() {
    let pool = spawn_pool(PoolConfig::default());
    let (observer_mailbox, mut observer) = mpsc::channel(16);
    pool.register(Identity::new("observer"), observer_mailbox)
        .await
        .unwrap();

    let alice = connect(&pool, "alice", SessionConfig::default()).await;
    alice
        .inbound
        .unbounded_send(Ok(Frame::Text("bye".into())))
        .unwrap();
    alice
        .inbound
        .unbounded_send(Err("connection reset".into()))
        .unwrap();
    timeout(Duration::from_secs(1), alice.tasks.join())
        .await
        .expect("both pumps should stop");
    assert_eq!(pool.member_count().await, 1);

    let mut names = Vec::new();
    while let Ok(event) = observer.try_recv() {
        names.push(event.event_name.clone());
    }
    assert_eq!(
        names,
        [EVENT_JOIN, EVENT_JOIN, EVENT_MESSAGE, EVENT_DISCONNECT],
        "alice's message must precede her disconnect"
    );
}

#[tokio::test]
async fn test_evicted_session_is_torn_down_silently() {
    let pool = spawn_pool(PoolConfig::default());
    let (observer_mailbox, mut observer) = mpsc::channel(16);
    pool.register(Identity::new("observer"), observer_mailbox)
        .await
        .unwrap();

    let identity = Identity::with_id(SessionId::new("id-slow"), "slow");
    let (_inbound, stream) = transport::unbounded::<Result<Frame, String>>();
    let outbound = StalledSink::default();
    let connection = ConnectionConfig {
        write_timeout: Duration::from_millis(200),
        ..ConnectionConfig::default()
    };
    let (reader, writer) = split(stream, outbound.clone(), connection);
    let config = SessionConfig {
        mailbox_capacity: 2,
        ..SessionConfig::default()
    };
    let tasks = spawn_session(identity, reader, writer, pool.clone(), config)
        .await
        .unwrap();

    for n in 0..5 {
        pool.broadcast(SocketEvent::message(InboundMessage::text(format!("flood-{n}"))))
            .await
            .unwrap();
    }
    assert_eq!(pool.member_count().await, 1, "slow session evicted");

    // The pumps notice on their own: the writer hits its deadline, the
    // connection closes, and the late unregister finds nothing to remove.
    timeout(Duration::from_secs(2), tasks.join())
        .await
        .expect("both pumps should stop");
    assert_eq!(pool.member_count().await, 1);
    assert_eq!(outbound.closes.load(Ordering::SeqCst), 1);

    let mut disconnects = 0;
    while let Ok(event) = observer.try_recv() {
        if event.event_name == EVENT_DISCONNECT {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 0, "eviction is not announced");
}

#[tokio::test]
async fn test_peer_close_tears_session_down() {
    let pool = spawn_pool(PoolConfig::default());
    let alice = connect(&pool, "alice", SessionConfig::default()).await;

    drop(alice.inbound);
    timeout(Duration::from_secs(1), alice.tasks.join())
        .await
        .expect("both pumps should stop");

    assert_eq!(pool.member_count().await, 0);
    assert_eq!(alice.outbound.closes(), 1);
}

#[tokio::test]
async fn test_write_failure_stops_inbound_pump() {
    let pool = spawn_pool(PoolConfig::default());
    let identity = Identity::new("alice");
    let (inbound, stream) = transport::unbounded::<Result<Frame, String>>();

    let (reader, writer) = split(stream, BrokenSink, ConnectionConfig::default());
    let tasks = spawn_session(identity, reader, writer, pool.clone(), SessionConfig::default())
        .await
        .unwrap();

    // The join announcement fails to write; the inbound side must notice
    // even though its transport is still open.
    timeout(Duration::from_secs(1), tasks.join())
        .await
        .expect("both pumps should stop");
    assert_eq!(pool.member_count().await, 0);
    drop(inbound);
}

#[tokio::test]
async fn test_registration_failure_closes_connection() {
    // A handle whose coordinator is gone: every receiver already dropped.
    let (register_tx, _) = mpsc::channel(1);
    let (unregister_tx, _) = mpsc::channel(1);
    let (broadcast_tx, _) = mpsc::channel(1);
    let (query_tx, _) = mpsc::channel(1);
    let stopped = PoolHandle::new(register_tx, unregister_tx, broadcast_tx, query_tx);
    assert!(!stopped.is_connected());

    let (_inbound, stream) = transport::unbounded::<Result<Frame, String>>();
    let outbound = RecordingSink::default();
    let (reader, writer) = split(stream, outbound.clone(), ConnectionConfig::default());

    let result = spawn_session(
        Identity::new("late"),
        reader,
        writer,
        stopped,
        SessionConfig::default(),
    )
    .await;

    assert_eq!(result.err(), Some(PoolError::ChannelClosed));
    assert_eq!(outbound.closes(), 1);
    assert!(outbound.frames().is_empty());
}

// ============================================================================
// Traffic Tests
// ============================================================================

#[tokio::test]
async fn test_messages_are_relayed_between_sessions() {
    let pool = spawn_pool(PoolConfig::default());
    let alice = connect(&pool, "alice", SessionConfig::default()).await;
    let bob = connect(&pool, "bob", SessionConfig::default()).await;

    let bob_sink = bob.outbound.clone();
    wait_until("bob's join", || bob_sink.events().len() == 1).await;

    // Invalid UTF-8 is dropped; the session keeps going.
    alice
        .inbound
        .unbounded_send(Ok(Frame::Binary(vec![0xff, 0xfe])))
        .unwrap();
    alice
        .inbound
        .unbounded_send(Ok(Frame::Text("hello".into())))
        .unwrap();

    wait_until("relayed message", || bob_sink.events().len() == 2).await;

    let events = bob.outbound.events();
    assert_eq!(events[0].event_name, EVENT_JOIN);
    assert_eq!(events[1].event_name, EVENT_MESSAGE);
    assert_eq!(
        events[1].to_json().unwrap(),
        r#"{"eventName":"message","eventPayload":{"type":1,"body":"hello"}}"#
    );

    // alice sees her own message too
    let alice_sink = alice.outbound.clone();
    wait_until("alice's copy", || {
        alice_sink
            .events()
            .iter()
            .any(|event| event.event_name == EVENT_MESSAGE)
    })
    .await;
}

#[tokio::test]
async fn test_oversized_message_ends_session() {
    let pool = spawn_pool(PoolConfig::default());
    let alice = connect(&pool, "alice", SessionConfig::default()).await;

    alice
        .inbound
        .unbounded_send(Ok(Frame::Text("x".repeat(513))))
        .unwrap();

    timeout(Duration::from_secs(1), alice.tasks.join())
        .await
        .expect("both pumps should stop");
    assert_eq!(pool.member_count().await, 0);
}

#[tokio::test]
async fn test_keepalive_pings() {
    let pool = spawn_pool(PoolConfig::default());
    let config = SessionConfig {
        keepalive: Duration::from_millis(20),
        ..SessionConfig::default()
    };
    let alice = connect(&pool, "alice", config).await;

    let sink = alice.outbound.clone();
    wait_until("two pings", || {
        sink.frames()
            .iter()
            .filter(|frame| matches!(frame, Frame::Ping(_)))
            .count()
            >= 2
    })
    .await;
}
