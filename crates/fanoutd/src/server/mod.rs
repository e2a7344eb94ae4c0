//! HTTP listener and WebSocket upgrade.
//!
//! Routes:
//! - `GET /ws?username=<name>` upgrades to a WebSocket and starts a session
//! - everything else is served from the static directory, if configured
//!
//! A request to `/ws` without the upgrade handshake gets
//! `400 Not a websocket request`.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Bind and serve failures are returned as `ServerError`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use fanout_core::Identity;

use crate::config::HubConfig;
use crate::pool::PoolHandle;
use crate::session::{spawn_session, SessionConfig};

mod connection;

pub use connection::{
    split, ConnectionConfig, ConnectionError, ConnectionReader, ConnectionWriter, Frame,
};

/// Body returned when `/ws` is hit without an upgrade handshake.
pub const NOT_A_WEBSOCKET: &str = "Not a websocket request";

// ============================================================================
// Server
// ============================================================================

/// HTTP server accepting WebSocket sessions for a pool.
pub struct HubServer {
    config: Arc<HubConfig>,
    pool: PoolHandle,
    cancel_token: CancellationToken,
}

#[derive(Clone)]
struct AppState {
    config: Arc<HubConfig>,
    pool: PoolHandle,
}

impl HubServer {
    /// Creates a new server.
    ///
    /// # Arguments
    ///
    /// * `config` - Listen address, static directory, and per-session tunables
    /// * `pool` - Coordinator every accepted session registers with
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(config: HubConfig, pool: PoolHandle, cancel_token: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            cancel_token,
        }
    }

    /// Builds the router: `/ws` plus the optional static fallback.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            pool: self.pool.clone(),
        };

        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state);

        if let Some(dir) = &self.config.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address is unavailable.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.listen;
        TcpListener::bind(addr)
            .await
            .map_err(|error| ServerError::Bind { addr, error })
    }

    /// Binds and serves until the cancel token fires.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding or serving fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until the cancel token fires.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Serve` if the accept loop fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().ok();
        info!(
            addr = ?local_addr,
            static_dir = ?self.config.static_dir,
            "Hub listening"
        );

        let router = self.router();
        let token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Hub server stopped");
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    username: String,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected non-websocket request");
            return (StatusCode::BAD_REQUEST, NOT_A_WEBSOCKET).into_response();
        }
    };

    ws.on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, params.username, state))
}

async fn handle_socket(socket: WebSocket, username: String, state: AppState) {
    let identity = Identity::new(username);
    debug!(
        session_id = %identity.id,
        username = %identity.display_name,
        "WebSocket connected"
    );

    let (sink, stream) = socket.split();
    let stream = stream.map(|result| result.map(frame_from_message));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(message_from_frame(frame))));

    let (reader, writer) = split(stream, sink, state.config.connection);
    let config = SessionConfig::from(state.config.as_ref());

    if let Err(e) = spawn_session(identity, reader, writer, state.pool, config).await {
        warn!(error = %e, "Session not started");
    }
}

fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind {
        addr: SocketAddr,
        #[source]
        error: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(String),
}
