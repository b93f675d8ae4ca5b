//! The Venue Host library: a single-process LAN server that lets mobile
//! peers discover each other via mDNS, join a shared room, maintain a
//! unified file index, and exchange files through host-mediated relay.
//!
//! `venue-host` owns every socket, task and lock in the system.
//! `venue-core` supplies the wire protocol and domain types it operates on.

pub mod advertise;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod library;
pub mod liveness;
pub mod state;
pub mod transfer;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::connection::Endpoint;
use crate::dispatcher::{ConnectionState, Dispatcher};
use crate::library::{HostLibrary, LibraryChangeEvent};
use crate::state::RoomRegistry;
use crate::transfer::TransferEngine;

/// Shared application state handed to every Axum handler. Cloning it only
/// clones the `Arc`s inside, never the registry or transfer map themselves.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub transfers: Arc<TransferEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub max_inbound_frame_bytes: usize,
}

impl AppState {
    #[must_use]
    pub fn new(config: &HostConfig, library: Arc<dyn HostLibrary>) -> Self {
        let registry = Arc::new(RoomRegistry::new(Arc::clone(&library), config.room_name.clone()));
        let transfers = Arc::new(TransferEngine::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&transfers),
            Arc::clone(&library),
            config,
        ));

        let change_dispatcher = Arc::clone(&dispatcher);
        library.on_change(Box::new(move |event| {
            let dispatcher = Arc::clone(&change_dispatcher);
            tokio::spawn(async move {
                match event {
                    LibraryChangeEvent::Upserted(files) => dispatcher.broadcast_library_upsert(files).await,
                    LibraryChangeEvent::Removed(file_ids) => dispatcher.broadcast_library_remove(file_ids).await,
                }
            });
        }));

        Self {
            registry,
            transfers,
            dispatcher,
            max_inbound_frame_bytes: config.max_inbound_frame_bytes(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Binds `listener` and serves until the returned future completes or a
/// caller-supplied shutdown signal fires (via `axum::serve(...).with_graceful_shutdown`
/// in `main`, so this function itself never decides when to stop).
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    info!(
        "venue host listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state)).await
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_frame_size = state.max_inbound_frame_bytes;
    ws.max_frame_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(state, socket))
}

/// Keepalive interval for the per-client write half. When using split
/// WebSocket streams, Pong responses to incoming Pings are queued by the
/// read half but only flushed when the write half actually sends data;
/// without periodic writes a reverse proxy may consider the connection
/// idle and close it.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

async fn handle_socket(state: AppState, socket: axum::extract::ws::WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await; // skip the first immediate tick

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let endpoint = Endpoint::new(outbound_tx);
    let mut connection_state = ConnectionState::default();

    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket receive error: {}", err);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                state
                    .dispatcher
                    .handle_text(&mut connection_state, &endpoint, text.as_str())
                    .await;
            }
            Message::Binary(data) => {
                state.dispatcher.handle_binary(&data).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.dispatcher.handle_disconnect(&connection_state).await;
    send_task.abort();
    if let Some(peer_id) = &connection_state.peer_id {
        info!("peer {} disconnected", peer_id);
    }
}
