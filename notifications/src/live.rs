//! Live push channel.
//!
//! Clients open a WebSocket at `GET /live?userId=…` (the gateway in front of
//! the service vouches for the id). While the socket is open the user is
//! registered in the [`LiveHub`] and their presence marker is kept fresh.
//!
//! # Message Protocol
//!
//! **Server → Client:**
//! ```json
//! {
//!   "type": "notification",
//!   "recipient": "…",
//!   "eventType": "JourneyUpdated",
//!   "journeyId": "…",
//!   "message": "A journey you favorited was updated"
//! }
//! ```

use crate::error::{NotifyError, Result};
use crate::presence::PresenceStore;
use crate::recipients::Notification;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use journey_relay_core::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

/// Best-effort, at-most-once delivery to connected clients.
pub trait LivePush: Send + Sync {
    /// Push to every open connection of the recipient. Returns how many
    /// connections were reached; zero when the user is not connected.
    ///
    /// # Errors
    ///
    /// Returns a [`NotifyError`] if the push could not be attempted.
    fn push(&self, notification: &Notification) -> impl Future<Output = Result<usize>> + Send;
}

/// Frames sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage {
    /// Something happened that concerns the user.
    Notification(Notification),
}

type Connections = HashMap<UserId, Vec<(u64, mpsc::UnboundedSender<String>)>>;

/// In-process registry of open live connections.
#[derive(Clone, Default)]
pub struct LiveHub {
    connections: Arc<RwLock<Connections>>,
    next_id: Arc<AtomicU64>,
}

/// One registered connection; frames for it arrive on `receiver`.
#[derive(Debug)]
pub struct LiveConnection {
    /// Connection id, unique within the hub.
    pub id: u64,
    /// Frames to write to the socket.
    pub receiver: mpsc::UnboundedReceiver<String>,
}

impl LiveHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`.
    pub async fn connect(&self, user_id: UserId) -> LiveConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push((id, sender));
        LiveConnection { id, receiver }
    }

    /// Forget a connection. Returns the user's remaining connection count.
    pub async fn disconnect(&self, user_id: UserId, id: u64) -> usize {
        let mut connections = self.connections.write().await;
        let remaining = connections.get_mut(&user_id).map_or(0, |list| {
            list.retain(|(existing, _)| *existing != id);
            list.len()
        });
        if remaining == 0 {
            connections.remove(&user_id);
        }
        remaining
    }

    /// Open connections of `user_id`.
    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.connections.read().await.get(&user_id).map_or(0, Vec::len)
    }
}

impl LivePush for LiveHub {
    async fn push(&self, notification: &Notification) -> Result<usize> {
        let frame = serde_json::to_string(&LiveMessage::Notification(notification.clone()))
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;

        let connections = self.connections.read().await;
        let Some(list) = connections.get(&notification.recipient) else {
            return Ok(0);
        };
        Ok(list
            .iter()
            .filter(|(_, sender)| sender.send(frame.clone()).is_ok())
            .count())
    }
}

/// Shared state of the live endpoint.
pub struct LiveState<P> {
    /// Connection registry, shared with the dispatcher.
    pub hub: LiveHub,
    /// Presence markers.
    pub presence: Arc<P>,
    /// Marker lifetime; refreshed every half TTL.
    pub presence_ttl: Duration,
}

impl<P> Clone for LiveState<P> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
            presence: Arc::clone(&self.presence),
            presence_ttl: self.presence_ttl,
        }
    }
}

/// Query string of `GET /live`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveParams {
    /// The connecting user.
    pub user_id: UserId,
}

/// Router exposing `GET /live`.
pub fn router<P: PresenceStore + 'static>(state: LiveState<P>) -> Router {
    Router::new()
        .route("/live", get(live_handler::<P>))
        .with_state(state)
}

/// Serve the live endpoint until `shutdown` flips to `true`.
///
/// # Errors
///
/// Returns the I/O error if the listener cannot be bound or fails.
pub async fn serve<P: PresenceStore + 'static>(
    addr: SocketAddr,
    state: LiveState<P>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Live channel listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

#[allow(clippy::unused_async)] // Axum handler signature requires async
async fn live_handler<P: PresenceStore + 'static>(
    ws: WebSocketUpgrade,
    Query(params): Query<LiveParams>,
    State(state): State<LiveState<P>>,
) -> Response {
    info!(user_id = %params.user_id, "Live connection requested");
    ws.on_upgrade(move |socket| handle_socket(socket, params.user_id, state))
}

fn heartbeat_period(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_secs(1))
}

async fn handle_socket<P: PresenceStore + 'static>(
    socket: WebSocket,
    user_id: UserId,
    state: LiveState<P>,
) {
    let LiveConnection { id, mut receiver } = state.hub.connect(user_id).await;
    if let Err(error) = state.presence.mark_online(user_id, state.presence_ttl).await {
        warn!(user_id = %user_id, %error, "Failed to mark user online");
    }
    info!(user_id = %user_id, connection_id = id, "Live connection established");

    let (mut sender, mut incoming) = socket.split();

    let presence = Arc::clone(&state.presence);
    let ttl = state.presence_ttl;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_period(ttl));
        // The first tick completes immediately and presence was just set
        heartbeat.tick().await;
        loop {
            tokio::select! {
                frame = receiver.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(error) = presence.mark_online(user_id, ttl).await {
                        warn!(user_id = %user_id, %error, "Failed to refresh presence");
                    }
                },
            }
        }
        debug!("Live send task terminated");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                Message::Close(_) => {
                    debug!("Client requested close");
                    break;
                },
                Message::Text(_) | Message::Binary(_) => {
                    debug!("Ignoring client frame on push-only channel");
                },
                Message::Ping(_) | Message::Pong(_) => {},
            }
        }
        debug!("Live receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    if state.hub.disconnect(user_id, id).await == 0 {
        if let Err(error) = state.presence.mark_offline(user_id).await {
            warn!(user_id = %user_id, %error, "Failed to clear presence");
        }
    }
    info!(user_id = %user_id, connection_id = id, "Live connection closed");
}
