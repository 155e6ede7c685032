//! Relay server core: shared state, WebSocket endpoint, and the
//! per-connection session loop.
//!
//! A client connects to `/{room_name}?public_key=<key>`. The connection is
//! always upgraded; it is then joined to the room through the
//! [`RoomRegistry`]. Once two clients share a room, every `chatting`
//! message from one is forwarded to the other. When a client disconnects,
//! the remaining occupant is told that its peer has left.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use keyswap_proto::codec;
use keyswap_proto::message::Status;

use crate::rooms::{ConnectionHandle, ConnectionId, JoinOutcome, LeaveOutcome, RoomRegistry};

/// Default maximum inbound message size in bytes (64 KB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Shared relay server state holding the room registry and session limits.
pub struct RelayState {
    /// Room membership and message routing.
    pub rooms: RoomRegistry,
    /// Inbound frames larger than this are dropped.
    max_message_size: usize,
    /// Close connections that stay silent this long.
    idle_timeout: Option<Duration>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with an empty registry, the default message
    /// size limit, and no idle timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_MESSAGE_SIZE, None)
    }

    /// Creates a new relay state with custom session limits.
    #[must_use]
    pub fn with_config(max_message_size: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            max_message_size,
            idle_timeout,
        }
    }
}

/// Query string of the connect request.
#[derive(Debug, serde::Deserialize)]
pub struct ConnectParams {
    /// The client's public key, already URL-decoded by the extractor.
    pub public_key: String,
}

/// Drives one upgraded WebSocket connection for its whole lifetime.
///
/// The connection lifecycle:
/// 1. Join the room (the pairing handshake is queued if this is the second
///    occupant).
/// 2. Spawn a writer task that drains this connection's outbound channel.
/// 3. Read inbound frames, relaying `chatting` messages to the peer.
/// 4. On disconnect or idle timeout, leave the room and notify the peer.
///
/// A connection rejected by the registry (room full, duplicate key) stays
/// open but inert: it receives nothing and what it sends is ignored.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, room: String, key: String) {
    let (ws_sender, ws_receiver) = socket.split();
    run_session(ws_sender, ws_receiver, state, room, key).await;
}

/// Session loop over the two halves of a connection.
///
/// Cleanup runs once, whichever half finishes first: a closed or idle reader,
/// or a writer that can no longer send.
async fn run_session<W, R>(
    mut ws_sender: W,
    mut ws_receiver: R,
    state: Arc<RelayState>,
    room: String,
    key: String,
) where
    W: Sink<Message, Error = axum::Error> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    // Held for the whole session so a rejected connection's writer stays
    // parked instead of closing the socket.
    let (handle, mut rx) = ConnectionHandle::channel();
    let conn = handle.id();

    tracing::info!(room = %room, conn = %conn, "connection accepted");

    let outcome = state.rooms.join(handle.clone(), &room, &key);
    match outcome {
        JoinOutcome::Waiting => {
            tracing::info!(room = %room, conn = %conn, "joined room, waiting for peer");
        }
        JoinOutcome::Paired => {
            tracing::info!(room = %room, conn = %conn, "joined room, paired with peer");
        }
        JoinOutcome::RoomFull => {
            tracing::warn!(room = %room, conn = %conn, "room is full, connection not registered");
        }
        JoinOutcome::DuplicateKey => {
            tracing::warn!(
                room = %room,
                conn = %conn,
                "key already present in room, connection not registered"
            );
        }
    }
    let joined = outcome.is_joined();

    // Writer task: the only place frames are written, so relays to this
    // connection never interleave.
    let writer_room = room.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match codec::encode(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(room = %writer_room, conn = %conn, error = %e, "failed to encode message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(room = %writer_room, conn = %conn, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: process incoming frames from this connection.
    let reader_state = Arc::clone(&state);
    let reader_room = room.clone();
    let idle_timeout = state.idle_timeout;
    let mut read_task = tokio::spawn(async move {
        while let Some(msg) = next_frame(&mut ws_receiver, idle_timeout, &reader_room, conn).await {
            match msg {
                Message::Text(text) if joined => {
                    handle_text_message(&reader_state, &reader_room, conn, text.as_str());
                }
                Message::Text(_) => {
                    tracing::debug!(room = %reader_room, conn = %conn, "ignoring message from unregistered connection");
                }
                Message::Close(_) => {
                    tracing::info!(room = %reader_room, conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Clean up: leave the room once; the registry tells whoever remains.
    if joined {
        match state.rooms.leave(&room, conn) {
            LeaveOutcome::Left { remaining } => {
                tracing::info!(room = %room, conn = %conn, remaining, "left room");
            }
            LeaveOutcome::NotMember => {
                tracing::debug!(room = %room, conn = %conn, "already removed from room");
            }
        }
    }
    drop(handle);

    tracing::info!(room = %room, conn = %conn, "connection closed");
}

/// Waits for the next frame, honouring the idle timeout if one is set.
///
/// Returns `None` when the stream ends, errors, or times out.
async fn next_frame(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    idle_timeout: Option<Duration>,
    room: &str,
    conn: ConnectionId,
) -> Option<Message> {
    let next = match idle_timeout {
        Some(limit) => {
            if let Ok(next) = tokio::time::timeout(limit, receiver.next()).await {
                next
            } else {
                tracing::info!(room = %room, conn = %conn, timeout = ?limit, "idle timeout");
                return None;
            }
        }
        None => receiver.next().await,
    };

    match next {
        Some(Ok(msg)) => Some(msg),
        Some(Err(e)) => {
            tracing::debug!(room = %room, conn = %conn, error = %e, "WebSocket read failed");
            None
        }
        None => None,
    }
}

/// Handles a text frame from a registered connection.
///
/// Only `chatting` messages are relayed; every other status is accepted
/// and dropped.
fn handle_text_message(state: &RelayState, room: &str, conn: ConnectionId, text: &str) {
    if text.len() > state.max_message_size {
        tracing::warn!(
            room = %room,
            conn = %conn,
            size = text.len(),
            max = state.max_message_size,
            "message exceeds size limit"
        );
        return;
    }

    let msg = match codec::decode(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(room = %room, conn = %conn, error = %e, "failed to decode message");
            return;
        }
    };

    if msg.status != Status::Chatting {
        tracing::debug!(room = %room, conn = %conn, status = %msg.status, "ignoring non-chat message");
        return;
    }

    let delivered = state.rooms.relay(room, &msg, conn);
    tracing::debug!(
        room = %room,
        conn = %conn,
        text_len = msg.text.len(),
        delivered,
        "relayed chat message"
    );
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to create a state with the limits from
/// the resolved [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/{room_name}", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
///
/// The upgrade is unconditional; room capacity is checked afterwards.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::Path(room_name): axum::extract::Path<String>,
    axum::extract::Query(params): axum::extract::Query<ConnectParams>,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_name, params.public_key))
}
