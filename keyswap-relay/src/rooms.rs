//! Room registry for the relay server.
//!
//! Pairs at most two connections under a room name, swaps their public keys
//! when the second one arrives, and forwards messages between them. The
//! registry is the only record of who is in which room.
//!
//! Room entries are ephemeral and lost on relay restart. A room exists only
//! while it has at least one occupant.
//!
//! All operations take a single lock and never await while holding it.
//! Outbound messages are pushed onto per-connection unbounded channels, so
//! the four handshake messages are always queued before any chat relay.

use std::collections::HashMap;
use std::fmt;

use keyswap_proto::message::ChatMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Maximum number of occupants in a room.
pub const ROOM_CAPACITY: usize = 2;

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh, time-ordered connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Addressing handle for a connection: its identity plus the sending half
/// of the channel drained by the connection's writer task.
///
/// The registry never owns the connection itself. Rooms compare handles by
/// [`ConnectionId`], never by participant key.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl ConnectionHandle {
    /// Wraps an existing sender under a new connection id.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ChatMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    /// Creates a handle together with the receiver its messages arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Returns this connection's identity.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a message for this connection. Returns `false` if the
    /// connection's writer has gone away.
    fn send(&self, msg: ChatMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Result of [`RoomRegistry::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First occupant; waiting for a peer.
    Waiting,
    /// Second occupant; the pairing handshake has been sent.
    Paired,
    /// The room already has two occupants. The connection was not added.
    RoomFull,
    /// Another occupant of the room already uses this key. The connection
    /// was not added and the existing holder is untouched.
    DuplicateKey,
}

impl JoinOutcome {
    /// Whether the connection is now registered in the room.
    #[must_use]
    pub const fn is_joined(self) -> bool {
        matches!(self, Self::Waiting | Self::Paired)
    }
}

/// Result of [`RoomRegistry::leave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The connection was removed and any remaining occupant has been sent
    /// the "left" notice. A room that drops to zero is deleted.
    Left {
        /// Occupants still in the room.
        remaining: usize,
    },
    /// The connection was not registered in the room (already removed, or
    /// never admitted).
    NotMember,
}

#[derive(Debug)]
struct Participant {
    key: String,
    handle: ConnectionHandle,
}

#[derive(Debug, Default)]
struct Room {
    // Join order; at most ROOM_CAPACITY entries.
    participants: Vec<Participant>,
}

impl Room {
    fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn len(&self) -> usize {
        self.participants.len()
    }

    /// Tells every occupant that its peer has left.
    ///
    /// A failed send is only logged; that occupant's own session removes it
    /// when its writer shuts down.
    fn notify_peer_left(&self, room_name: &str) {
        for survivor in &self.participants {
            if !survivor.handle.send(ChatMessage::peer_left()) {
                tracing::debug!(
                    room = %room_name,
                    conn = %survivor.handle.id(),
                    "left notice not delivered, occupant unreachable"
                );
            }
        }
    }

    /// Sends each occupant the other's key, then each the exchange notice.
    /// Returns the ids of occupants whose channel was closed.
    fn pairing_handshake(&self) -> Vec<ConnectionId> {
        let mut unreachable = Vec::new();

        if let [first, second] = self.participants.as_slice() {
            for (target, peer) in [(first, second), (second, first)] {
                if !target
                    .handle
                    .send(ChatMessage::exchange_public_key(peer.key.clone()))
                {
                    unreachable.push(target.handle.id());
                }
            }
            for target in [first, second] {
                if !target.handle.send(ChatMessage::keys_exchanged())
                    && !unreachable.contains(&target.handle.id())
                {
                    unreachable.push(target.handle.id());
                }
            }
        }

        unreachable
    }
}

/// In-memory directory of paired rooms.
///
/// Thread-safe via a [`Mutex`] around the whole map. Supports join, leave,
/// and relay, plus read-only introspection for diagnostics and tests.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates a new, empty room registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a connection to a room, creating the room if needed.
    ///
    /// When this makes the room's second occupant, both occupants are sent
    /// the pairing handshake before this returns: each gets the other's
    /// key, then the exchange notice.
    ///
    /// A full room or a duplicate key is reported through [`JoinOutcome`]
    /// rather than an error. The caller decides what to do with the rejected
    /// connection.
    pub fn join(&self, handle: ConnectionHandle, room_name: &str, key: &str) -> JoinOutcome {
        let mut rooms = self.rooms.lock();

        if let Some(room) = rooms.get(room_name) {
            if room.len() >= ROOM_CAPACITY {
                return JoinOutcome::RoomFull;
            }
            if room.participants.iter().any(|p| p.key == key) {
                return JoinOutcome::DuplicateKey;
            }
        }

        let room = rooms.entry(room_name.to_string()).or_default();
        room.participants.push(Participant {
            key: key.to_string(),
            handle,
        });

        if room.len() < ROOM_CAPACITY {
            return JoinOutcome::Waiting;
        }

        let unreachable = room.pairing_handshake();
        tracing::info!(room = %room_name, "public keys exchanged");
        if unreachable.is_empty() {
            return JoinOutcome::Paired;
        }

        prune_unreachable(&mut rooms, room_name, &unreachable);
        match rooms.get(room_name) {
            Some(room) if room.len() == ROOM_CAPACITY => JoinOutcome::Paired,
            _ => JoinOutcome::Waiting,
        }
    }

    /// Forwards `msg` to every occupant of the room except `sender`.
    ///
    /// Returns the number of occupants the message was queued for. A missing
    /// room is a no-op. An occupant whose connection has gone away is
    /// dropped from the room and the remaining occupants get the "left"
    /// notice.
    pub fn relay(&self, room_name: &str, msg: &ChatMessage, sender: ConnectionId) -> usize {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get(room_name) else {
            return 0;
        };

        let mut delivered = 0;
        let mut unreachable = Vec::new();
        for participant in room.participants.iter().filter(|p| p.handle.id() != sender) {
            if participant.handle.send(msg.clone()) {
                delivered += 1;
            } else {
                unreachable.push(participant.handle.id());
            }
        }

        if !unreachable.is_empty() {
            prune_unreachable(&mut rooms, room_name, &unreachable);
        }

        delivered
    }

    /// Removes a connection from a room by identity and, under the same
    /// lock, sends the "left" notice to whoever remains.
    ///
    /// Deletes the room if it becomes empty. A join that races with this
    /// call either sees the departing connection still present or an
    /// already-notified survivor, never a stale notice.
    pub fn leave(&self, room_name: &str, conn: ConnectionId) -> LeaveOutcome {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_name) else {
            return LeaveOutcome::NotMember;
        };

        let before = room.len();
        room.participants.retain(|p| p.handle.id() != conn);
        let remaining = room.len();
        if remaining == before {
            return LeaveOutcome::NotMember;
        }

        if room.is_empty() {
            rooms.remove(room_name);
            tracing::debug!(room = %room_name, "room removed");
        } else {
            room.notify_peer_left(room_name);
        }

        LeaveOutcome::Left { remaining }
    }

    /// Number of occupants in a room; 0 if the room does not exist.
    pub fn occupants(&self, room_name: &str) -> usize {
        self.rooms.lock().get(room_name).map_or(0, Room::len)
    }

    /// Whether a room currently exists.
    pub fn contains_room(&self, room_name: &str) -> bool {
        self.rooms.lock().contains_key(room_name)
    }

    /// Number of rooms with at least one occupant.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

/// Drops unreachable occupants from a room and tells the survivors their
/// peer has left. Deletes the room if nobody survives.
fn prune_unreachable(rooms: &mut HashMap<String, Room>, room_name: &str, dead: &[ConnectionId]) {
    let Some(room) = rooms.get_mut(room_name) else {
        return;
    };

    room.participants.retain(|p| !dead.contains(&p.handle.id()));
    tracing::warn!(
        room = %room_name,
        dropped = dead.len(),
        "dropped unreachable occupants"
    );

    room.notify_peer_left(room_name);

    if room.is_empty() {
        rooms.remove(room_name);
    }
}
