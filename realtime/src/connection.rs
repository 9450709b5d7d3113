use events::protocol::ServerMessage;
use dashmap::DashMap;
use log::*;
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;

// Type alias for user identities (the web layer passes the token subject)
pub type UserId = String;

// Type alias for room names (arbitrary strings, e.g. a shop or location id)
pub type RoomId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection bookkeeping: the authenticated identity, the outbound
/// channel into the socket task, and the rooms this connection joined.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    pub sender: UnboundedSender<ServerMessage>,
    rooms: HashSet<RoomId>,
}

/// Outcome of one push primitive. Per-recipient failures are swallowed (the
/// caller must never fail because one socket died) but they are counted
/// here so callers and tests can observe partial delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn record(&mut self, delivered: bool) {
        self.attempted += 1;
        if delivered {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn all_delivered(&self) -> bool {
        self.failed == 0
    }
}

/// High-performance connection registry with dual indices for O(1) lookups.
///
/// The `user_index` is also the per-identity room: registration auto-joins
/// it, and `send_to_user` fans out through it to every session of the same
/// identity (multi-tab, multi-device).
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: fast lookup by user_id for message routing - O(1)
    user_index: DashMap<UserId, HashSet<ConnectionId>>,

    /// Named broadcast scopes, created lazily on first join
    room_index: DashMap<RoomId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            room_index: DashMap::new(),
        }
    }

    /// Register a new connection - O(1)
    pub fn register(&self, user_id: UserId, sender: UnboundedSender<ServerMessage>) -> ConnectionId {
        let connection_id = ConnectionId::new();

        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                user_id: user_id.clone(),
                sender,
                rooms: HashSet::new(),
            },
        );

        self.user_index
            .entry(user_id)
            .or_default()
            .insert(connection_id.clone());

        connection_id
    }

    /// Unregister a connection - O(1) plus a sweep of the rooms it joined,
    /// so empty rooms never retain references to dead connections.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        if let Some((_, info)) = self.connections.remove(connection_id) {
            if let Some(mut entry) = self.user_index.get_mut(&info.user_id) {
                entry.remove(connection_id);

                if entry.is_empty() {
                    drop(entry); // Release lock before removal
                    self.user_index.remove(&info.user_id);
                }
            }

            for room in info.rooms {
                self.remove_from_room(&room, connection_id);
            }
        }
    }

    /// Add the connection to a named room, creating the room lazily. No-op
    /// for unknown connections.
    pub fn join_room(&self, connection_id: &ConnectionId, room: &str) {
        // The connection guard must be released before touching room_index:
        // send_to_room takes the two maps in the opposite order.
        let newly_joined = {
            let Some(mut info) = self.connections.get_mut(connection_id) else {
                warn!("join_room for unknown connection {}", connection_id.as_str());
                return;
            };
            info.rooms.insert(room.to_string())
        };

        if newly_joined {
            self.room_index
                .entry(room.to_string())
                .or_default()
                .insert(connection_id.clone());

            // An unregister may have swept the connection's rooms between
            // the two map updates; make sure it cannot linger in the index.
            if !self.connections.contains_key(connection_id) {
                self.remove_from_room(room, connection_id);
                return;
            }
            debug!("Connection {} joined room {room}", connection_id.as_str());
        }
    }

    /// Remove the connection from a named room. No-op when it was not a
    /// member.
    pub fn leave_room(&self, connection_id: &ConnectionId, room: &str) {
        let Some(mut info) = self.connections.get_mut(connection_id) else {
            return;
        };

        if info.rooms.remove(room) {
            drop(info); // Release the connection entry before touching the room index
            self.remove_from_room(room, connection_id);
            debug!("Connection {} left room {room}", connection_id.as_str());
        }
    }

    fn remove_from_room(&self, room: &str, connection_id: &ConnectionId) {
        if let Some(mut members) = self.room_index.get_mut(room) {
            members.remove(connection_id);

            if members.is_empty() {
                drop(members); // Release lock before removal
                self.room_index.remove(room);
            }
        }
    }

    /// Send a message to one connection - O(1)
    pub fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        message: ServerMessage,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if let Some(info) = self.connections.get(connection_id) {
            report.record(self.push(connection_id, &info.sender, message));
        }

        report
    }

    /// Send a message to every session of one identity - O(1) lookup +
    /// O(k) send where k = the identity's live connections. Zero-attempt
    /// no-op when the identity has no live connections.
    pub fn send_to_user(&self, user_id: &str, message: ServerMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if let Some(connection_ids) = self.user_index.get(user_id) {
            for connection_id in connection_ids.iter() {
                if let Some(info) = self.connections.get(connection_id) {
                    report.record(self.push(connection_id, &info.sender, message.clone()));
                }
            }
        }

        report
    }

    /// Send a message to every member of a named room.
    pub fn send_to_room(&self, room: &str, message: ServerMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if let Some(connection_ids) = self.room_index.get(room) {
            for connection_id in connection_ids.iter() {
                if let Some(info) = self.connections.get(connection_id) {
                    report.record(self.push(connection_id, &info.sender, message.clone()));
                }
            }
        }

        report
    }

    /// Broadcast a message to all connections - O(n) (unavoidable, but
    /// explicit). A failure to one recipient never prevents delivery to the
    /// remaining n-1.
    pub fn broadcast(&self, message: ServerMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for entry in self.connections.iter() {
            report.record(self.push(entry.key(), &entry.value().sender, message.clone()));
        }

        report
    }

    fn push(
        &self,
        connection_id: &ConnectionId,
        sender: &UnboundedSender<ServerMessage>,
        message: ServerMessage,
    ) -> bool {
        match sender.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to send event to connection {}: {}. Connection will be cleaned up.",
                    connection_id.as_str(),
                    e
                );
                false
            }
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn connected_users(&self) -> Vec<UserId> {
        self.user_index.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.user_index.contains_key(user_id)
    }

    /// Drops every connection's sender (disconnecting the socket tasks) and
    /// clears all indices. Safe to call on an empty registry.
    pub fn clear(&self) {
        self.connections.clear();
        self.user_index.clear();
        self.room_index.clear();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
