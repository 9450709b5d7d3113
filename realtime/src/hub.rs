use crate::connection::{ConnectionId, ConnectionRegistry, DeliveryReport, UserId};
use chrono::Utc;
use events::protocol::{
    ClientMessage, EventEnvelope, EventPayload, InventoryChange, ServerMessage, SyncPayload,
};
use log::*;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The Event Hub: owns all live connections and exposes push primitives to
/// the rest of the backend.
///
/// Constructed explicitly and shared behind an `Arc`; lifecycle is
/// `new → (socket tasks register) → … → close`. All pushes are
/// fire-and-forget, at-most-once, no retry: the returned [`DeliveryReport`]
/// is the only visibility into partial failure.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    seq: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a new authenticated connection and return its unique ID.
    /// The connection auto-joins its identity's room (the user index), so
    /// `send_to_user` reaches it immediately.
    pub fn register_connection(
        &self,
        user_id: UserId,
        sender: UnboundedSender<ServerMessage>,
    ) -> ConnectionId {
        let connection_id = self.registry.register(user_id, sender);
        info!("Registered realtime connection {}", connection_id.as_str());
        connection_id
    }

    /// Unregister a connection by ID
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        info!("Unregistering realtime connection {}", connection_id.as_str());
        self.registry.unregister(connection_id);
    }

    /// Stamps ordering metadata onto a payload. `event_id` and `timestamp`
    /// are assigned here, before fan-out, so all recipients observe
    /// identical metadata; `seq` is process-monotonic and breaks wall-clock
    /// ties on the client.
    fn stamp(&self, payload: EventPayload) -> EventEnvelope {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp = Utc::now();
        let event_id = format!(
            "{}_{}_{}",
            payload.id_prefix(),
            payload.subject_id(),
            timestamp.timestamp_millis()
        );

        EventEnvelope {
            event_id,
            seq,
            timestamp,
            payload,
        }
    }

    /// Push a completed sale to every connected session.
    pub fn broadcast_sale(&self, sale: Value) -> DeliveryReport {
        let envelope = self.stamp(EventPayload::SaleCompleted(sale));
        self.registry.broadcast(envelope.into_message())
    }

    /// Push a stock delta to every connected session.
    pub fn broadcast_inventory_update(&self, change: InventoryChange) -> DeliveryReport {
        let envelope = self.stamp(EventPayload::InventoryUpdated(change));
        self.registry.broadcast(envelope.into_message())
    }

    /// Push a free-form notice to every connected session.
    pub fn broadcast_notification(&self, payload: Value) -> DeliveryReport {
        let envelope = self.stamp(EventPayload::SystemNotice(payload));
        self.registry.broadcast(envelope.into_message())
    }

    /// Push the current presence count to every connected session. Called
    /// by the socket layer after every register/unregister.
    pub fn broadcast_active_users(&self) -> DeliveryReport {
        let count = self.registry.connected_users().len() as u64;
        self.registry
            .broadcast(ServerMessage::ActiveUsersUpdate { count })
    }

    /// Push an event to every live session of one identity. Not an error if
    /// the identity has no live connections; delivery is best-effort.
    pub fn send_to_user(&self, user_id: &str, payload: EventPayload) -> DeliveryReport {
        let envelope = self.stamp(payload);
        self.registry.send_to_user(user_id, envelope.into_message())
    }

    /// Push an event to every connection that joined the named room.
    pub fn send_to_room(&self, room: &str, payload: EventPayload) -> DeliveryReport {
        let envelope = self.stamp(payload);
        self.registry.send_to_room(room, envelope.into_message())
    }

    /// Push an already-formed message to one connection.
    pub fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        message: ServerMessage,
    ) -> DeliveryReport {
        self.registry.send_to_connection(connection_id, message)
    }

    /// Handles a parsed inbound message from a connection.
    pub fn handle_client_message(&self, connection_id: &ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::JoinRoom { room } => {
                self.registry.join_room(connection_id, &room);
            }
            ClientMessage::LeaveRoom { room } => {
                self.registry.leave_room(connection_id, &room);
            }
            ClientMessage::Ping => {
                self.registry.send_to_connection(
                    connection_id,
                    ServerMessage::Pong {
                        timestamp: Utc::now(),
                    },
                );
            }
            ClientMessage::RequestSync { last_event_id, .. } => {
                // There is no durable event log to replay from; the reply
                // shape is kept so clients need no change when one exists.
                debug!(
                    "Sync requested by {} (lastEventId={:?}); replying with empty replay",
                    connection_id.as_str(),
                    last_event_id
                );
                self.registry
                    .send_to_connection(connection_id, ServerMessage::SyncData(SyncPayload::empty()));
            }
        }
    }

    /// Answers an inbound frame that failed to parse. `sync_error` is the
    /// protocol's only malformed-request reply channel.
    pub fn reject_malformed(&self, connection_id: &ConnectionId, detail: &str) {
        warn!(
            "Malformed message from connection {}: {detail}",
            connection_id.as_str()
        );
        self.registry.send_to_connection(
            connection_id,
            ServerMessage::SyncError {
                message: format!("malformed message: {detail}"),
            },
        );
    }

    pub fn active_connections(&self) -> usize {
        self.registry.active_connections()
    }

    pub fn connected_users(&self) -> Vec<UserId> {
        self.registry.connected_users()
    }

    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.registry.is_user_connected(user_id)
    }

    /// Disconnects all sessions and clears all maps. Safe to call on a hub
    /// that never saw a connection, and safe to call twice.
    pub fn close(&self) {
        info!(
            "Closing hub with {} active connection(s)",
            self.registry.active_connections()
        );
        self.registry.clear();
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::Id;
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn connect(hub: &Hub, user: &str) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.register_connection(user.to_string(), tx), rx)
    }

    fn change(stock: i64) -> InventoryChange {
        InventoryChange {
            product_id: Id::new_v4(),
            name: "Filter Paper".to_string(),
            stock,
            previous_stock: stock + 1,
            change: -1,
            reason: "sale".to_string(),
            sale_id: None,
        }
    }

    #[test]
    fn broadcast_sale_stamps_id_from_prefix_subject_and_millis() {
        let hub = Hub::new();
        let (_id, mut rx) = connect(&hub, "alice");

        hub.broadcast_sale(json!({"id": "sale-7", "amount": 12.0}));

        match rx.try_recv().unwrap() {
            ServerMessage::SaleUpdate(envelope) => {
                assert!(envelope.event_id.starts_with("sale_sale-7_"));
                assert_eq!(envelope.seq, 1);
            }
            other => panic!("expected sale_update, got {other:?}"),
        }
    }

    #[test]
    fn sequence_numbers_are_monotonic_across_channels() {
        let hub = Hub::new();
        let (_id, mut rx) = connect(&hub, "alice");

        hub.broadcast_sale(json!({"id": "s1"}));
        hub.broadcast_inventory_update(change(10));
        hub.broadcast_notification(json!({"text": "closing early"}));

        let mut seqs = Vec::new();
        for _ in 0..3 {
            let seq = match rx.try_recv().unwrap() {
                ServerMessage::SaleUpdate(e)
                | ServerMessage::InventoryUpdate(e)
                | ServerMessage::Notification(e) => e.seq,
                other => panic!("unexpected message {other:?}"),
            };
            seqs.push(seq);
        }

        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn send_to_user_reaches_all_sessions_and_nobody_else() {
        let hub = Hub::new();
        let (_a1, mut rx_a1) = connect(&hub, "alice");
        let (_a2, mut rx_a2) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");

        let payload = events::protocol::stock_alert(&change(3)).unwrap();
        let report = hub.send_to_user("alice", payload);

        assert_eq!(report.delivered, 2);
        assert!(matches!(
            rx_a1.try_recv().unwrap(),
            ServerMessage::Notification(_)
        ));
        assert!(matches!(
            rx_a2.try_recv().unwrap(),
            ServerMessage::Notification(_)
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn send_to_user_without_sessions_never_errors() {
        let hub = Hub::new();
        let report = hub.send_to_user("ghost", EventPayload::SystemNotice(json!({})));
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn room_messages_only_reach_joined_connections() {
        let hub = Hub::new();
        let (id_a, mut rx_a) = connect(&hub, "alice");
        let (_id_b, mut rx_b) = connect(&hub, "bob");

        hub.handle_client_message(
            &id_a,
            ClientMessage::JoinRoom {
                room: "shop-1".to_string(),
            },
        );

        hub.send_to_room("shop-1", EventPayload::SystemNotice(json!({"text": "hi"})));

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerMessage::Notification(_)
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn ping_is_answered_with_pong_on_the_same_connection() {
        let hub = Hub::new();
        let (id, mut rx) = connect(&hub, "alice");

        hub.handle_client_message(&id, ClientMessage::Ping);

        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong { .. }));
    }

    #[test]
    fn request_sync_is_answered_with_an_empty_replay() {
        let hub = Hub::new();
        let (id, mut rx) = connect(&hub, "alice");

        hub.handle_client_message(
            &id,
            ClientMessage::RequestSync {
                last_event_id: Some("sale_abc_1000".to_string()),
                last_update: Utc::now(),
            },
        );

        match rx.try_recv().unwrap() {
            ServerMessage::SyncData(payload) => {
                assert!(payload.sales.is_empty());
                assert!(payload.inventory_updates.is_empty());
                assert!(payload.notifications.is_empty());
            }
            other => panic!("expected sync_data, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_answered_with_sync_error() {
        let hub = Hub::new();
        let (id, mut rx) = connect(&hub, "alice");

        hub.reject_malformed(&id, "expected value at line 1");

        match rx.try_recv().unwrap() {
            ServerMessage::SyncError { message } => {
                assert!(message.contains("malformed message"));
            }
            other => panic!("expected sync_error, got {other:?}"),
        }
    }

    #[test]
    fn active_users_broadcast_counts_identities_not_connections() {
        let hub = Hub::new();
        let (_a1, mut rx) = connect(&hub, "alice");
        let (_a2, _rx2) = connect(&hub, "alice");
        let (_b, _rx3) = connect(&hub, "bob");

        hub.broadcast_active_users();

        match rx.try_recv().unwrap() {
            ServerMessage::ActiveUsersUpdate { count } => assert_eq!(count, 2),
            other => panic!("expected active_users_update, got {other:?}"),
        }
    }

    #[test]
    fn close_disconnects_everything_and_is_idempotent() {
        let hub = Hub::new();
        let (_id, mut rx) = connect(&hub, "alice");

        hub.close();
        hub.close();

        assert_eq!(hub.active_connections(), 0);
        // The socket task observes the drop as a closed channel.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
