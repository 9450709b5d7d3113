//! Wire protocol for the realtime channel.
//!
//! Every message exchanged over the WebSocket is one of two closed unions:
//! [`ClientMessage`] (client to server, tagged on `action`) and
//! [`ServerMessage`] (server to client, tagged on `event`). Data-bearing
//! events travel inside an [`EventEnvelope`] whose ordering metadata
//! (`eventId`, `seq`, `timestamp`) is stamped by the hub before fan-out, so
//! all recipients observe identical metadata. Wire field names are
//! camelCase to match the frontend's conventions.

use crate::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Products at or below this stock level (but above zero) raise a
/// warning-severity `low_stock` alert; a level of exactly zero raises an
/// urgent `stock_out` alert instead.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

/// A stock delta applied to one product, either by a sale or by a manual
/// adjustment. This is the payload of every `inventory_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryChange {
    pub product_id: Id,
    pub name: String,
    pub stock: i64,
    pub previous_stock: i64,
    pub change: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<Id>,
}

/// Severity of a stock alert notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Urgent,
}

/// Payload of a `low_stock` or `stock_out` notification sent to the shop
/// owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAlert {
    pub product_id: Id,
    pub product_name: String,
    pub current_stock: i64,
    pub severity: Severity,
    pub message: String,
}

/// Derives the stock alert (if any) for an applied inventory change.
///
/// Boundary semantics: stock of exactly 0 is urgent, stock in
/// `1..=LOW_STOCK_THRESHOLD` is a warning, anything above the threshold is
/// healthy.
pub fn stock_alert(change: &InventoryChange) -> Option<EventPayload> {
    if change.stock == 0 {
        Some(EventPayload::StockOut(StockAlert {
            product_id: change.product_id,
            product_name: change.name.clone(),
            current_stock: 0,
            severity: Severity::Urgent,
            message: format!("{} is out of stock", change.name),
        }))
    } else if change.stock > 0 && change.stock <= LOW_STOCK_THRESHOLD {
        Some(EventPayload::LowStock(StockAlert {
            product_id: change.product_id,
            product_name: change.name.clone(),
            current_stock: change.stock,
            severity: Severity::Warning,
            message: format!("{} is low on stock ({} left)", change.name, change.stock),
        }))
    } else {
        None
    }
}

/// The typed payload carried by a data-bearing event. The `type`/`data`
/// pair appears inline in the envelope on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// A persisted sale record, as serialized by the CRUD layer.
    SaleCompleted(Value),
    /// A stock delta on one product.
    InventoryUpdated(InventoryChange),
    /// Stock at or below the low-stock threshold.
    LowStock(StockAlert),
    /// Stock exhausted.
    StockOut(StockAlert),
    /// Free-form operator notice broadcast to everyone.
    SystemNotice(Value),
}

impl EventPayload {
    /// Prefix used when stamping `eventId`.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EventPayload::SaleCompleted(_) => "sale",
            EventPayload::InventoryUpdated(_) => "inventory",
            EventPayload::LowStock(_) | EventPayload::StockOut(_) | EventPayload::SystemNotice(_) => {
                "notification"
            }
        }
    }

    /// Identifier of the entity this event is about, used when stamping
    /// `eventId`. Falls back to a fixed label when the payload carries no
    /// usable id.
    pub fn subject_id(&self) -> String {
        match self {
            EventPayload::SaleCompleted(sale) => sale
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            EventPayload::InventoryUpdated(change) => change.product_id.to_string(),
            EventPayload::LowStock(alert) | EventPayload::StockOut(alert) => {
                alert.product_id.to_string()
            }
            EventPayload::SystemNotice(_) => "system".to_string(),
        }
    }
}

/// Envelope around every data-bearing event. `event_id`, `seq` and
/// `timestamp` are assigned once, hub-side, before fan-out. `seq` is a
/// process-monotonic sequence number; clients use `(timestamp, seq)` to
/// order a batch, which removes wall-clock ties as an ordering concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Wraps the envelope in the [`ServerMessage`] variant matching its
    /// payload's channel: sales on `sale_update`, stock deltas on
    /// `inventory_update`, everything else on `notification`.
    pub fn into_message(self) -> ServerMessage {
        match &self.payload {
            EventPayload::SaleCompleted(_) => ServerMessage::SaleUpdate(self),
            EventPayload::InventoryUpdated(_) => ServerMessage::InventoryUpdate(self),
            EventPayload::LowStock(_)
            | EventPayload::StockOut(_)
            | EventPayload::SystemNotice(_) => ServerMessage::Notification(self),
        }
    }
}

/// Reply to `request_sync`. The current design has no durable event log to
/// replay from, so the hub always answers with empty arrays; the shape is
/// kept so a log-backed responder can be introduced without a protocol
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub sales: Vec<EventEnvelope>,
    pub inventory_updates: Vec<EventEnvelope>,
    pub notifications: Vec<EventEnvelope>,
    pub last_sync: DateTime<Utc>,
}

impl SyncPayload {
    pub fn empty() -> Self {
        Self {
            sales: Vec::new(),
            inventory_updates: Vec::new(),
            notifications: Vec::new(),
            last_sync: Utc::now(),
        }
    }
}

/// Messages a client may send after the handshake. The credential itself is
/// never a message; it rides the connection handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    RequestSync {
        last_event_id: Option<String>,
        last_update: DateTime<Utc>,
    },
    JoinRoom {
        room: String,
    },
    LeaveRoom {
        room: String,
    },
    Ping,
}

/// Messages the server may push to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent exactly once, immediately after the connection is
    /// accepted.
    #[serde(rename_all = "camelCase")]
    Connected {
        message: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Reply to an application-level `ping`.
    Pong { timestamp: DateTime<Utc> },
    SaleUpdate(EventEnvelope),
    InventoryUpdate(EventEnvelope),
    Notification(EventEnvelope),
    /// Presence counter, pushed whenever a session connects or disconnects.
    ActiveUsersUpdate { count: u64 },
    SyncData(SyncPayload),
    SyncError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(stock: i64) -> InventoryChange {
        InventoryChange {
            product_id: Id::new_v4(),
            name: "Espresso Beans".to_string(),
            stock,
            previous_stock: stock + 2,
            change: -2,
            reason: "sale".to_string(),
            sale_id: None,
        }
    }

    #[test]
    fn stock_alert_is_urgent_at_exactly_zero() {
        match stock_alert(&change(0)) {
            Some(EventPayload::StockOut(alert)) => {
                assert_eq!(alert.severity, Severity::Urgent);
                assert_eq!(alert.current_stock, 0);
            }
            other => panic!("expected stock_out, got {other:?}"),
        }
    }

    #[test]
    fn stock_alert_is_warning_at_exactly_the_threshold() {
        match stock_alert(&change(LOW_STOCK_THRESHOLD)) {
            Some(EventPayload::LowStock(alert)) => {
                assert_eq!(alert.severity, Severity::Warning);
                assert_eq!(alert.current_stock, LOW_STOCK_THRESHOLD);
            }
            other => panic!("expected low_stock, got {other:?}"),
        }
    }

    #[test]
    fn stock_alert_is_warning_at_one() {
        assert!(matches!(
            stock_alert(&change(1)),
            Some(EventPayload::LowStock(_))
        ));
    }

    #[test]
    fn no_stock_alert_above_the_threshold() {
        assert_eq!(stock_alert(&change(LOW_STOCK_THRESHOLD + 1)), None);
    }

    #[test]
    fn sale_update_wire_shape_matches_the_catalogue() {
        let envelope = EventEnvelope {
            event_id: "sale_sale-1_1000".to_string(),
            seq: 7,
            timestamp: Utc::now(),
            payload: EventPayload::SaleCompleted(json!({"id": "sale-1", "amount": 120.5})),
        };

        let value = serde_json::to_value(envelope.into_message()).unwrap();

        assert_eq!(value["event"], "sale_update");
        assert_eq!(value["eventId"], "sale_sale-1_1000");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["type"], "sale_completed");
        assert_eq!(value["data"]["amount"], 120.5);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn inventory_change_serializes_camel_case() {
        let value = serde_json::to_value(change(3)).unwrap();

        assert!(value.get("productId").is_some());
        assert!(value.get("previousStock").is_some());
        // Absent sale id is omitted entirely, not serialized as null.
        assert!(value.get("saleId").is_none());
    }

    #[test]
    fn notification_channel_carries_stock_alerts() {
        let payload = stock_alert(&change(2)).unwrap();
        let envelope = EventEnvelope {
            event_id: "notification_x_1".to_string(),
            seq: 1,
            timestamp: Utc::now(),
            payload,
        };

        let value = serde_json::to_value(envelope.into_message()).unwrap();
        assert_eq!(value["event"], "notification");
        assert_eq!(value["type"], "low_stock");
        assert_eq!(value["data"]["severity"], "warning");
    }

    #[test]
    fn client_ping_serializes_to_a_bare_action() {
        let value = serde_json::to_value(ClientMessage::Ping).unwrap();
        assert_eq!(value, json!({"action": "ping"}));
    }

    #[test]
    fn request_sync_round_trips() {
        let message = ClientMessage::RequestSync {
            last_event_id: Some("sale_abc_1000".to_string()),
            last_update: Utc::now(),
        };

        let text = serde_json::to_string(&message).unwrap();
        assert!(text.contains("\"lastEventId\":\"sale_abc_1000\""));

        let parsed: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn sync_payload_is_empty_and_camel_cased() {
        let value = serde_json::to_value(ServerMessage::SyncData(SyncPayload::empty())).unwrap();

        assert_eq!(value["event"], "sync_data");
        assert_eq!(value["sales"], json!([]));
        assert_eq!(value["inventoryUpdates"], json!([]));
        assert_eq!(value["notifications"], json!([]));
        assert!(value["lastSync"].is_string());
    }

    #[test]
    fn server_messages_round_trip_through_the_envelope() {
        let envelope = EventEnvelope {
            event_id: "inventory_p1_5".to_string(),
            seq: 5,
            timestamp: Utc::now(),
            payload: EventPayload::InventoryUpdated(change(4)),
        };

        let text = serde_json::to_string(&envelope.clone().into_message()).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();

        match parsed {
            ServerMessage::InventoryUpdate(parsed_envelope) => {
                assert_eq!(parsed_envelope, envelope)
            }
            other => panic!("expected inventory_update, got {other:?}"),
        }
    }
}
