use crate::hub::Hub;
use async_trait::async_trait;
use events::protocol::{stock_alert, InventoryChange};
use events::{DomainEvent, EventHandler, Id};
use log::*;
use std::sync::Arc;

/// Handles domain events by converting them to realtime pushes.
///
/// This handler is responsible for:
/// 1. Broadcasting the sale and its per-product stock deltas
/// 2. Routing threshold alerts (low stock, stock out) to the shop owner
///
/// The CRUD layer determines the owner and the stock deltas and includes
/// them in the event; this handler only maps and routes. Pushes are
/// best-effort: a dead recipient never fails the triggering CRUD
/// operation.
pub struct RealtimeEventHandler {
    hub: Arc<Hub>,
}

impl RealtimeEventHandler {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Broadcasts one stock delta and, when a threshold was crossed, sends
    /// the matching alert to the owner's sessions.
    fn push_inventory_change(&self, owner_id: &Id, change: &InventoryChange) {
        self.hub.broadcast_inventory_update(change.clone());

        if let Some(alert) = stock_alert(change) {
            let report = self.hub.send_to_user(&owner_id.to_string(), alert);
            debug!(
                "Routed stock alert for product {} to owner {} ({} delivered)",
                change.product_id, owner_id, report.delivered
            );
        }
    }
}

#[async_trait]
impl EventHandler for RealtimeEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::SaleCompleted {
                sale,
                owner_id,
                inventory_changes,
            } => {
                debug!(
                    "Handling SaleCompleted event ({} inventory change(s))",
                    inventory_changes.len()
                );

                self.hub.broadcast_sale(sale.clone());

                for change in inventory_changes {
                    self.push_inventory_change(owner_id, change);
                }
            }

            DomainEvent::InventoryAdjusted { owner_id, change } => {
                debug!(
                    "Handling InventoryAdjusted event for product {}",
                    change.product_id
                );

                self.push_inventory_change(owner_id, change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::protocol::{EventPayload, ServerMessage, Severity};
    use events::EventPublisher;
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn setup(owner: &Id) -> (Arc<Hub>, EventPublisher, UnboundedReceiver<ServerMessage>) {
        let hub = Arc::new(Hub::new());
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register_connection(owner.to_string(), tx);

        let publisher =
            EventPublisher::new().with_handler(Arc::new(RealtimeEventHandler::new(hub.clone())));

        (hub, publisher, rx)
    }

    fn change(stock: i64, previous_stock: i64) -> InventoryChange {
        InventoryChange {
            product_id: Id::new_v4(),
            name: "Oat Milk".to_string(),
            stock,
            previous_stock,
            change: stock - previous_stock,
            reason: "sale".to_string(),
            sale_id: None,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn sale_lifecycle_broadcasts_and_warns_the_owner() {
        let owner = Id::new_v4();
        let (_hub, publisher, mut rx) = setup(&owner);

        publisher
            .publish(DomainEvent::SaleCompleted {
                sale: json!({"id": "sale-1", "amount": 120.5}),
                owner_id: owner,
                inventory_changes: vec![change(3, 5)],
            })
            .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);

        assert!(matches!(messages[0], ServerMessage::SaleUpdate(_)));
        assert!(matches!(messages[1], ServerMessage::InventoryUpdate(_)));

        match &messages[2] {
            ServerMessage::Notification(envelope) => match &envelope.payload {
                EventPayload::LowStock(alert) => {
                    assert_eq!(alert.severity, Severity::Warning);
                    assert_eq!(alert.current_stock, 3);
                }
                other => panic!("expected low_stock, got {other:?}"),
            },
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_stock_raises_an_urgent_alert() {
        let owner = Id::new_v4();
        let (_hub, publisher, mut rx) = setup(&owner);

        publisher
            .publish(DomainEvent::InventoryAdjusted {
                owner_id: owner,
                change: change(0, 2),
            })
            .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);

        match &messages[1] {
            ServerMessage::Notification(envelope) => match &envelope.payload {
                EventPayload::StockOut(alert) => {
                    assert_eq!(alert.severity, Severity::Urgent);
                    assert_eq!(alert.current_stock, 0);
                }
                other => panic!("expected stock_out, got {other:?}"),
            },
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn healthy_stock_produces_no_alert() {
        let owner = Id::new_v4();
        let (_hub, publisher, mut rx) = setup(&owner);

        publisher
            .publish(DomainEvent::SaleCompleted {
                sale: json!({"id": "sale-2", "amount": 8.0}),
                owner_id: owner,
                inventory_changes: vec![change(6, 7)],
            })
            .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ServerMessage::SaleUpdate(_)));
        assert!(matches!(messages[1], ServerMessage::InventoryUpdate(_)));
    }

    #[tokio::test]
    async fn alerts_go_only_to_the_owner() {
        let owner = Id::new_v4();
        let (hub, publisher, mut owner_rx) = setup(&owner);

        let (tx, mut other_rx) = mpsc::unbounded_channel();
        hub.register_connection("someone-else".to_string(), tx);

        publisher
            .publish(DomainEvent::InventoryAdjusted {
                owner_id: owner,
                change: change(2, 3),
            })
            .await;

        // Everyone sees the inventory broadcast, only the owner sees the alert.
        let owner_messages = drain(&mut owner_rx);
        let other_messages = drain(&mut other_rx);

        assert!(owner_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::Notification(_))));
        assert!(!other_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::Notification(_))));
        assert!(other_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::InventoryUpdate(_))));
    }
}
