//! Event system infrastructure for the POS realtime platform.
//!
//! This crate provides the event system that enables loose coupling between
//! the CRUD/domain layer and the realtime push infrastructure, plus the
//! typed wire protocol spoken between the Event Hub and its clients.
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing business events the CRUD layer emits
//!   after a write commits (sale completed, inventory adjusted)
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//! - **protocol**: The WebSocket message catalogue (envelopes, sync payloads,
//!   client/server messages) as closed tagged unions
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Sale records are carried as serialized JSON values; the
//! structured parts of the contract (inventory changes, stock alerts) are
//! strongly typed in [`protocol`].

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub mod protocol;

/// A type alias for the internal id data type of products, sales and owners.
pub type Id = Uuid;

/// Domain events that represent business-level changes in the system.
/// These events are emitted when CRUD operations complete successfully.
///
/// Events include the owner's user ID for notification routing. The CRUD
/// layer is responsible for determining the owner; the realtime layer only
/// routes.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Emitted after a sale has been persisted. Triggers a `sale_update`
    /// broadcast, one `inventory_update` broadcast per affected product and,
    /// when a product crossed a stock threshold, a targeted notification to
    /// the shop owner.
    SaleCompleted {
        /// Complete serialized sale record (id, amount, line items, ...).
        /// Sent to clients so dashboards update without a separate fetch.
        sale: serde_json::Value,
        /// User ID of the shop owner to receive stock alerts.
        owner_id: Id,
        /// Stock deltas caused by this sale, one per affected product.
        inventory_changes: Vec<protocol::InventoryChange>,
    },
    /// Emitted after a manual stock adjustment outside of a sale
    /// (restock, correction, damaged goods write-off).
    InventoryAdjusted {
        /// User ID of the shop owner to receive stock alerts.
        owner_id: Id,
        /// The stock delta that was applied.
        change: protocol::InventoryChange,
    },
}

/// Trait for handling domain events.
/// Implementations can perform side effects like pushing realtime
/// notifications, updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers.
    /// Handlers are called sequentially; delivery to one handler never
    /// depends on the outcome of another.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
