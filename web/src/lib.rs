//! HTTP surface for the realtime gateway.
//!
//! This crate contains only the Axum router and the WebSocket endpoint.
//! The core realtime infrastructure (Hub, ConnectionRegistry, message
//! types) lives in the `realtime` and `events` crates to avoid circular
//! dependencies.

use events::EventPublisher;
use realtime::Hub;
use service::config::Config;
use std::sync::Arc;

pub mod router;
pub mod ws;

/// Application state shared by all handlers.
/// Needs to implement Clone to be able to be passed into Router as State.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<Hub>,
    /// Handed to the CRUD layer so committed writes reach the hub; kept in
    /// state so embedding callers share one instance.
    pub event_publisher: EventPublisher,
}

impl AppState {
    pub fn new(config: Arc<Config>, hub: Arc<Hub>, event_publisher: EventPublisher) -> Self {
        Self {
            config,
            hub,
            event_publisher,
        }
    }
}
