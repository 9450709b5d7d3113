//! Consumer-side realtime client.
//!
//! [`client::RealtimeClient`] owns a reconnecting WebSocket session against
//! the gateway, fans received envelopes out to registered subscribers and
//! tracks connection lifecycle state. [`views`] layers small presentation
//! helpers (live metrics, presence counter, status badge) on top of the raw
//! event feed.

pub mod client;
pub mod error;
pub mod subscription;
pub mod views;

pub use client::{ClientEvent, ClientOptions, ClientStatus, ConnectionState, RealtimeClient};
pub use error::Error;
pub use subscription::{EventKind, Subscription};

/// Locks a mutex, recovering the data if a subscriber panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
