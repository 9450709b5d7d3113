//! Realtime WebSocket infrastructure for pushing sale and inventory events
//! to authenticated POS clients.
//!
//! # Architecture
//!
//! - **Explicit lifecycle**: the [`Hub`] is a constructed, injected instance
//!   (`new → attach to router → … → close`), never a module-level
//!   singleton, so independent instances can coexist in tests.
//! - **Dual-index registry**: O(1) lookups for both connection management
//!   and identity-scoped routing via separate DashMap indices; the identity
//!   index doubles as the per-identity room every connection auto-joins.
//! - **Named rooms**: arbitrary broadcast scopes created lazily on first
//!   join and cleaned up when their last member leaves.
//! - **Ephemeral events**: nothing is persisted; a client that is offline
//!   misses the event and sees fresh data on its next CRUD fetch.
//! - **Stamped envelopes**: `eventId`, `seq` and `timestamp` are assigned
//!   hub-side before fan-out, so every recipient observes identical
//!   ordering metadata.
//! - **Best-effort delivery**: pushes are fire-and-forget. A dead recipient
//!   is logged and counted in the returned [`DeliveryReport`]; it never
//!   fails the caller and never blocks delivery to the remaining
//!   recipients.
//!
//! # Message Flow
//!
//! 1. Client opens `/ws` with its bearer token in the handshake query
//! 2. The web layer verifies the token (see [`auth`]) before the upgrade
//! 3. The socket task registers an outbound channel with the [`Hub`]
//! 4. When a CRUD write commits, the CRUD layer publishes a
//!    [`events::DomainEvent`]; [`RealtimeEventHandler`] maps it to hub
//!    pushes (broadcasts plus owner-targeted stock alerts)
//! 5. The socket task serializes each [`events::protocol::ServerMessage`]
//!    onto the wire
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry with dual-index architecture, room
//!   membership and type-safe ConnectionId
//! - `hub`: envelope stamping and high-level push primitives
//! - `auth`: HS256 handshake credential verification
//! - `domain_event_handler`: bridge from domain events to hub pushes
//! - `error`: error tree for this layer

pub mod auth;
pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod hub;

pub use connection::{ConnectionId, ConnectionRegistry, DeliveryReport};
pub use domain_event_handler::RealtimeEventHandler;
pub use hub::Hub;
