//! WebSocket endpoint for the web layer.
//!
//! Only the Axum handler and the per-socket pump live here; connection
//! tracking and routing belong to the `realtime` crate.

pub mod handler;
