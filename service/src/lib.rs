//! Service-level infrastructure: process configuration and logging.
//!
//! Nothing in this crate knows about the realtime layer; it only provides
//! the settings and the logger that the binary wires together at startup.

pub mod config;
pub mod logging;
