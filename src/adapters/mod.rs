//! Adapters Layer
//!
//! Inbound: the operational stats HTTP server.
//! Outbound: remote cache store implementations.

pub mod inbound;
pub mod outbound;
