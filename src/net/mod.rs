//! Networking boundary: backend REST, realtime transport, and wire types.
//!
//! SYSTEM CONTEXT
//! ==============
//! `api` performs authoritative lookups, `transport` defines the push channel
//! surface, and `types` holds the shared schema.

pub mod api;
pub mod transport;
pub mod types;
