//! Client-side state for a shared map with POIs, presence and POI-scoped calls.
//!
//! SYSTEM CONTEXT
//! ==============
//! The realtime socket, the HTTP backend and the media engine are all
//! external. This crate owns what the client believes: who it is, which POI
//! it sits in, who else is around, and the single live call.
//!
//! Data flow: transport events go through `session::ClientSession::apply_event`
//! into the presence store, with call work handed back as a future over the
//! shared call manager; user intents go through `ClientSession` methods into
//! the stores and out through `Transport`.

pub mod cache;
pub mod call;
pub mod config;
pub mod error;
pub mod identity;
pub mod net;
pub mod presence;
pub mod session;
pub mod storage;

#[cfg(test)]
#[path = "doubles_test.rs"]
pub(crate) mod doubles;
