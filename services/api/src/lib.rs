//! Teach-back API Library Crate
//!
//! This library contains the web-facing half of the tutor: configuration,
//! the in-memory session registry, REST handlers, the WebSocket conversation
//! loop, and routing. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod sessions;
pub mod state;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;
