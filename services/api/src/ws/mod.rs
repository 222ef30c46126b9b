//! WebSocket Session Management
//!
//! This module contains the logic for running tutoring sessions over
//! WebSockets. It is structured into submodules for clarity:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from handshake to termination.
//! - `cycle`: Runs one user turn through the active persona, including tool calls and handoffs.

mod cycle;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
