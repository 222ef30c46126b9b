//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! Speech is handled by the client: it sends transcribed text and speaks
//! responses with the voice named in `initialized` and `mode_changed`.

use serde::{Deserialize, Serialize};
use teachback_core::{agent::ConceptListing, mode::Mode};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a session, or attaches to one created through the REST API.
    /// This must be the first message.
    Init { session_id: Option<Uuid> },
    /// A (transcribed) utterance from the user.
    UserMessage { text: String },
    /// A mode switch requested directly by the UI rather than by the model.
    SwitchMode { mode: String },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session and describes the starting persona.
    Initialized {
        session_id: Uuid,
        mode: Mode,
        voice: String,
        concepts: Vec<ConceptListing>,
    },
    /// The session was handed to another persona; speak with `voice` from now on.
    ModeChanged { from: Mode, to: Mode, voice: String },
    /// Reports an error to the client. The session stays open.
    Error { message: String },
    /// Signals the beginning of a text response from the tutor.
    ResponseStart,
    /// A chunk of a text response.
    ResponseChunk { chunk: String },
    /// Signals the end of a text response.
    ResponseEnd,
}
