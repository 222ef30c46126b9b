//! Manages the WebSocket connection lifecycle for a tutoring session.

use super::{
    cycle::handle_turn,
    protocol::{ClientMessage, ServerMessage},
};
use crate::{
    sessions::{Attachment, SessionHandle},
    state::AppState,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rmcp::ServiceExt;
use std::sync::Arc;
use teachback_core::{
    agent::{TutorService, concept_listing},
    mode::Handoff,
};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{Instrument, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake to create or attach to a session, then
/// spawns the session loop.
#[instrument(name = "ws_connection", skip_all, fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id.to_string());
    info!("New WebSocket connection. Awaiting initialization...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be an `init` message.
    let initialized = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => initialize_session(&text, &state).await,
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        Some(Err(e)) => Err(anyhow!(e).context("Failed to read init message")),
        None => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let (handle, attachment) = match initialized {
        Ok(attached) => attached,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let session_span = tracing::info_span!("tutor_session", session_id = %handle.id);
    tokio::spawn(
        serve_session(state, socket_tx, socket_rx, handle, attachment).instrument(session_span),
    );
}

/// Parses the `init` message and creates or attaches to the session.
///
/// A session serves one connection at a time; attaching to a session that
/// already has one is refused.
async fn initialize_session(
    init_text: &str,
    state: &AppState,
) -> Result<(SessionHandle, Attachment)> {
    let init_msg: ClientMessage = serde_json::from_str(init_text)?;
    let ClientMessage::Init { session_id } = init_msg else {
        return Err(anyhow!("First message must be `init`"));
    };

    let handle = match session_id {
        Some(id) => {
            info!(session_id = %id, "Attaching to existing session");
            state
                .sessions
                .get(id)
                .await
                .with_context(|| format!("Session with id '{}' not found", id))?
        }
        None => {
            let handle = state.sessions.create().await;
            info!(session_id = %handle.id, "Created new session");
            handle
        }
    };
    let attachment = handle
        .attach()
        .with_context(|| format!("Session '{}' already has a connected client", handle.id))?;
    Ok((handle, attachment))
}

/// Runs an attached session to completion, then removes it from the registry.
async fn serve_session<S, R, E>(
    state: Arc<AppState>,
    mut socket_tx: S,
    socket_rx: R,
    handle: SessionHandle,
    _attachment: Attachment,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Debug,
{
    // Subscribe before announcing the mode so no later switch is missed.
    let (mode, mut handoffs) = {
        let tutor = handle.tutor_state.lock().await;
        (tutor.mode, tutor.subscribe())
    };
    let initialized = ServerMessage::Initialized {
        session_id: handle.id,
        mode,
        voice: state.personas.get(mode).voice.clone(),
        concepts: concept_listing(&state.concepts),
    };

    let result = match send_msg(&mut socket_tx, initialized).await {
        Ok(()) => {
            run_tutor_session(&state, &mut socket_tx, socket_rx, &handle, &mut handoffs).await
        }
        Err(e) => Err(e.context("Failed to send Initialized message")),
    };
    if let Err(e) = result {
        error!(error = ?e, "Tutor session terminated with error.");
    }

    // The session ends with its transport.
    state.sessions.remove(handle.id).await;
    let summary = handle.snapshot().await.state;
    info!(mode = %summary.mode, usage = ?summary.usage, "Tutor session finished.");
}

/// The main event loop for an active tutoring session.
///
/// One user message is processed at a time; the loop does not read the next
/// message until the current turn has been answered. Handoffs made outside a
/// turn (over REST) are forwarded as they happen.
async fn run_tutor_session<S, R, E>(
    state: &AppState,
    socket_tx: &mut S,
    mut socket_rx: R,
    handle: &SessionHandle,
    handoffs: &mut broadcast::Receiver<Handoff>,
) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Debug,
{
    let tutor_service = TutorService::new(state.concepts.clone(), handle.tutor_state.clone());
    let (server_transport, client_transport) = tokio::io::duplex(4096);

    // Spawn the session's tool service.
    let tool_handle = tokio::spawn(async move {
        if let Ok(service) = tutor_service.serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });
    let mcp_client = ().serve(client_transport).await?;

    let mut history = Vec::new();

    loop {
        tokio::select! {
            incoming = socket_rx.next() => {
                let ws_msg = match incoming {
                    Some(Ok(ws_msg)) => ws_msg,
                    Some(Err(e)) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                    None => break,
                };
                match ws_msg {
                    Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::UserMessage { text }) => {
                            let turn = handle_turn(
                                state,
                                &handle.tutor_state,
                                &mcp_client,
                                &mut history,
                                &text,
                            )
                            .await;
                            // Handoffs from this turn go out before its reply or error.
                            flush_handoffs(socket_tx, state, handoffs).await?;
                            match turn {
                                Ok(response) => send_reply(socket_tx, response).await?,
                                Err(e) => {
                                    error!(error = ?e, "Turn failed");
                                    send_msg(
                                        socket_tx,
                                        ServerMessage::Error {
                                            message: format!("The tutor could not respond: {}", e),
                                        },
                                    )
                                    .await?;
                                }
                            }
                        }
                        Ok(ClientMessage::SwitchMode { mode }) => {
                            let switched = handle.tutor_state.lock().await.switch(&mode);
                            match switched {
                                Ok(handoff) => {
                                    info!(from = %handoff.from, to = %handoff.to, "Persona handoff requested by client");
                                    flush_handoffs(socket_tx, state, handoffs).await?;
                                }
                                Err(e) => {
                                    warn!(requested = %mode, "Rejected switch to unknown mode");
                                    send_msg(
                                        socket_tx,
                                        ServerMessage::Error {
                                            message: e.to_string(),
                                        },
                                    )
                                    .await?;
                                }
                            }
                        }
                        Ok(ClientMessage::Init { .. }) => warn!("Ignoring repeated `init` message."),
                        Err(e) => warn!(error = %e, "Ignoring malformed client message."),
                    },
                    Message::Binary(_) => {
                        warn!("Received binary data; speech must be transcribed by the client.")
                    }
                    Message::Close(_) => {
                        info!("Client sent close frame. Shutting down session.");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            received = handoffs.recv() => match received {
                Ok(handoff) => send_handoff(socket_tx, state, handoff).await?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed handoff notifications"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tool_handle.abort();
    info!("WebSocket connection closed and tutor session terminated.");
    Ok(())
}

/// Sends every handoff published since the last one forwarded.
async fn flush_handoffs<S>(
    socket_tx: &mut S,
    state: &AppState,
    handoffs: &mut broadcast::Receiver<Handoff>,
) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    loop {
        match handoffs.try_recv() {
            Ok(handoff) => send_handoff(socket_tx, state, handoff).await?,
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "Missed handoff notifications"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
        }
    }
}

async fn send_handoff<S>(socket_tx: &mut S, state: &AppState, handoff: Handoff) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    send_msg(
        socket_tx,
        ServerMessage::ModeChanged {
            from: handoff.from,
            to: handoff.to,
            voice: state.personas.get(handoff.to).voice.clone(),
        },
    )
    .await
}

async fn send_reply<S>(socket_tx: &mut S, response: String) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    send_msg(socket_tx, ServerMessage::ResponseStart).await?;
    send_msg(socket_tx, ServerMessage::ResponseChunk { chunk: response }).await?;
    send_msg(socket_tx, ServerMessage::ResponseEnd).await
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg<S>(socket_tx: &mut S, msg: ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
