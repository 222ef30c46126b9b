//! Axum Handlers for the REST API
//!
//! Read-only views of the concept collection and personas, plus management of
//! live tutoring sessions. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{Concept, ErrorResponse, Persona, Session, SwitchModePayload},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn session_not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Session with id '{}' not found", id))
}

/// List every concept the tutor can teach, in content-file order.
#[utoipa::path(
    get,
    path = "/concepts",
    responses(
        (status = 200, description = "All concepts", body = [Concept])
    )
)]
pub async fn list_concepts(State(state): State<Arc<AppState>>) -> Json<Vec<Concept>> {
    Json(state.concepts.records().iter().map(Concept::from).collect())
}

/// Get a single concept by its id (exact match).
#[utoipa::path(
    get,
    path = "/concepts/{id}",
    responses(
        (status = 200, description = "Concept details", body = Concept),
        (status = 404, description = "Concept not found", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Concept id")
    )
)]
pub async fn get_concept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Concept>, ApiError> {
    let record = state
        .concepts
        .lookup(&id)
        .map_err(|not_found| ApiError::NotFound(not_found.to_string()))?;
    Ok(Json(Concept::from(record)))
}

/// List the four personas with their voices and exposed tools.
#[utoipa::path(
    get,
    path = "/personas",
    responses(
        (status = 200, description = "All personas", body = [Persona])
    )
)]
pub async fn list_personas(State(state): State<Arc<AppState>>) -> Json<Vec<Persona>> {
    Json(state.personas.iter().map(Persona::from).collect())
}

/// Start a new tutoring session. Sessions always begin with the greeter.
///
/// A session nobody attaches to over `/ws` expires after
/// `SESSION_IDLE_TIMEOUT_SECS`.
#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created successfully", body = Session)
    )
)]
pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let handle = state.sessions.create().await;
    info!(session_id = %handle.id, "Session created");
    (
        StatusCode::CREATED,
        Json(Session::from(handle.snapshot().await)),
    )
}

/// List all live sessions.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [Session])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    Json(
        state
            .sessions
            .list()
            .await
            .into_iter()
            .map(Session::from)
            .collect(),
    )
}

/// Get a specific session by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    let handle = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| session_not_found(id))?;
    Ok(Json(Session::from(handle.snapshot().await)))
}

/// Switch a session to another mode. An unknown mode leaves the session unchanged.
///
/// A connected client is sent `mode_changed`.
#[utoipa::path(
    patch,
    path = "/sessions/{id}/mode",
    request_body = SwitchModePayload,
    responses(
        (status = 200, description = "Mode switched", body = Session),
        (status = 400, description = "Unknown mode", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn switch_session_mode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SwitchModePayload>,
) -> Result<Json<Session>, ApiError> {
    let handle = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| session_not_found(id))?;

    let handoff = handle
        .tutor_state
        .lock()
        .await
        .switch(&payload.mode)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    info!(session_id = %id, from = %handoff.from, to = %handoff.to, "Persona handoff via API");

    Ok(Json(Session::from(handle.snapshot().await)))
}

/// End a session.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session ended"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let handle = state
        .sessions
        .remove(id)
        .await
        .ok_or_else(|| session_not_found(id))?;
    let snapshot = handle.snapshot().await;
    info!(session_id = %id, mode = %snapshot.state.mode, usage = ?snapshot.state.usage, "Session ended");
    Ok(StatusCode::NO_CONTENT)
}
