//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{Concept, ErrorResponse, Persona, Session, SwitchModePayload, Usage},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, patch},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_concepts,
        handlers::get_concept,
        handlers::list_personas,
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::switch_session_mode,
        handlers::delete_session,
    ),
    components(
        schemas(Concept, Persona, Session, Usage, SwitchModePayload, ErrorResponse)
    ),
    tags(
        (name = "Teach-back API", description = "Concepts, personas and live sessions for the voice tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/concepts", get(handlers::list_concepts))
        .route("/concepts/{id}", get(handlers::get_concept))
        .route("/personas", get(handlers::list_personas))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/mode", patch(handlers::switch_session_mode))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
