//! Main Entrypoint for the Teach-back API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the concept content and persona prompts.
//! 3. Initializing the shared LLM client and session registry.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc};
use teachback_api::{
    config::{Config, load_prompts},
    router::create_router,
    sessions::SessionRegistry,
    state::AppState,
};
use teachback_core::{
    concept::ConceptStore,
    llm_client::{LLMClient, OpenAICompatibleClient},
    persona::PersonaSet,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Content and Personas ---
    let concepts = Arc::new(
        ConceptStore::from_path(&config.content_path).context("Failed to load concepts")?,
    );
    let prompts = load_prompts(&config.prompts_path)?;
    let personas = Arc::new(PersonaSet::new(&config.voices, &prompts, &concepts));
    info!(
        concepts = concepts.len(),
        custom_prompts = prompts.len(),
        "Content and personas ready."
    );

    // --- 4. Initialize Shared Services ---
    info!(provider = ?config.provider, "Using LLM provider.");
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.api_key)
        .with_api_base(config.provider.api_base());
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));
    let sessions = Arc::new(SessionRegistry::new());

    let app_state = Arc::new(AppState {
        concepts,
        personas,
        llm_client,
        sessions: sessions.clone(),
    });
    let _expiry = sessions.spawn_expiry(config.session_idle_timeout);

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let usage = sessions.total_usage().await;
    info!(usage = ?usage, "Server has shut down.");
    Ok(())
}
