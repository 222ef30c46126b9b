//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the read-only content and personas, the LLM client and
//! the registry of live sessions.

use crate::sessions::SessionRegistry;
use std::sync::Arc;
use teachback_core::{concept::ConceptStore, llm_client::LLMClient, persona::PersonaSet};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub concepts: Arc<ConceptStore>,
    pub personas: Arc<PersonaSet>,
    pub llm_client: Arc<dyn LLMClient>,
    pub sessions: Arc<SessionRegistry>,
}
