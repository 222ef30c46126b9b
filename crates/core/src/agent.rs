//! Tutor Agent Service
//!
//! This module implements the tools the tutoring personas call through the
//! Model Context Protocol: content lookups over the shared concept store and
//! the mode switch that hands the session to another persona. One service is
//! created per session; the concept store is shared by all of them.

use crate::concept::{ConceptRecord, ConceptStore};
use crate::mode::{Handoff, Mode, ModeError};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

// --- Session State ---

/// Per-session counters, logged when the session ends.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSummary {
    pub turns: u32,
    pub tool_calls: u32,
    pub handoffs: u32,
    pub failed_lookups: u32,
}

impl AddAssign for UsageSummary {
    fn add_assign(&mut self, other: Self) {
        self.turns += other.turns;
        self.tool_calls += other.tool_calls;
        self.handoffs += other.handoffs;
        self.failed_lookups += other.failed_lookups;
    }
}

const HANDOFF_CHANNEL_CAPACITY: usize = 16;

/// The mutable part of a tutoring session: which persona is active.
///
/// Every successful switch is published to subscribers, whichever path made
/// it (a tool call, a client frame or the REST API).
#[derive(Serialize, Debug, Clone)]
pub struct TutorState {
    pub mode: Mode,
    pub usage: UsageSummary,
    #[serde(skip)]
    handoffs: broadcast::Sender<Handoff>,
}

impl Default for TutorState {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

impl TutorState {
    pub fn new(mode: Mode) -> Self {
        let (handoffs, _) = broadcast::channel(HANDOFF_CHANNEL_CAPACITY);
        Self {
            mode,
            usage: UsageSummary::default(),
            handoffs,
        }
    }

    /// Receives every handoff made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Handoff> {
        self.handoffs.subscribe()
    }

    /// Moves the session to `requested`. On error the active mode is left untouched.
    pub fn switch(&mut self, requested: &str) -> Result<Handoff, ModeError> {
        let to = self.mode.transition(requested)?;
        let handoff = Handoff {
            from: self.mode,
            to,
        };
        self.mode = to;
        self.usage.handoffs += 1;
        // No subscribers is fine.
        let _ = self.handoffs.send(handoff);
        Ok(handoff)
    }
}

// --- Tool Arguments and Results ---

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ConceptArgs {
    /// Identifier of the concept, exactly as listed (e.g. 'loops').
    #[schemars(description = "The concept id, exactly as listed (e.g. 'loops')")]
    pub concept_id: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ModeArgs {
    /// Target mode name.
    #[schemars(description = "The mode to switch to: 'greeter', 'learn', 'quiz', or 'teach_back'")]
    pub mode: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ConceptSummary {
    pub id: String,
    pub title: String,
    pub summary: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct QuizQuestion {
    pub id: String,
    pub title: String,
    pub sample_question: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ConceptReference {
    pub id: String,
    pub title: String,
    pub reference_summary: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConceptListing {
    pub id: String,
    pub title: String,
}

/// Ids and titles of every concept, in content-file order.
pub fn concept_listing(concepts: &ConceptStore) -> Vec<ConceptListing> {
    concepts
        .records()
        .iter()
        .map(|record| ConceptListing {
            id: record.id.clone(),
            title: record.title.clone(),
        })
        .collect()
}

// --- Service and Handler Implementation ---

/// Tool server for a single tutoring session.
pub struct TutorService {
    /// Read-only content shared by every session.
    pub concepts: Arc<ConceptStore>,
    /// This session's persona state, also read by the turn loop after tool calls.
    pub tutor_state: Arc<Mutex<TutorState>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for TutorService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl TutorService {
    pub fn new(concepts: Arc<ConceptStore>, tutor_state: Arc<Mutex<TutorState>>) -> Self {
        Self {
            concepts,
            tutor_state,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Hand the conversation to one of the tutoring modes: 'learn', 'quiz', or 'teach_back'."
    )]
    pub async fn switch_to_mode(&self, args: Parameters<ModeArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'switch_to_mode'");
        self.handoff(&args.0.mode).await
    }

    #[tool(
        description = "Switch the session to another mode: 'greeter', 'learn', 'quiz', or 'teach_back'."
    )]
    pub async fn switch_mode(&self, args: Parameters<ModeArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'switch_mode'");
        self.handoff(&args.0.mode).await
    }

    /// Learn mode: the explanation to teach from.
    #[tool(description = "Get the title and summary of a concept so it can be explained to the user.")]
    pub async fn get_concept(&self, args: Parameters<ConceptArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_concept'");
        self.lookup(&args.0.concept_id, |record| ConceptSummary {
            id: record.id.clone(),
            title: record.title.clone(),
            summary: record.summary.clone(),
        })
        .await
    }

    /// Quiz mode: the question to ask.
    #[tool(description = "Get the sample quiz question for a concept.")]
    pub async fn get_quiz_question(
        &self,
        args: Parameters<ConceptArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_quiz_question'");
        self.lookup(&args.0.concept_id, |record| QuizQuestion {
            id: record.id.clone(),
            title: record.title.clone(),
            sample_question: record.sample_question.clone(),
        })
        .await
    }

    /// Teach-back mode: the reference the user's explanation is compared against.
    #[tool(
        description = "Get the reference summary of a concept to compare against the user's own explanation."
    )]
    pub async fn get_concept_reference(
        &self,
        args: Parameters<ConceptArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_concept_reference'");
        self.lookup(&args.0.concept_id, |record| ConceptReference {
            id: record.id.clone(),
            title: record.title.clone(),
            reference_summary: record.summary.clone(),
        })
        .await
    }

    #[tool(description = "List the ids and titles of every concept the tutor can teach.")]
    pub async fn list_concepts(&self) -> Result<String, String> {
        info!("Executing tool 'list_concepts'");
        self.tutor_state.lock().await.usage.tool_calls += 1;
        serde_json::to_string(&concept_listing(&self.concepts))
            .map_err(|e| format!("Failed to serialize concepts: {}", e))
    }
}

impl TutorService {
    async fn handoff(&self, requested: &str) -> Result<String, String> {
        let mut state = self.tutor_state.lock().await;
        state.usage.tool_calls += 1;
        match state.switch(requested) {
            Ok(handoff) => {
                info!(from = %handoff.from, to = %handoff.to, "Persona handoff");
                Ok(format!(
                    "OK. Switched from {} mode to {} mode. Continue the conversation as the {} persona.",
                    handoff.from, handoff.to, handoff.to
                ))
            }
            Err(e) => {
                warn!(requested, mode = %state.mode, "Rejected switch to unknown mode");
                Err(e.to_string())
            }
        }
    }

    async fn lookup<V, F>(&self, concept_id: &str, view: F) -> Result<String, String>
    where
        V: Serialize,
        F: FnOnce(&ConceptRecord) -> V,
    {
        let found = self.concepts.lookup(concept_id).map(view);
        let mut state = self.tutor_state.lock().await;
        state.usage.tool_calls += 1;
        match found {
            Ok(value) => serde_json::to_string(&value)
                .map_err(|e| format!("Failed to serialize concept: {}", e)),
            Err(not_found) => {
                state.usage.failed_lookups += 1;
                warn!(concept_id, mode = %state.mode, "Concept not found");
                Err(not_found.to_string())
            }
        }
    }
}
