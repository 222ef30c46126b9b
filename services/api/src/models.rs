//! API Models
//!
//! This module defines the JSON shapes of the REST API and their OpenAPI
//! schemas. Core types are mapped into these views so the core crate stays
//! free of HTTP concerns.

use crate::sessions::SessionSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teachback_core::{agent::UsageSummary, concept::ConceptRecord, persona::ModeConfig};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    #[schema(example = "loops")]
    pub id: String,
    #[schema(example = "Loops")]
    pub title: String,
    pub summary: String,
    pub sample_question: String,
}

impl From<&ConceptRecord> for Concept {
    fn from(record: &ConceptRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            summary: record.summary.clone(),
            sample_question: record.sample_question.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct Persona {
    #[schema(example = "quiz")]
    pub mode: String,
    #[schema(example = "en-US-alicia")]
    pub voice: String,
    #[schema(example = json!(["get_quiz_question", "list_concepts", "switch_mode"]))]
    pub tools: Vec<String>,
}

impl From<&ModeConfig> for Persona {
    fn from(config: &ModeConfig) -> Self {
        Self {
            mode: config.mode.to_string(),
            voice: config.voice.clone(),
            tools: config.tools.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub turns: u32,
    pub tool_calls: u32,
    pub handoffs: u32,
    pub failed_lookups: u32,
}

impl From<UsageSummary> for Usage {
    fn from(usage: UsageSummary) -> Self {
        Self {
            turns: usage.turns,
            tool_calls: usage.tool_calls,
            handoffs: usage.handoffs,
            failed_lookups: usage.failed_lookups,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct Session {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "greeter")]
    pub mode: String,
    pub created_at: DateTime<Utc>,
    pub usage: Usage,
}

impl From<SessionSnapshot> for Session {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            mode: snapshot.state.mode.to_string(),
            created_at: snapshot.created_at,
            usage: snapshot.state.usage.into(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SwitchModePayload {
    #[schema(example = "teach_back")]
    pub mode: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
