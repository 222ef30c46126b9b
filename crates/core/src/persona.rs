//! Persona Configuration
//!
//! Each [`Mode`] is voiced by a persona: a provider voice id, a system prompt
//! and the subset of tools the language model may call while that persona is
//! active. The four personas are built once at startup from prompt templates
//! and the loaded concept collection.

use crate::concept::ConceptStore;
use crate::mode::{Mode, VALID_MODES};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

pub const SWITCH_TO_MODE: &str = "switch_to_mode";
pub const SWITCH_MODE: &str = "switch_mode";
pub const GET_CONCEPT: &str = "get_concept";
pub const GET_QUIZ_QUESTION: &str = "get_quiz_question";
pub const GET_CONCEPT_REFERENCE: &str = "get_concept_reference";
pub const LIST_CONCEPTS: &str = "list_concepts";

const DEFAULT_GREETER_PROMPT: &str = r#"You are the front desk of a programming tutor that teaches by having the learner teach back.
Greet the user warmly and explain the three ways to study: learn, quiz, and teach_back.
Ask which mode they want and which concept they would like to work on, then call switch_to_mode.
Available concepts:
{concepts}
Keep replies short and conversational, without formatting, emojis or asterisks."#;

const DEFAULT_LEARN_PROMPT: &str = r#"You are a patient programming tutor in learn mode.
When the user names a concept, call get_concept and explain it using its summary, then check they followed.
If a concept is not found, offer the user the available concepts instead.
Available concepts:
{concepts}
When the user wants a different mode, call switch_mode with one of: {modes}.
Keep replies short and conversational, without formatting, emojis or asterisks."#;

const DEFAULT_QUIZ_PROMPT: &str = r#"You are an upbeat quiz master for programming concepts.
Call get_quiz_question for the concept the user picks, ask the question, and give brief feedback on the answer.
If a concept is not found, offer the user the available concepts instead.
Available concepts:
{concepts}
When the user wants a different mode, call switch_mode with one of: {modes}.
Keep replies short and conversational, without formatting, emojis or asterisks."#;

const DEFAULT_TEACH_BACK_PROMPT: &str = r#"You are a curious student. The user teaches you a programming concept.
Ask them to explain the concept in their own words. Call get_concept_reference to compare their explanation with the reference,
then tell them what they got right, what they missed, and give a score from 1 to 10.
If a concept is not found, offer the user the available concepts instead.
Available concepts:
{concepts}
When the user wants a different mode, call switch_mode with one of: {modes}.
Keep replies short and conversational, without formatting, emojis or asterisks."#;

/// Provider voice ids for the teaching modes. The greeter speaks with the learn voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSet {
    pub learn: String,
    pub quiz: String,
    pub teach_back: String,
}

impl Default for VoiceSet {
    fn default() -> Self {
        Self {
            learn: "en-US-matthew".to_string(),
            quiz: "en-US-alicia".to_string(),
            teach_back: "en-US-ken".to_string(),
        }
    }
}

impl VoiceSet {
    pub fn for_mode(&self, mode: Mode) -> &str {
        match mode {
            Mode::Greeter | Mode::Learn => &self.learn,
            Mode::Quiz => &self.quiz,
            Mode::TeachBack => &self.teach_back,
        }
    }
}

/// The full configuration of one persona.
#[derive(Debug, Clone, Serialize)]
pub struct ModeConfig {
    pub mode: Mode,
    pub voice: String,
    pub instructions: String,
    pub tools: &'static [&'static str],
}

impl ModeConfig {
    /// Whether the language model may call `tool` while this persona is active.
    pub fn exposes(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| *t == tool)
    }
}

/// Tool names exposed to the language model in each mode.
pub fn tools_for(mode: Mode) -> &'static [&'static str] {
    match mode {
        Mode::Greeter => &[SWITCH_TO_MODE, LIST_CONCEPTS],
        Mode::Learn => &[GET_CONCEPT, LIST_CONCEPTS, SWITCH_MODE],
        Mode::Quiz => &[GET_QUIZ_QUESTION, LIST_CONCEPTS, SWITCH_MODE],
        Mode::TeachBack => &[GET_CONCEPT_REFERENCE, LIST_CONCEPTS, SWITCH_MODE],
    }
}

fn default_template(mode: Mode) -> &'static str {
    match mode {
        Mode::Greeter => DEFAULT_GREETER_PROMPT,
        Mode::Learn => DEFAULT_LEARN_PROMPT,
        Mode::Quiz => DEFAULT_QUIZ_PROMPT,
        Mode::TeachBack => DEFAULT_TEACH_BACK_PROMPT,
    }
}

/// Renders `{concepts}` as one "- id: title" line per concept and `{modes}` as the valid mode names.
pub fn render_prompt(template: &str, concepts: &ConceptStore) -> String {
    let concept_list = concepts
        .records()
        .iter()
        .map(|c| format!("- {}: {}", c.id, c.title))
        .collect::<Vec<_>>()
        .join("\n");
    template
        .replace("{concepts}", &concept_list)
        .replace("{modes}", VALID_MODES)
}

/// The four personas, immutable after startup.
#[derive(Debug, Clone)]
pub struct PersonaSet {
    personas: HashMap<Mode, ModeConfig>,
}

impl PersonaSet {
    /// Builds every persona.
    ///
    /// `templates` is keyed by mode name (`"greeter"`, `"learn"`, ...); a mode
    /// without an entry falls back to the built-in template.
    pub fn new(
        voices: &VoiceSet,
        templates: &HashMap<String, String>,
        concepts: &ConceptStore,
    ) -> Self {
        let personas = Mode::ALL
            .into_iter()
            .map(|mode| {
                let template = match templates.get(mode.as_str()) {
                    Some(template) => template.as_str(),
                    None => {
                        debug!(%mode, "No prompt template found, using built-in prompt");
                        default_template(mode)
                    }
                };
                let config = ModeConfig {
                    mode,
                    voice: voices.for_mode(mode).to_string(),
                    instructions: render_prompt(template, concepts),
                    tools: tools_for(mode),
                };
                (mode, config)
            })
            .collect();
        Self { personas }
    }

    pub fn get(&self, mode: Mode) -> &ModeConfig {
        // Every mode is inserted by `new`.
        &self.personas[&mode]
    }

    /// Personas in mode order.
    pub fn iter(&self) -> impl Iterator<Item = &ModeConfig> {
        Mode::ALL.into_iter().map(|mode| self.get(mode))
    }
}
