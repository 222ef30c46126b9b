//! Shared fixtures for unit tests.

use crate::{sessions::SessionRegistry, state::AppState};
use anyhow::Result;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
use async_trait::async_trait;
use mockall::mock;
use std::{collections::HashMap, sync::Arc};
use teachback_core::{
    concept::{ConceptRecord, ConceptStore},
    llm_client::{LLMAction, LLMClient, LLMStream},
    persona::{PersonaSet, VoiceSet},
};

mock! {
    pub Llm {}

    #[async_trait]
    impl LLMClient for Llm {
        async fn decide_action(
            &self,
            system_prompt: String,
            history: Vec<ChatCompletionRequestMessage>,
            tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction>;

        async fn stream_after_tools(
            &self,
            system_prompt: String,
            history_with_tool_results: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream>;
    }
}

pub fn concepts() -> Arc<ConceptStore> {
    Arc::new(
        ConceptStore::from_records(vec![
            ConceptRecord {
                id: "variables".to_string(),
                title: "Variables".to_string(),
                summary: "A variable is a named place to store a value.".to_string(),
                sample_question: "What is a variable?".to_string(),
            },
            ConceptRecord {
                id: "loops".to_string(),
                title: "Loops".to_string(),
                summary: "Loops repeat a block of code while a condition holds.".to_string(),
                sample_question: "What is the difference between a for loop and a while loop?"
                    .to_string(),
            },
        ])
        .expect("fixture concepts are valid"),
    )
}

pub fn app_state_with_llm(llm: MockLlm) -> Arc<AppState> {
    let concepts = concepts();
    let personas = PersonaSet::new(&VoiceSet::default(), &HashMap::new(), &concepts);
    Arc::new(AppState {
        concepts,
        personas: Arc::new(personas),
        llm_client: Arc::new(llm),
        sessions: Arc::new(SessionRegistry::new()),
    })
}

/// State whose LLM must not be called.
pub fn app_state() -> Arc<AppState> {
    app_state_with_llm(MockLlm::new())
}
