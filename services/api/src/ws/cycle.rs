//! Runs a single user turn through the active persona.

use crate::state::AppState;
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, FunctionObjectArgs,
};
use futures_util::StreamExt;
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::Arc;
use teachback_core::{
    agent::TutorState,
    llm_client::{LLMAction, LLMStreamEvent, ToolCall},
    persona::ModeConfig,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Handles a single user utterance.
///
/// 1.  The active persona's prompt and tool subset are offered to the LLM.
/// 2.  If the LLM calls tools, they run against this session's tool service;
///     a switch tool changes the active persona.
/// 3.  The final reply is generated with the prompt of whichever persona is
///     active after the tools ran, so a handoff takes effect within the turn.
///
/// Only user and assistant text is kept in `history`; that history is what
/// carries context across handoffs. Handoffs are not reported here: every
/// switch is published on the session's handoff channel, so the socket learns
/// of it even when the reply then fails.
pub async fn handle_turn(
    state: &AppState,
    tutor_state: &Arc<Mutex<TutorState>>,
    mcp_client: &RunningService<RoleClient, ()>,
    history: &mut Vec<ChatCompletionRequestMessage>,
    user_text: &str,
) -> Result<String> {
    let mode_before = {
        let mut tutor = tutor_state.lock().await;
        tutor.usage.turns += 1;
        tutor.mode
    };
    let persona = state.personas.get(mode_before);

    history.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(user_text)
            .build()?
            .into(),
    );

    let tools = persona_tools(mcp_client, persona).await?;
    let action = state
        .llm_client
        .decide_action(persona.instructions.clone(), history.clone(), tools)
        .await?;

    let response = match action {
        LLMAction::TextResponse(text) => text,
        LLMAction::ToolCall(tool_calls) => {
            let mut history_with_tools = history.clone();
            history_with_tools.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .tool_calls(tool_calls.clone())
                    .build()?
                    .into(),
            );
            for call in &tool_calls {
                let result = run_tool(mcp_client, persona, call).await?;
                history_with_tools.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(call.id.clone())
                        .content(result)
                        .build()?
                        .into(),
                );
            }

            let responder = state.personas.get(tutor_state.lock().await.mode);
            let mut stream = state
                .llm_client
                .stream_after_tools(responder.instructions.clone(), history_with_tools)
                .await?;
            let mut text = String::new();
            while let Some(event) = stream.next().await {
                let LLMStreamEvent::TextChunk(chunk) = event?;
                text.push_str(&chunk);
            }
            text
        }
    };

    if !response.is_empty() {
        history.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(response.clone())
                .build()?
                .into(),
        );
    }

    Ok(response)
}

/// The session's tools, narrowed to those the persona exposes.
async fn persona_tools(
    mcp_client: &RunningService<RoleClient, ()>,
    persona: &ModeConfig,
) -> Result<Vec<ChatCompletionTool>> {
    mcp_client
        .list_all_tools()
        .await?
        .into_iter()
        .filter(|t| persona.exposes(&t.name))
        .map(|t| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name)
                        .description(t.description.unwrap_or_default())
                        .parameters(serde_json::to_value(&*t.input_schema)?)
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

/// Executes one tool call and returns the text to feed back to the LLM.
///
/// Tool-level failures (unknown concept, unknown mode, a tool the persona does
/// not expose, malformed arguments) become error text for the persona to
/// recover from; only transport failures are returned as `Err`.
async fn run_tool(
    mcp_client: &RunningService<RoleClient, ()>,
    persona: &ModeConfig,
    call: &ToolCall,
) -> Result<String> {
    let name = &call.function.name;
    if !persona.exposes(name) {
        warn!(tool = %name, mode = %persona.mode, "Model called a tool this persona does not expose");
        return Ok(format!(
            "Error: tool '{}' is not available in {} mode.",
            name, persona.mode
        ));
    }

    let raw_arguments = match call.function.arguments.trim() {
        "" => "{}",
        args => args,
    };
    let arguments: serde_json::Map<String, serde_json::Value> =
        match serde_json::from_str(raw_arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(tool = %name, error = %e, "Model sent malformed tool arguments");
                return Ok(format!("Error: invalid arguments for '{}': {}", name, e));
            }
        };

    let result = mcp_client
        .peer()
        .call_tool(CallToolRequestParam {
            name: name.clone().into(),
            arguments: Some(arguments),
        })
        .await?;

    let annotated_content = result
        .content
        .context("Tool call returned no content")?
        .pop()
        .context("Content list was empty")?;
    let text = match annotated_content.raw {
        RawContent::Text(text_content) => text_content.text,
        _ => "{\"error\": \"Unexpected content type from tool\"}".to_string(),
    };
    debug!(tool = %name, result = %text, "Tool finished");

    if result.is_error.unwrap_or(false) {
        Ok(format!("Error: {}", text))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockLlm, app_state_with_llm};
    use async_openai::{
        error::OpenAIError,
        types::{ChatCompletionRequestToolMessageContent, ChatCompletionToolType, FunctionCall},
    };
    use rmcp::ServiceExt;
    use teachback_core::{
        agent::TutorService,
        llm_client::LLMStream,
        mode::{Handoff, Mode},
    };

    fn tool_call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn text_stream(chunks: &[&str]) -> LLMStream {
        let events: Vec<Result<LLMStreamEvent, OpenAIError>> = chunks
            .iter()
            .map(|c| Ok(LLMStreamEvent::TextChunk(c.to_string())))
            .collect();
        Box::pin(futures_util::stream::iter(events))
    }

    fn last_tool_result(history: &[ChatCompletionRequestMessage]) -> String {
        match history.last() {
            Some(ChatCompletionRequestMessage::Tool(tool)) => match &tool.content {
                ChatCompletionRequestToolMessageContent::Text(text) => text.clone(),
                other => panic!("Unexpected tool content: {:?}", other),
            },
            other => panic!("Expected a tool message last, got {:?}", other),
        }
    }

    fn tool_names(tools: &[ChatCompletionTool]) -> Vec<String> {
        let mut names: Vec<String> = tools.iter().map(|t| t.function.name.clone()).collect();
        names.sort();
        names
    }

    async fn start_tools(
        state: &AppState,
        tutor_state: Arc<Mutex<TutorState>>,
    ) -> RunningService<RoleClient, ()> {
        let service = TutorService::new(state.concepts.clone(), tutor_state);
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            if let Ok(server) = service.serve(server_transport).await {
                let _ = server.waiting().await;
            }
        });
        ().serve(client_transport).await.unwrap()
    }

    fn tutor_in(mode: Mode) -> Arc<Mutex<TutorState>> {
        Arc::new(Mutex::new(TutorState::new(mode)))
    }

    #[tokio::test]
    async fn test_plain_text_reply() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action()
            .withf(|prompt, history, tools| {
                prompt.contains("front desk")
                    && history.len() == 1
                    && tool_names(tools) == vec!["list_concepts", "switch_to_mode"]
            })
            .times(1)
            .returning(|_, _, _| Ok(LLMAction::TextResponse("Welcome!".to_string())));
        llm.expect_stream_after_tools().never();
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Greeter);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let mut handoffs = tutor.lock().await.subscribe();

        let response = handle_turn(&state, &tutor, &mcp, &mut history, "hi")
            .await
            .unwrap();

        assert_eq!(response, "Welcome!");
        assert!(handoffs.try_recv().is_err());
        assert_eq!(history.len(), 2);
        let tutor = tutor.lock().await;
        assert_eq!(tutor.mode, Mode::Greeter);
        assert_eq!(tutor.usage.turns, 1);
    }

    #[tokio::test]
    async fn test_switch_hands_reply_to_new_persona() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action()
            .times(1)
            .returning(|_, _, _| {
                Ok(LLMAction::ToolCall(vec![tool_call(
                    "switch_to_mode",
                    r#"{"mode": "quiz"}"#,
                )]))
            });
        llm.expect_stream_after_tools()
            .withf(|prompt, history| {
                prompt.contains("quiz master") && last_tool_result(history).starts_with("OK.")
            })
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Ready for ", "a quiz?"])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Greeter);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let mut handoffs = tutor.lock().await.subscribe();

        let response = handle_turn(&state, &tutor, &mcp, &mut history, "quiz me")
            .await
            .unwrap();

        assert_eq!(response, "Ready for a quiz?");
        assert_eq!(
            handoffs.try_recv().unwrap(),
            Handoff {
                from: Mode::Greeter,
                to: Mode::Quiz
            }
        );
        assert_eq!(tutor.lock().await.mode, Mode::Quiz);
    }

    #[tokio::test]
    async fn test_unknown_mode_keeps_persona() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "switch_mode",
                r#"{"mode": "bananas"}"#,
            )]))
        });
        llm.expect_stream_after_tools()
            .withf(|prompt, history| {
                prompt.contains("learn mode")
                    && last_tool_result(history).contains("Unknown mode 'bananas'")
            })
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Which mode did you mean?"])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Learn);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let mut handoffs = tutor.lock().await.subscribe();

        let response = handle_turn(&state, &tutor, &mcp, &mut history, "go bananas")
            .await
            .unwrap();

        assert!(handoffs.try_recv().is_err());
        assert_eq!(response, "Which mode did you mean?");
        assert_eq!(tutor.lock().await.mode, Mode::Learn);
    }

    #[tokio::test]
    async fn test_self_switch_is_reported() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "switch_mode",
                r#"{"mode": "quiz"}"#,
            )]))
        });
        llm.expect_stream_after_tools()
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Still quizzing."])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Quiz);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let mut handoffs = tutor.lock().await.subscribe();

        handle_turn(&state, &tutor, &mcp, &mut history, "quiz again")
            .await
            .unwrap();

        assert_eq!(
            handoffs.try_recv().unwrap(),
            Handoff {
                from: Mode::Quiz,
                to: Mode::Quiz
            }
        );
    }

    #[tokio::test]
    async fn test_learn_lookup_feeds_summary_back() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action()
            .withf(|_, _, tools| {
                tool_names(tools) == vec!["get_concept", "list_concepts", "switch_mode"]
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(LLMAction::ToolCall(vec![tool_call(
                    "get_concept",
                    r#"{"concept_id": "loops"}"#,
                )]))
            });
        llm.expect_stream_after_tools()
            .withf(|_, history| {
                let result = last_tool_result(history);
                result.contains("\"id\":\"loops\"")
                    && result.contains("Loops repeat a block of code")
            })
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Loops repeat code."])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Learn);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let response = handle_turn(&state, &tutor, &mcp, &mut history, "teach me loops")
            .await
            .unwrap();

        assert_eq!(response, "Loops repeat code.");
        assert_eq!(history.len(), 2);
        assert_eq!(tutor.lock().await.usage.tool_calls, 1);
    }

    #[tokio::test]
    async fn test_quiz_lookup_for_unknown_concept_is_recoverable() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "get_quiz_question",
                r#"{"concept_id": "recursion"}"#,
            )]))
        });
        llm.expect_stream_after_tools()
            .withf(|_, history| {
                let result = last_tool_result(history);
                result.starts_with("Error:") && result.contains("variables, loops")
            })
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Pick variables or loops."])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Quiz);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let response = handle_turn(&state, &tutor, &mcp, &mut history, "quiz me on recursion")
            .await
            .unwrap();

        assert_eq!(response, "Pick variables or loops.");
        let tutor = tutor.lock().await;
        assert_eq!(tutor.mode, Mode::Quiz);
        assert_eq!(tutor.usage.failed_lookups, 1);
    }

    #[tokio::test]
    async fn test_tool_outside_persona_is_refused() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "get_concept",
                r#"{"concept_id": "loops"}"#,
            )]))
        });
        llm.expect_stream_after_tools()
            .withf(|_, history| {
                last_tool_result(history) == "Error: tool 'get_concept' is not available in greeter mode."
            })
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Let's pick a mode first."])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Greeter);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        handle_turn(&state, &tutor, &mcp, &mut history, "what are loops")
            .await
            .unwrap();

        assert_eq!(tutor.lock().await.usage.tool_calls, 0);
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_reported_to_model() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call("switch_to_mode", "{not json")]))
        });
        llm.expect_stream_after_tools()
            .withf(|_, history| {
                last_tool_result(history).starts_with("Error: invalid arguments for 'switch_to_mode'")
            })
            .times(1)
            .returning(|_, _| Ok(text_stream(&["Sorry, which mode?"])));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Greeter);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let mut handoffs = tutor.lock().await.subscribe();

        handle_turn(&state, &tutor, &mcp, &mut history, "switch")
            .await
            .unwrap();

        assert!(handoffs.try_recv().is_err());
        assert_eq!(tutor.lock().await.mode, Mode::Greeter);
    }

    #[tokio::test]
    async fn test_llm_failure_is_returned() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("provider unavailable")));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Learn);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();

        let err = handle_turn(&state, &tutor, &mcp, &mut history, "hello")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("provider unavailable"));
        assert_eq!(tutor.lock().await.mode, Mode::Learn);
    }

    #[tokio::test]
    async fn test_handoff_is_published_when_reply_fails() {
        let mut llm = MockLlm::new();
        llm.expect_decide_action().times(1).returning(|_, _, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "switch_to_mode",
                r#"{"mode": "quiz"}"#,
            )]))
        });
        llm.expect_stream_after_tools()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream dropped")));
        let state = app_state_with_llm(llm);
        let tutor = tutor_in(Mode::Greeter);
        let mcp = start_tools(&state, tutor.clone()).await;
        let mut history = Vec::new();
        let mut handoffs = tutor.lock().await.subscribe();

        handle_turn(&state, &tutor, &mcp, &mut history, "quiz me")
            .await
            .unwrap_err();

        assert_eq!(tutor.lock().await.mode, Mode::Quiz);
        assert_eq!(
            handoffs.try_recv().unwrap(),
            Handoff {
                from: Mode::Greeter,
                to: Mode::Quiz
            }
        );
    }
}
