//! Tool-Calling Agent
//!
//! This module turns one user utterance into a spoken reply. The agent sends
//! the system prompt, the bounded conversation history and the utterance to an
//! LLM, executes any tools the model asks for, feeds their results back, and
//! repeats until the model answers with text.
//!
//! Voice sessions only see the [`AgentDispatcher`] trait, so the agent stays an
//! opaque `dispatch(utterance, history) -> (reply, tools_used)` call to them.

use crate::{
    conversation::{AgentResult, Role, Turn},
    llm_client::{LLMAction, LLMClient, ToolCall},
};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use futures::future::join_all;
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on decide/execute rounds for a single utterance.
pub const MAX_TOOL_ROUNDS: usize = 5;

/// Why a dispatch produced no reply.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("could not build the model request: {0}")]
    Request(#[from] OpenAIError),
    #[error("language model call failed: {0:#}")]
    Llm(anyhow::Error),
    #[error("could not list the available tools: {0:#}")]
    Tools(anyhow::Error),
    #[error("model did not finish within {0} tool rounds")]
    ToolLoop(usize),
    #[error("model returned an empty reply")]
    EmptyReply,
}

/// The contract a voice session relies on to answer an utterance.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    /// Answers `utterance` given the conversation so far.
    ///
    /// Implementations must not mutate the caller's history; the caller records
    /// the exchange only when this returns `Ok`.
    async fn dispatch(&self, utterance: &str, history: &[Turn])
    -> Result<AgentResult, DispatchError>;
}

/// Executes tools on behalf of the agent.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool catalogue in the shape the chat completion API expects.
    async fn list_tools(&self) -> Result<Vec<ChatCompletionTool>>;

    /// Runs one tool with JSON-encoded arguments and returns its text output.
    async fn call_tool(&self, name: &str, arguments: &str) -> Result<String>;
}

/// A `ToolExecutor` backed by an MCP client connection.
pub struct McpToolExecutor {
    client: RunningService<RoleClient, ()>,
}

impl McpToolExecutor {
    pub fn new(client: RunningService<RoleClient, ()>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    async fn list_tools(&self) -> Result<Vec<ChatCompletionTool>> {
        self.client
            .list_all_tools()
            .await?
            .into_iter()
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
            .collect::<Result<Vec<_>>>()
    }

    async fn call_tool(&self, name: &str, arguments: &str) -> Result<String> {
        let arguments = if arguments.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(arguments)
                    .with_context(|| format!("Arguments for '{name}' were not a JSON object"))?,
            )
        };

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await?;

        let is_error = result.is_error.unwrap_or(false);
        let annotated_content = result
            .content
            .context("Tool call returned no content")?
            .pop()
            .context("Content list was empty")?;
        let text = match annotated_content.raw {
            RawContent::Text(text_content) => text_content.text,
            _ => return Err(anyhow!("Unexpected content type from tool '{name}'")),
        };

        if is_error { Err(anyhow!(text)) } else { Ok(text) }
    }
}

/// The production `AgentDispatcher`: an LLM that may call tools.
pub struct ToolCallingAgent {
    llm_client: Arc<dyn LLMClient>,
    tools: Arc<dyn ToolExecutor>,
    system_prompt: String,
    max_tool_rounds: usize,
}

impl ToolCallingAgent {
    pub fn new(
        llm_client: Arc<dyn LLMClient>,
        tools: Arc<dyn ToolExecutor>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm_client,
            tools,
            system_prompt: system_prompt.into(),
            max_tool_rounds: MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    fn build_messages(
        &self,
        utterance: &str,
        history: &[Turn],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(history.len() + 2);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.clone())
                .build()?
                .into(),
        );
        for turn in history {
            messages.push(match turn.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            });
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(utterance)
                .build()?
                .into(),
        );
        Ok(messages)
    }

    /// Runs one tool call. Failures become the tool's output so the model can
    /// explain them to the user.
    async fn run_tool(&self, call: &ToolCall) -> String {
        let name = &call.function.name;
        match self.tools.call_tool(name, &call.function.arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        }
    }
}

#[async_trait]
impl AgentDispatcher for ToolCallingAgent {
    async fn dispatch(
        &self,
        utterance: &str,
        history: &[Turn],
    ) -> Result<AgentResult, DispatchError> {
        let mut messages = self.build_messages(utterance, history)?;
        let tools = self
            .tools
            .list_tools()
            .await
            .map_err(DispatchError::Tools)?;
        let mut tools_used: Vec<String> = Vec::new();

        for round in 0..self.max_tool_rounds {
            let action = self
                .llm_client
                .decide_action(messages.clone(), tools.clone())
                .await
                .map_err(DispatchError::Llm)?;

            let tool_calls = match action {
                LLMAction::TextResponse(text) => {
                    let reply = text.trim();
                    if reply.is_empty() {
                        return Err(DispatchError::EmptyReply);
                    }
                    return Ok(AgentResult {
                        reply: reply.to_string(),
                        tools_used,
                    });
                }
                LLMAction::ToolCall(tool_calls) => tool_calls,
            };

            for call in &tool_calls {
                if !tools_used.contains(&call.function.name) {
                    tools_used.push(call.function.name.clone());
                }
            }
            info!(round, tools = ?tool_calls.iter().map(|c| c.function.name.as_str()).collect::<Vec<_>>(), "Executing tool calls");

            let results = join_all(tool_calls.iter().map(|call| self.run_tool(call))).await;

            messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .tool_calls(tool_calls.clone())
                    .build()?
                    .into(),
            );
            for (call, result) in tool_calls.iter().zip(results) {
                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(call.id.clone())
                        .content(result)
                        .build()?
                        .into(),
                );
            }
        }

        Err(DispatchError::ToolLoop(self.max_tool_rounds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockLLMClient;
    use async_openai::types::{ChatCompletionToolType, FunctionCall};
    use mockall::Sequence;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ToolExecutor for RecordingTools {
        async fn list_tools(&self) -> Result<Vec<ChatCompletionTool>> {
            Ok(vec![
                ChatCompletionToolArgs::default()
                    .function(
                        FunctionObjectArgs::default()
                            .name("get_low_stock_alerts")
                            .description("Get products that are low in stock")
                            .build()?,
                    )
                    .build()?,
            ])
        }

        async fn call_tool(&self, name: &str, arguments: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.to_string()));
            if self.fail {
                Err(anyhow!("inventory API unreachable"))
            } else {
                Ok("2 low stock alert(s):\n- Bath Towel (Quantity: 3, SKU: TW-001)\n".to_string())
            }
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn has_tool_message(messages: &[ChatCompletionRequestMessage]) -> bool {
        messages
            .iter()
            .any(|m| matches!(m, ChatCompletionRequestMessage::Tool(_)))
    }

    fn agent(llm: MockLLMClient, tools: Arc<RecordingTools>) -> ToolCallingAgent {
        ToolCallingAgent::new(Arc::new(llm), tools, "You are a test assistant.")
    }

    #[tokio::test]
    async fn test_direct_text_reply_uses_no_tools() {
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action()
            .withf(|messages, tools| messages.len() == 4 && tools.len() == 1)
            .times(1)
            .returning(|_, _| Ok(LLMAction::TextResponse("  Hello there!  ".to_string())));
        let tools = Arc::new(RecordingTools::default());

        let history = vec![Turn::user("hi"), Turn::assistant("Hello!")];
        let result = agent(llm, tools.clone())
            .dispatch("how are you", &history)
            .await
            .unwrap();

        assert_eq!(result.reply, "Hello there!");
        assert!(result.tools_used.is_empty());
        assert!(tools.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_round_then_reply() {
        let mut seq = Sequence::new();
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(LLMAction::ToolCall(vec![tool_call(
                    "call_1",
                    "get_low_stock_alerts",
                    "{\"threshold\":10}",
                )]))
            });
        llm.expect_decide_action()
            .withf(|messages, _| has_tool_message(messages))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(LLMAction::TextResponse(
                    "Bath towels are running low.".to_string(),
                ))
            });
        let tools = Arc::new(RecordingTools::default());

        let result = agent(llm, tools.clone())
            .dispatch("show low stock", &[])
            .await
            .unwrap();

        assert_eq!(result.reply, "Bath towels are running low.");
        assert_eq!(result.tools_used, vec!["get_low_stock_alerts".to_string()]);
        assert_eq!(
            tools.calls.lock().unwrap().as_slice(),
            &[(
                "get_low_stock_alerts".to_string(),
                "{\"threshold\":10}".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_tools_used_are_deduplicated_in_first_use_order() {
        let mut seq = Sequence::new();
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(LLMAction::ToolCall(vec![
                    tool_call("a", "search_products", "{}"),
                    tool_call("b", "record_sale", "{}"),
                ]))
            });
        llm.expect_decide_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(LLMAction::ToolCall(vec![tool_call("c", "search_products", "{}")]))
            });
        llm.expect_decide_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(LLMAction::TextResponse("Done.".to_string())));

        let result = agent(llm, Arc::new(RecordingTools::default()))
            .dispatch("sell two sarees", &[])
            .await
            .unwrap();

        assert_eq!(result.tools_used, vec!["search_products", "record_sale"]);
    }

    #[tokio::test]
    async fn test_failed_tool_is_reported_to_the_model() {
        let mut seq = Sequence::new();
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(LLMAction::ToolCall(vec![tool_call(
                    "call_1",
                    "get_low_stock_alerts",
                    "{}",
                )]))
            });
        llm.expect_decide_action()
            .withf(|messages, _| has_tool_message(messages))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(LLMAction::TextResponse(
                    "I couldn't reach the inventory right now.".to_string(),
                ))
            });
        let tools = Arc::new(RecordingTools {
            fail: true,
            ..Default::default()
        });

        let result = agent(llm, tools).dispatch("show low stock", &[]).await.unwrap();

        assert_eq!(result.tools_used, vec!["get_low_stock_alerts"]);
    }

    #[tokio::test]
    async fn test_llm_failure_is_a_dispatch_error() {
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action()
            .returning(|_, _| Err(anyhow!("rate limited")));

        let err = agent(llm, Arc::new(RecordingTools::default()))
            .dispatch("hello", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Llm(_)));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_tool_loop_is_bounded() {
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action().times(2).returning(|_, _| {
            Ok(LLMAction::ToolCall(vec![tool_call(
                "again",
                "get_low_stock_alerts",
                "{}",
            )]))
        });

        let err = agent(llm, Arc::new(RecordingTools::default()))
            .with_max_tool_rounds(2)
            .dispatch("loop forever", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::ToolLoop(2)));
    }

    #[tokio::test]
    async fn test_blank_reply_is_rejected() {
        let mut llm = MockLLMClient::new();
        llm.expect_decide_action()
            .returning(|_, _| Ok(LLMAction::TextResponse("   ".to_string())));

        let err = agent(llm, Arc::new(RecordingTools::default()))
            .dispatch("hello", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::EmptyReply));
    }
}
