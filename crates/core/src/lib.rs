//! StockVoice Core
//!
//! Runtime-agnostic pieces of the voice assistant: the conversation model,
//! the tool-calling agent that answers an utterance, the LLM client it drives,
//! and the MCP tool service that fronts the inventory REST API.

pub mod agent;
pub mod conversation;
pub mod llm_client;
pub mod prompt;
pub mod tools;
