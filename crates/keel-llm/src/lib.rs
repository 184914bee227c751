//! Keel LLM - Multi-provider chat-completion layer
//!
//! One `ChatModel` contract over the supported providers. Providers are
//! selected by the Model resource's type; provider properties are merged
//! into every request, and an agent's output schema upgrades the request to
//! a strict JSON-schema response format.

pub mod openai;
pub mod provider;

#[cfg(feature = "azure")]
pub mod azure;

#[cfg(feature = "bedrock")]
pub mod bedrock;

pub use provider::{create_model, resolve_model_address};

use async_trait::async_trait;

use keel_core::{KeelResult, Message, TokenUsage, ToolDefinition};

/// One chat-completion request
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Function definitions exposed for tool calling
    pub tools: Vec<ToolDefinition>,
    /// When set, the response is constrained to this JSON schema (strict)
    pub output_schema: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// Completion result: the assistant message plus token accounting
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub message: Message,
    pub usage: TokenUsage,
}

/// Unified chat-completion contract
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest) -> KeelResult<ChatCompletion>;

    /// Cheap availability check used by the Model controller
    async fn probe(&self) -> KeelResult<()>;

    /// Provider-side model name
    fn model_name(&self) -> &str;
}
