//! Model client trait

use serde::{Deserialize, Serialize};
use tradeclaw_core::{Message, ToolCall, ToolDefinition};

/// Result type for model operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Model transport errors. Retry and backoff live inside the client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One planning step: the whole conversation plus the tools the run may use.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == tradeclaw_core::Role::System)
            .map(|m| m.content.as_str())
    }
}

/// The assistant turn a model produced.
///
/// `message` is the turn itself. A client may also report `text` or
/// `tool_calls` separately; `into_message` folds them back in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn from_message(message: Message) -> Self {
        let text = if message.content.is_empty() {
            None
        } else {
            Some(message.content.clone())
        };
        let tool_calls = message.tool_calls().to_vec();
        Self {
            message,
            text,
            tool_calls,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::from_message(Message::assistant(text))
    }

    pub fn with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::from_message(Message::assistant_with_tools(text, tool_calls))
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty() || !self.message.tool_calls().is_empty()
    }

    /// The assistant turn to append to the conversation. Text and tool calls
    /// reported beside an empty message are carried onto it.
    pub fn into_message(self) -> Message {
        let mut message = self.message;
        if message.content.is_empty() {
            if let Some(text) = self.text {
                message.content = text;
            }
        }
        if message.tool_calls().is_empty() && !self.tool_calls.is_empty() {
            message.tool_calls = Some(self.tool_calls);
        }
        message
    }
}

/// A language model the executor plans with.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the next assistant turn. Tool-call ids must survive the round trip.
    async fn generate(&self, request: ModelRequest) -> LlmResult<ModelReply>;
}
