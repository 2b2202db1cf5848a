//! ScriptedModel: deterministic model replies for tests and offline runs
//!
//! Replies are consumed in order; once the script runs out the fallback reply
//! is returned for every further call.

use crate::client::{LlmError, LlmResult, ModelClient, ModelReply, ModelRequest};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tradeclaw_core::ToolCall;

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// A text-only turn, which ends the run's loop
    Text(String),
    /// A single tool call with structured arguments
    ToolCall { name: String, args: Value },
    /// Several tool calls in one turn, executed in this order
    ToolCalls(Vec<(String, Value)>),
    /// A tool call whose argument payload is passed through verbatim
    RawToolCall { name: String, arguments: String },
    /// A transport failure
    Error(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn tool(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            args,
        }
    }

    /// A tool call with an argument payload that is not valid JSON.
    pub fn malformed(name: impl Into<String>) -> Self {
        Self::RawToolCall {
            name: name.into(),
            arguments: "{\"symbol\": ETH".into(),
        }
    }
}

pub struct ScriptedModel {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    requests: Mutex<Vec<ModelRequest>>,
    next_call_id: AtomicUsize,
}

impl ScriptedModel {
    /// A model that replies the same way every time.
    pub fn constant(reply: ScriptedReply) -> Self {
        Self::build(VecDeque::new(), reply)
    }

    /// A model that plays `replies` in order, then answers with plain text.
    pub fn sequence(replies: Vec<ScriptedReply>) -> Self {
        Self::build(replies.into(), ScriptedReply::Text("(script exhausted)".into()))
    }

    fn build(replies: VecDeque<ScriptedReply>, fallback: ScriptedReply) -> Self {
        Self {
            name: "scripted".into(),
            replies: Mutex::new(replies),
            fallback,
            requests: Mutex::new(Vec::new()),
            next_call_id: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Every request seen so far, oldest first.
    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }

    fn call(&self, name: String, arguments: String) -> ToolCall {
        let n = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        ToolCall::new(format!("call_{}", n), name, arguments)
    }

    async fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: ModelRequest) -> LlmResult<ModelReply> {
        self.requests.lock().await.push(request);
        let reply = self.next_reply().await;
        tracing::debug!(model = %self.name, ?reply, "scripted reply");

        match reply {
            ScriptedReply::Text(text) => Ok(ModelReply::text(text)),
            ScriptedReply::ToolCall { name, args } => {
                let call = self.call(name, args.to_string());
                Ok(ModelReply::with_tool_calls("", vec![call]))
            }
            ScriptedReply::ToolCalls(calls) => {
                let calls = calls
                    .into_iter()
                    .map(|(name, args)| self.call(name, args.to_string()))
                    .collect();
                Ok(ModelReply::with_tool_calls("", calls))
            }
            ScriptedReply::RawToolCall { name, arguments } => {
                let call = self.call(name, arguments);
                Ok(ModelReply::with_tool_calls("", vec![call]))
            }
            ScriptedReply::Error(message) => Err(LlmError::RequestFailed(message)),
        }
    }
}
