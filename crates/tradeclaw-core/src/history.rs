//! Session history: the closed set of entries a session log can hold.
//!
//! One JSON object per line:
//!
//! ```text
//! {"ts":"2026-01-05T10:00:00Z","type":"message","message":{"role":"user","content":"rebalance"}}
//! {"ts":"2026-01-05T10:00:01Z","type":"llm","run_id":"…","step":1,"tool_calls":1,"text_chars":0}
//! {"ts":"2026-01-05T10:00:01Z","type":"tool_call","run_id":"…","call_id":"call_0","tool":"market.quote","args":{}}
//! ```
//!
//! A session's conversation is the ordered projection of its `message` entries.

use crate::run::RunStatus;
use crate::types::{Message, SessionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Message {
        message: Message,
    },
    ToolCall {
        run_id: String,
        call_id: String,
        tool: String,
        #[serde(default)]
        args: Value,
        /// `invalid_arguments`, `denied`, or the tool's own error text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Llm {
        run_id: String,
        step: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        text_chars: usize,
        tool_calls: usize,
    },
    SubagentAnnounce(SubagentAnnounce),
    Audit {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// Outcome of a child run, delivered to the parent's session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentAnnounce {
    pub child_run_id: String,
    pub child_session_key: SessionKey,
    pub agent_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A known session and when its log was last written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_key: SessionKey,
    pub updated_at: DateTime<Utc>,
}

impl SessionHistoryEntry {
    pub fn now(event: SessionEvent) -> Self {
        Self {
            ts: Utc::now(),
            event,
        }
    }

    pub fn message(message: Message) -> Self {
        Self::now(SessionEvent::Message { message })
    }

    pub fn audit(event: impl Into<String>, data: Value) -> Self {
        Self::now(SessionEvent::Audit {
            event: event.into(),
            data,
        })
    }

    /// The conversation message this entry carries, if it carries one.
    pub fn as_message(&self) -> Option<&Message> {
        match &self.event {
            SessionEvent::Message { message } => Some(message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self.event {
            SessionEvent::Message { message } => Some(message),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.event {
            SessionEvent::Message { .. } => "message",
            SessionEvent::ToolCall { .. } => "tool_call",
            SessionEvent::Llm { .. } => "llm",
            SessionEvent::SubagentAnnounce(_) => "subagent_announce",
            SessionEvent::Audit { .. } => "audit",
        }
    }
}
