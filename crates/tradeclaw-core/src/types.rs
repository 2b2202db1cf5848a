//! Core types for Tradeclaw

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// Why `value` cannot be used as a storage key, if it cannot.
///
/// Keys name files under the state directory, so anything that could walk out
/// of it is refused.
pub fn storage_key_violation(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        Some("must not be empty")
    } else if value.contains('/') || value.contains('\\') {
        Some("must not contain a path separator")
    } else if value.contains('\0') {
        Some("must not contain a null byte")
    } else {
        None
    }
}

/// Reject run ids that are unsafe to use as a file name.
pub fn validate_run_id(id: &str) -> Result<()> {
    match storage_key_violation(id) {
        Some(reason) => Err(Error::InvalidRunId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    /// Wrap a key without validation. Stores validate on every access.
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// Wrap a key, rejecting values that are unsafe as a log file name.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let key = Self::new(s);
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> Result<()> {
        match storage_key_violation(&self.0) {
            Some(reason) => Err(Error::InvalidSessionKey {
                key: self.0.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// The fixed session an agent's autopilot ticks run on.
    pub fn autopilot(agent_id: &str) -> Self {
        Self::new(format!("autopilot:{}", agent_id))
    }

    /// A fresh, never-used session for a delegated child run.
    pub fn subagent(agent_id: &str) -> Self {
        Self::new(format!("subagent:{}:{}", agent_id, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn that requests tools. An empty call list is stored as no calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Whether the message can be replayed into a model conversation as-is.
    pub fn is_well_formed(&self) -> bool {
        match self.role {
            Role::Tool => self.tool_call_id.as_deref().is_some_and(|id| !id.is_empty()),
            Role::Assistant => self
                .tool_calls()
                .iter()
                .all(|tc| !tc.id.is_empty() && !tc.name.is_empty()),
            Role::System | Role::User => true,
        }
    }

    /// Bring tool-call references into the shape a model client expects:
    /// nameless calls are dropped, missing ids are filled in, and an empty
    /// list becomes no list.
    pub fn normalize_tool_calls(mut self) -> Self {
        if let Some(calls) = self.tool_calls.take() {
            let calls: Vec<ToolCall> = calls
                .into_iter()
                .filter(|tc| !tc.name.is_empty())
                .enumerate()
                .map(|(i, mut tc)| {
                    if tc.id.is_empty() {
                        tc.id = format!("call_{}", i);
                    }
                    tc
                })
                .collect();
            self.tool_calls = if calls.is_empty() { None } else { Some(calls) };
        }
        self
    }
}

/// A tool call from the assistant
///
/// `arguments` is the raw argument payload. Older log lines stored it as a
/// JSON object; those are read back as their serialized string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_json")]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument payload. Blank payloads parse as an empty object.
    pub fn parse_arguments(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }
}

fn string_or_json<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Tool definition for LLM
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}
