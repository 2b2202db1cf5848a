//! Tool registry and trait definitions
//!
//! A tool declares a typed `Input`. The registry validates arguments by
//! deserializing into that type before the tool ever runs, so handlers never
//! see raw JSON.

use crate::notify::{LogSink, NotificationSink};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tradeclaw_core::{SessionKey, ToolDefinition};

const AUDIT_TARGET: &str = "tradeclaw::audit";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool '{0}' is disabled")]
    Disabled(String),

    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },

    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn execution(message: impl std::fmt::Display) -> Self {
        Self::Execution(message.to_string())
    }

    /// Short stable label for audit records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Disabled(_) => "disabled",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Execution(_) => "execution",
        }
    }
}

/// What a tool's enablement check may look at.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyContext {
    pub agent_id: String,
    pub session_key: SessionKey,
    /// The run was spawned by another run.
    pub is_subagent: bool,
}

/// Per-invocation context handed to a tool.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub session_key: SessionKey,
    pub agent_id: String,
    pub parent_run_id: Option<String>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl ToolContext {
    pub fn new(run_id: impl Into<String>, session_key: SessionKey, agent_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            session_key,
            agent_id: agent_id.into(),
            parent_run_id: None,
            notifier: Arc::new(LogSink),
        }
    }

    pub fn with_parent(mut self, parent_run_id: Option<String>) -> Self {
        self.parent_run_id = parent_run_id;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn policy_context(&self) -> PolicyContext {
        PolicyContext {
            agent_id: self.agent_id.clone(),
            session_key: self.session_key.clone(),
            is_subagent: self.parent_run_id.is_some(),
        }
    }
}

/// The Tool trait: implement this to add a capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Arguments the tool accepts. Invocations that do not deserialize are rejected.
    type Input: DeserializeOwned + Send;

    /// Unique tool name, dotted by family (e.g. "market.quote").
    fn name(&self) -> &str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema for `Input`.
    fn input_schema(&self) -> Value;

    /// Whether the tool is offered to a run in this context.
    fn is_enabled(&self, _ctx: &PolicyContext) -> bool {
        true
    }

    async fn call(&self, ctx: &ToolContext, input: Self::Input) -> Result<Value, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Object-safe face of `Tool`, erasing the input type.
#[async_trait::async_trait]
trait ErasedTool: Send + Sync {
    fn schema(&self) -> ToolDefinition;
    fn enabled_for(&self, ctx: &PolicyContext) -> bool;
    async fn invoke_json(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

#[async_trait::async_trait]
impl<T: Tool> ErasedTool for T {
    fn schema(&self) -> ToolDefinition {
        self.definition()
    }

    fn enabled_for(&self, ctx: &PolicyContext) -> bool {
        self.is_enabled(ctx)
    }

    async fn invoke_json(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let input: T::Input = serde_json::from_value(args).map_err(|e| ToolError::InvalidInput {
            tool: self.name().to_string(),
            message: e.to_string(),
        })?;
        self.call(ctx, input).await
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ErasedTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::debug!(tool = %name, "replaced registered tool");
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of every tool enabled in `ctx`, sorted by name.
    pub fn list_schemas(&self, ctx: &PolicyContext) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| t.enabled_for(ctx))
            .map(|t| t.schema())
            .collect()
    }

    /// Validate `args` against the tool's input type and run it. Every call is
    /// audit-logged, including the ones that never reach the tool.
    pub async fn invoke(&self, name: &str, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let result = match self.tools.get(name) {
            None => Err(ToolError::NotFound(name.to_string())),
            Some(tool) if !tool.enabled_for(&ctx.policy_context()) => Err(ToolError::Disabled(name.to_string())),
            Some(tool) => tool.invoke_json(ctx, args).await,
        };

        match &result {
            Ok(_) => tracing::info!(
                target: AUDIT_TARGET,
                tool = %name,
                run_id = %ctx.run_id,
                session = %ctx.session_key,
                agent = %ctx.agent_id,
                outcome = "ok",
                "tool invoked"
            ),
            Err(e) => tracing::info!(
                target: AUDIT_TARGET,
                tool = %name,
                run_id = %ctx.run_id,
                session = %ctx.session_key,
                agent = %ctx.agent_id,
                outcome = e.code(),
                error = %e,
                "tool invoked"
            ),
        }
        result
    }
}
