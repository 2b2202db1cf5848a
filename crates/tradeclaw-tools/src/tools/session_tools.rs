//! Session and run management tools.
//!
//! These let a running agent delegate work, message other sessions and
//! inspect runs. They call back into the orchestrator that is running them,
//! reached through a handle that is bound after the orchestrator is built.

use crate::registry::{PolicyContext, Tool, ToolContext, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tradeclaw_core::{
    Error, MessageOutcome, MessageRequest, RunAccepted, RunRecord, RunRequest, SessionHistoryEntry, SessionKey,
    SessionSummary, SpawnAccepted, SpawnRequest,
};

/// Default and ceiling for `runs.wait` timeouts.
const DEFAULT_WAIT_MS: u64 = 30_000;
const MAX_WAIT_MS: u64 = 300_000;
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Operations the management tools need from the orchestrator.
#[async_trait::async_trait]
pub trait Orchestrator: Send + Sync {
    async fn submit_run(&self, request: RunRequest) -> tradeclaw_core::Result<RunAccepted>;
    async fn submit_message(&self, request: MessageRequest) -> tradeclaw_core::Result<MessageOutcome>;
    async fn submit_autopilot_tick(&self, reason: &str) -> tradeclaw_core::Result<RunAccepted>;
    async fn spawn_subagent(&self, request: SpawnRequest) -> tradeclaw_core::Result<SpawnAccepted>;
    async fn wait(&self, run_id: &str, timeout: Option<Duration>) -> tradeclaw_core::Result<Option<RunRecord>>;
    async fn get_run(&self, run_id: &str) -> tradeclaw_core::Result<Option<RunRecord>>;
    async fn list_sessions(&self) -> tradeclaw_core::Result<Vec<SessionSummary>>;
    async fn session_history(
        &self,
        session_key: &SessionKey,
        limit: Option<usize>,
    ) -> tradeclaw_core::Result<Vec<SessionHistoryEntry>>;
}

/// Late-bound handle to the orchestrator.
/// The orchestrator owns the registry, so tools only hold it weakly.
pub type OrchestratorHandle = Arc<RwLock<Option<Weak<dyn Orchestrator>>>>;

pub fn create_orchestrator_handle() -> OrchestratorHandle {
    Arc::new(RwLock::new(None))
}

async fn resolve(handle: &OrchestratorHandle) -> Result<Arc<dyn Orchestrator>, ToolError> {
    handle
        .read()
        .await
        .as_ref()
        .and_then(|weak| weak.upgrade())
        .ok_or_else(|| ToolError::execution("orchestrator is not available"))
}

fn is_bound(handle: &OrchestratorHandle) -> bool {
    handle.try_read().map(|h| h.is_some()).unwrap_or(true)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(ToolError::execution)
}

// ---------------------------------------------------------------------------
// sessions.spawn
// ---------------------------------------------------------------------------

pub struct SessionsSpawnTool {
    handle: OrchestratorHandle,
}

impl SessionsSpawnTool {
    pub fn new(handle: OrchestratorHandle) -> Self {
        Self { handle }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnInput {
    pub task: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[async_trait::async_trait]
impl Tool for SessionsSpawnTool {
    type Input = SpawnInput;

    fn name(&self) -> &str {
        "sessions.spawn"
    }

    fn description(&self) -> &str {
        "Delegate a task to a sub-agent on a fresh session. Returns immediately; the result is announced to this session when the sub-agent finishes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "What the sub-agent should do" },
                "agentId": { "type": "string", "description": "Agent to run (defaults to the configured default agent)" },
                "label": { "type": "string", "description": "Short label shown in the announcement" }
            },
            "required": ["task"]
        })
    }

    fn is_enabled(&self, ctx: &PolicyContext) -> bool {
        !ctx.is_subagent && is_bound(&self.handle)
    }

    async fn call(&self, ctx: &ToolContext, input: SpawnInput) -> Result<Value, ToolError> {
        if input.task.trim().is_empty() {
            return Err(ToolError::InvalidInput {
                tool: self.name().to_string(),
                message: "task must not be empty".into(),
            });
        }
        let orchestrator = resolve(&self.handle).await?;
        let mut request = SpawnRequest::new(input.task).with_parent(ctx.run_id.clone(), ctx.session_key.clone());
        request.agent_id = input.agent_id;
        request.label = input.label;

        let accepted = orchestrator.spawn_subagent(request).await.map_err(ToolError::execution)?;
        to_value(&accepted)
    }
}

// ---------------------------------------------------------------------------
// sessions.send
// ---------------------------------------------------------------------------

pub struct SessionsSendTool {
    handle: OrchestratorHandle,
}

impl SessionsSendTool {
    pub fn new(handle: OrchestratorHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Tool for SessionsSendTool {
    type Input = MessageRequest;

    fn name(&self) -> &str {
        "sessions.send"
    }

    fn description(&self) -> &str {
        "Post a message to another session, optionally starting a run there."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sessionKey": { "type": "string" },
                "content": { "type": "string" },
                "agentId": { "type": "string" },
                "triggerRun": { "type": "boolean", "default": false }
            },
            "required": ["sessionKey", "content"]
        })
    }

    fn is_enabled(&self, _ctx: &PolicyContext) -> bool {
        is_bound(&self.handle)
    }

    async fn call(&self, _ctx: &ToolContext, input: MessageRequest) -> Result<Value, ToolError> {
        let orchestrator = resolve(&self.handle).await?;
        match orchestrator.submit_message(input).await.map_err(ToolError::execution)? {
            MessageOutcome::Appended => Ok(json!({ "ok": true })),
            MessageOutcome::Started(accepted) => Ok(json!({
                "ok": true,
                "runId": accepted.run_id,
                "acceptedAt": accepted.accepted_at,
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// sessions.history
// ---------------------------------------------------------------------------

pub struct SessionsHistoryTool {
    handle: OrchestratorHandle,
}

impl SessionsHistoryTool {
    pub fn new(handle: OrchestratorHandle) -> Self {
        Self { handle }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryInput {
    pub session_key: SessionKey,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[async_trait::async_trait]
impl Tool for SessionsHistoryTool {
    type Input = HistoryInput;

    fn name(&self) -> &str {
        "sessions.history"
    }

    fn description(&self) -> &str {
        "Read the most recent entries of a session's log."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sessionKey": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "default": DEFAULT_HISTORY_LIMIT }
            },
            "required": ["sessionKey"]
        })
    }

    fn is_enabled(&self, _ctx: &PolicyContext) -> bool {
        is_bound(&self.handle)
    }

    async fn call(&self, _ctx: &ToolContext, input: HistoryInput) -> Result<Value, ToolError> {
        let orchestrator = resolve(&self.handle).await?;
        let limit = input.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let entries = orchestrator
            .session_history(&input.session_key, Some(limit))
            .await
            .map_err(ToolError::execution)?;
        to_value(&entries)
    }
}

// ---------------------------------------------------------------------------
// runs.wait / runs.get
// ---------------------------------------------------------------------------

pub struct RunsWaitTool {
    handle: OrchestratorHandle,
}

impl RunsWaitTool {
    pub fn new(handle: OrchestratorHandle) -> Self {
        Self { handle }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitInput {
    pub run_id: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for RunsWaitTool {
    type Input = WaitInput;

    fn name(&self) -> &str {
        "runs.wait"
    }

    fn description(&self) -> &str {
        "Wait for a run to finish and return its record. On timeout the current record is returned."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "runId": { "type": "string" },
                "timeoutMs": { "type": "integer", "minimum": 1, "maximum": MAX_WAIT_MS, "default": DEFAULT_WAIT_MS }
            },
            "required": ["runId"]
        })
    }

    fn is_enabled(&self, _ctx: &PolicyContext) -> bool {
        is_bound(&self.handle)
    }

    async fn call(&self, _ctx: &ToolContext, input: WaitInput) -> Result<Value, ToolError> {
        let orchestrator = resolve(&self.handle).await?;
        let timeout = Duration::from_millis(input.timeout_ms.unwrap_or(DEFAULT_WAIT_MS).clamp(1, MAX_WAIT_MS));
        match orchestrator
            .wait(&input.run_id, Some(timeout))
            .await
            .map_err(ToolError::execution)?
        {
            Some(record) => to_value(&record),
            None => Err(ToolError::execution(Error::RunNotFound(input.run_id))),
        }
    }
}

pub struct RunsGetTool {
    handle: OrchestratorHandle,
}

impl RunsGetTool {
    pub fn new(handle: OrchestratorHandle) -> Self {
        Self { handle }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIdInput {
    pub run_id: String,
}

#[async_trait::async_trait]
impl Tool for RunsGetTool {
    type Input = RunIdInput;

    fn name(&self) -> &str {
        "runs.get"
    }

    fn description(&self) -> &str {
        "Fetch the current record of a run without waiting."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "runId": { "type": "string" } },
            "required": ["runId"]
        })
    }

    fn is_enabled(&self, _ctx: &PolicyContext) -> bool {
        is_bound(&self.handle)
    }

    async fn call(&self, _ctx: &ToolContext, input: RunIdInput) -> Result<Value, ToolError> {
        let orchestrator = resolve(&self.handle).await?;
        match orchestrator.get_run(&input.run_id).await.map_err(ToolError::execution)? {
            Some(record) => to_value(&record),
            None => Err(ToolError::execution(Error::RunNotFound(input.run_id))),
        }
    }
}

// ---------------------------------------------------------------------------
// autopilot.tick
// ---------------------------------------------------------------------------

pub struct AutopilotTickTool {
    handle: OrchestratorHandle,
}

impl AutopilotTickTool {
    pub fn new(handle: OrchestratorHandle) -> Self {
        Self { handle }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TickInput {
    #[serde(default)]
    pub reason: Option<String>,
}

#[async_trait::async_trait]
impl Tool for AutopilotTickTool {
    type Input = TickInput;

    fn name(&self) -> &str {
        "autopilot.tick"
    }

    fn description(&self) -> &str {
        "Queue an autopilot tick for the default agent. Overlapping ticks run one after another."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "reason": { "type": "string" } }
        })
    }

    fn is_enabled(&self, _ctx: &PolicyContext) -> bool {
        is_bound(&self.handle)
    }

    async fn call(&self, ctx: &ToolContext, input: TickInput) -> Result<Value, ToolError> {
        let orchestrator = resolve(&self.handle).await?;
        let reason = input
            .reason
            .unwrap_or_else(|| format!("requested by run {}", ctx.run_id));
        let accepted = orchestrator
            .submit_autopilot_tick(&reason)
            .await
            .map_err(ToolError::execution)?;
        to_value(&accepted)
    }
}
