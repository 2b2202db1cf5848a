//! Tests for tradeclaw-tools: typed registry dispatch, notifications, and the management tools

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tradeclaw_core::*;
use tradeclaw_tools::*;

// ===========================================================================
// Fixtures
// ===========================================================================

struct QuoteTool;

#[derive(Deserialize)]
struct QuoteInput {
    symbol: String,
}

#[async_trait::async_trait]
impl Tool for QuoteTool {
    type Input = QuoteInput;

    fn name(&self) -> &str {
        "market.quote"
    }

    fn description(&self) -> &str {
        "Quote a symbol"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"symbol": {"type": "string"}}, "required": ["symbol"]})
    }

    async fn call(&self, _ctx: &ToolContext, input: QuoteInput) -> std::result::Result<Value, ToolError> {
        if input.symbol == "HALTED" {
            return Err(ToolError::execution("market halted"));
        }
        Ok(json!({"symbol": input.symbol, "price": 101.5}))
    }
}

/// Only offered to top-level runs.
struct SwapTool;

#[async_trait::async_trait]
impl Tool for SwapTool {
    type Input = Value;

    fn name(&self) -> &str {
        "trade.swap"
    }

    fn description(&self) -> &str {
        "Swap tokens"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn is_enabled(&self, ctx: &PolicyContext) -> bool {
        !ctx.is_subagent
    }

    async fn call(&self, _ctx: &ToolContext, _input: Value) -> std::result::Result<Value, ToolError> {
        Ok(json!({"filled": true}))
    }
}

fn ctx() -> ToolContext {
    ToolContext::new("run-1", SessionKey::new("main"), "trader")
}

fn child_ctx() -> ToolContext {
    ToolContext::new("run-2", SessionKey::new("subagent:trader:x"), "trader").with_parent(Some("run-1".into()))
}

#[derive(Default)]
struct FakeOrchestrator {
    spawns: Mutex<Vec<SpawnRequest>>,
    messages: Mutex<Vec<MessageRequest>>,
    ticks: Mutex<Vec<String>>,
}

fn accepted(run_id: &str) -> RunAccepted {
    RunAccepted {
        run_id: run_id.into(),
        accepted_at: chrono::Utc::now(),
    }
}

#[async_trait::async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn submit_run(&self, _request: RunRequest) -> tradeclaw_core::Result<RunAccepted> {
        Ok(accepted("r-run"))
    }

    async fn submit_message(&self, request: MessageRequest) -> tradeclaw_core::Result<MessageOutcome> {
        let trigger = request.trigger_run;
        self.messages.lock().unwrap().push(request);
        Ok(if trigger {
            MessageOutcome::Started(accepted("r-msg"))
        } else {
            MessageOutcome::Appended
        })
    }

    async fn submit_autopilot_tick(&self, reason: &str) -> tradeclaw_core::Result<RunAccepted> {
        self.ticks.lock().unwrap().push(reason.to_string());
        Ok(accepted("r-tick"))
    }

    async fn spawn_subagent(&self, request: SpawnRequest) -> tradeclaw_core::Result<SpawnAccepted> {
        self.spawns.lock().unwrap().push(request);
        Ok(SpawnAccepted {
            run_id: "r-child".into(),
            accepted_at: chrono::Utc::now(),
            child_session_key: SessionKey::new("subagent:main:abc"),
        })
    }

    async fn wait(&self, run_id: &str, _timeout: Option<Duration>) -> tradeclaw_core::Result<Option<RunRecord>> {
        self.get_run(run_id).await
    }

    async fn get_run(&self, run_id: &str) -> tradeclaw_core::Result<Option<RunRecord>> {
        if run_id == "known" {
            Ok(Some(RunRecord::shell("known")))
        } else {
            Ok(None)
        }
    }

    async fn list_sessions(&self) -> tradeclaw_core::Result<Vec<SessionSummary>> {
        Ok(vec![])
    }

    async fn session_history(
        &self,
        _session_key: &SessionKey,
        limit: Option<usize>,
    ) -> tradeclaw_core::Result<Vec<SessionHistoryEntry>> {
        let entries = vec![
            SessionHistoryEntry::message(Message::user("a")),
            SessionHistoryEntry::message(Message::assistant("b")),
        ];
        let skip = entries.len().saturating_sub(limit.unwrap_or(usize::MAX));
        Ok(entries.into_iter().skip(skip).collect())
    }
}

async fn bound_registry() -> (ToolRegistry, Arc<FakeOrchestrator>) {
    let handle = create_orchestrator_handle();
    let registry = create_default_registry(handle.clone());
    let orchestrator = Arc::new(FakeOrchestrator::default());
    let as_dyn: Arc<dyn Orchestrator> = orchestrator.clone();
    *handle.write().await = Some(Arc::downgrade(&as_dyn));
    (registry, orchestrator)
}

// ===========================================================================
// ToolRegistry
// ===========================================================================

#[test]
fn registry_default_is_empty() {
    let reg = ToolRegistry::new();
    assert!(reg.is_empty());
    assert!(reg.list_schemas(&ctx().policy_context()).is_empty());
}

#[test]
fn schemas_are_sorted_and_filtered_by_enablement() {
    let mut reg = ToolRegistry::new();
    reg.register(SwapTool);
    reg.register(QuoteTool);

    let names: Vec<String> = reg.list_schemas(&ctx().policy_context()).into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["market.quote", "trade.swap"]);

    let names: Vec<String> = reg
        .list_schemas(&child_ctx().policy_context())
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["market.quote"]);
}

#[tokio::test]
async fn invoke_deserializes_typed_input() {
    let mut reg = ToolRegistry::new();
    reg.register(QuoteTool);
    let out = reg.invoke("market.quote", &ctx(), json!({"symbol": "ETH"})).await.unwrap();
    assert_eq!(out["price"], 101.5);
}

#[tokio::test]
async fn invoke_rejects_input_that_does_not_fit() {
    let mut reg = ToolRegistry::new();
    reg.register(QuoteTool);
    let err = reg.invoke("market.quote", &ctx(), json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidInput { .. }));
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn invoke_unknown_and_disabled_tools() {
    let mut reg = ToolRegistry::new();
    reg.register(SwapTool);

    let err = reg.invoke("market.nope", &ctx(), json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));

    let err = reg.invoke("trade.swap", &child_ctx(), json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::Disabled(_)));
}

#[tokio::test]
async fn invoke_surfaces_execution_errors() {
    let mut reg = ToolRegistry::new();
    reg.register(QuoteTool);
    let err = reg.invoke("market.quote", &ctx(), json!({"symbol": "HALTED"})).await.unwrap_err();
    assert_eq!(err.to_string(), "market halted");
}

#[test]
fn register_replaces_same_name() {
    let mut reg = ToolRegistry::new();
    assert!(reg.is_empty());
    reg.register(QuoteTool);
    reg.register(QuoteTool);
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.names(), vec!["market.quote"]);
}

// ===========================================================================
// Notifications
// ===========================================================================

struct BrokenSink;

#[async_trait::async_trait]
impl NotificationSink for BrokenSink {
    async fn emit(&self, _notice: &Notice) -> std::result::Result<(), String> {
        Err("webhook down".into())
    }
}

#[tokio::test]
async fn emit_swallows_sink_failures() {
    emit(&BrokenSink, Notice::warning("run failed", "boom")).await;
    emit(&LogSink, Notice::info("run done", "ok").for_run("r1", SessionKey::new("main"))).await;
}

#[test]
fn notice_serializes_camel_case() {
    let notice = Notice::warning("t", "b").for_run("r1", SessionKey::new("main"));
    let json = serde_json::to_value(&notice).unwrap();
    assert_eq!(json["level"], "warning");
    assert_eq!(json["runId"], "r1");
    assert_eq!(json["sessionKey"], "main");
}

// ===========================================================================
// Management tools
// ===========================================================================

#[test]
fn default_registry_has_every_management_tool() {
    let reg = create_default_registry(create_orchestrator_handle());
    assert_eq!(
        reg.names(),
        vec![
            "autopilot.tick",
            "runs.get",
            "runs.wait",
            "sessions.history",
            "sessions.send",
            "sessions.spawn"
        ]
    );
}

#[test]
fn unbound_management_tools_are_hidden() {
    let reg = create_default_registry(create_orchestrator_handle());
    assert!(reg.list_schemas(&ctx().policy_context()).is_empty());
}

#[tokio::test]
async fn spawn_links_child_to_calling_run() {
    let (reg, orch) = bound_registry().await;
    let out = reg
        .invoke("sessions.spawn", &ctx(), json!({"task": "scan pools", "label": "scan"}))
        .await
        .unwrap();
    assert_eq!(out["runId"], "r-child");
    assert_eq!(out["childSessionKey"], "subagent:main:abc");

    let spawns = orch.spawns.lock().unwrap();
    assert_eq!(spawns.len(), 1);
    assert_eq!(spawns[0].task, "scan pools");
    assert_eq!(spawns[0].parent_run_id.as_deref(), Some("run-1"));
    assert_eq!(spawns[0].parent_session_key, Some(SessionKey::new("main")));
    assert_eq!(spawns[0].label.as_deref(), Some("scan"));
}

#[tokio::test]
async fn spawn_rejects_blank_task() {
    let (reg, orch) = bound_registry().await;
    let err = reg.invoke("sessions.spawn", &ctx(), json!({"task": "  "})).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidInput { .. }));
    assert!(orch.spawns.lock().unwrap().is_empty());
}

#[tokio::test]
async fn spawn_is_not_offered_to_subagents() {
    let (reg, _orch) = bound_registry().await;
    let names: Vec<String> = reg
        .list_schemas(&child_ctx().policy_context())
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert!(!names.contains(&"sessions.spawn".to_string()));
    assert!(names.contains(&"runs.get".to_string()));
}

#[tokio::test]
async fn send_without_trigger_only_appends() {
    let (reg, orch) = bound_registry().await;
    let out = reg
        .invoke("sessions.send", &ctx(), json!({"sessionKey": "desk", "content": "fyi"}))
        .await
        .unwrap();
    assert_eq!(out, json!({"ok": true}));

    let out = reg
        .invoke(
            "sessions.send",
            &ctx(),
            json!({"sessionKey": "desk", "content": "go", "triggerRun": true}),
        )
        .await
        .unwrap();
    assert_eq!(out["runId"], "r-msg");
    assert_eq!(orch.messages.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn history_honours_limit() {
    let (reg, _orch) = bound_registry().await;
    let out = reg
        .invoke("sessions.history", &ctx(), json!({"sessionKey": "main", "limit": 1}))
        .await
        .unwrap();
    let entries = out.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["message"]["content"], "b");
}

#[tokio::test]
async fn runs_get_and_wait() {
    let (reg, _orch) = bound_registry().await;
    let out = reg.invoke("runs.get", &ctx(), json!({"runId": "known"})).await.unwrap();
    assert_eq!(out["runId"], "known");

    let err = reg
        .invoke("runs.wait", &ctx(), json!({"runId": "missing", "timeoutMs": 5}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "run not found: missing");
}

#[tokio::test]
async fn tick_defaults_reason_to_calling_run() {
    let (reg, orch) = bound_registry().await;
    let out = reg.invoke("autopilot.tick", &ctx(), json!({})).await.unwrap();
    assert_eq!(out["runId"], "r-tick");
    assert_eq!(orch.ticks.lock().unwrap()[0], "requested by run run-1");
}

#[tokio::test]
async fn dropped_orchestrator_is_an_execution_error() {
    let handle = create_orchestrator_handle();
    let reg = create_default_registry(handle.clone());
    {
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(FakeOrchestrator::default());
        let weak: Weak<dyn Orchestrator> = Arc::downgrade(&orchestrator);
        *handle.write().await = Some(weak);
    }
    let err = reg.invoke("runs.get", &ctx(), json!({"runId": "known"})).await.unwrap_err();
    assert!(matches!(err, ToolError::Execution(_)));
}
