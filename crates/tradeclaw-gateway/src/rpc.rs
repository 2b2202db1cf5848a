//! RPC router: dispatches method calls to the agent manager
//!
//! Each method (runs.submit, sessions.send, runs.wait, ...) is handled by a
//! dedicated async function. Params are decoded into the same typed requests
//! the manager takes, so a bad payload never reaches it.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tradeclaw_agent::AgentManager;
use tradeclaw_core::{
    Error, MessageOutcome, MessageRequest, RpcRequest, RpcResponse, RunRequest, SessionKey, SpawnRequest,
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};

/// What every handler can reach.
#[derive(Clone)]
pub struct GatewayContext {
    pub manager: Arc<AgentManager>,
}

impl GatewayContext {
    pub fn new(manager: Arc<AgentManager>) -> Self {
        Self { manager }
    }
}

/// Result type for RPC handlers.
pub type RpcResult = Result<Value, (i32, String)>;

/// Route a method call to its handler.
pub async fn route_rpc(method: &str, params: Value, ctx: &GatewayContext) -> RpcResult {
    match method {
        "runs.submit" => handle_runs_submit(params, ctx).await,
        "runs.wait" => handle_runs_wait(params, ctx).await,
        "runs.get" => handle_runs_get(params, ctx).await,
        "sessions.send" => handle_sessions_send(params, ctx).await,
        "sessions.list" => handle_sessions_list(ctx).await,
        "sessions.history" => handle_sessions_history(params, ctx).await,
        "subagents.spawn" => handle_subagents_spawn(params, ctx).await,
        "autopilot.tick" => handle_autopilot_tick(params, ctx).await,
        "health" => handle_health(ctx).await,
        _ => Err((METHOD_NOT_FOUND, format!("Method not found: {}", method))),
    }
}

/// Convert an RPC result to an RpcResponse.
pub fn to_response(id: &str, result: RpcResult) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err((code, message)) => RpcResponse::err(id, code, message),
    }
}

/// Route one request envelope and wrap the outcome.
pub async fn handle_request(request: RpcRequest, ctx: &GatewayContext) -> RpcResponse {
    debug!(id = %request.id, method = %request.method, "rpc request");
    let result = route_rpc(&request.method, request.params, ctx).await;
    if let Err((code, message)) = &result {
        info!(id = %request.id, method = %request.method, code, error = %message, "rpc error");
    }
    to_response(&request.id, result)
}

fn params<T: DeserializeOwned>(params: Value) -> Result<T, (i32, String)> {
    // Methods without arguments may be called with no params at all.
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))
}

fn manager_error(e: Error) -> (i32, String) {
    if e.is_admission_error() {
        (INVALID_PARAMS, e.to_string())
    } else {
        (INTERNAL_ERROR, e.to_string())
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}

// ---------------------------------------------------------------------------
// runs.submit
// ---------------------------------------------------------------------------

async fn handle_runs_submit(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let request: RunRequest = params(params_value)?;
    let accepted = ctx.manager.submit_run(request).await.map_err(manager_error)?;
    to_value(&accepted)
}

// ---------------------------------------------------------------------------
// runs.wait / runs.get
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitParams {
    run_id: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Unknown runs yield `null`.
async fn handle_runs_wait(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let p: WaitParams = params(params_value)?;
    let record = ctx
        .manager
        .wait(&p.run_id, p.timeout_ms.map(Duration::from_millis))
        .await
        .map_err(manager_error)?;
    to_value(&record)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunIdParams {
    run_id: String,
}

async fn handle_runs_get(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let p: RunIdParams = params(params_value)?;
    let record = ctx.manager.get_run(&p.run_id).await.map_err(manager_error)?;
    to_value(&record)
}

// ---------------------------------------------------------------------------
// sessions.send / sessions.list / sessions.history
// ---------------------------------------------------------------------------

async fn handle_sessions_send(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let request: MessageRequest = params(params_value)?;
    match ctx.manager.submit_message(request).await.map_err(manager_error)? {
        MessageOutcome::Appended => Ok(json!({ "ok": true })),
        MessageOutcome::Started(accepted) => Ok(json!({
            "ok": true,
            "runId": accepted.run_id,
            "acceptedAt": accepted.accepted_at,
        })),
    }
}

async fn handle_sessions_list(ctx: &GatewayContext) -> RpcResult {
    let sessions = ctx.manager.list_sessions().await.map_err(manager_error)?;
    Ok(json!({ "sessions": sessions }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    session_key: SessionKey,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_sessions_history(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let p: HistoryParams = params(params_value)?;
    let entries = ctx
        .manager
        .session_history(&p.session_key, p.limit)
        .await
        .map_err(manager_error)?;
    Ok(json!({
        "sessionKey": p.session_key,
        "entries": entries,
    }))
}

// ---------------------------------------------------------------------------
// subagents.spawn / autopilot.tick
// ---------------------------------------------------------------------------

async fn handle_subagents_spawn(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let request: SpawnRequest = params(params_value)?;
    if request.task.trim().is_empty() {
        return Err((INVALID_PARAMS, "task must not be empty".to_string()));
    }
    let accepted = ctx.manager.spawn_subagent(request).await.map_err(manager_error)?;
    to_value(&accepted)
}

#[derive(Deserialize)]
struct TickParams {
    #[serde(default)]
    reason: Option<String>,
}

async fn handle_autopilot_tick(params_value: Value, ctx: &GatewayContext) -> RpcResult {
    let p: TickParams = params(params_value)?;
    let reason = p.reason.unwrap_or_else(|| "requested over rpc".to_string());
    let accepted = ctx
        .manager
        .submit_autopilot_tick(&reason)
        .await
        .map_err(manager_error)?;
    to_value(&accepted)
}

// ---------------------------------------------------------------------------
// health
// ---------------------------------------------------------------------------

async fn handle_health(ctx: &GatewayContext) -> RpcResult {
    Ok(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "defaultAgent": ctx.manager.default_agent(),
        "tools": ctx.manager.tools().len(),
        "queue": ctx.manager.queue_stats(),
    }))
}
