//! Control-plane protocol, JSON-RPC style
//!
//! Wire format:
//!
//! Request:
//!   { "id": "req-1", "method": "runs.submit", "params": { "sessionKey": "main", "input": "rebalance" } }
//!
//! Response:
//!   { "id": "req-1", "result": { "runId": "…", "acceptedAt": "…" } }
//!   { "id": "req-1", "error": { "code": -32602, "message": "invalid params: …" } }

use serde::{Deserialize, Serialize};

pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn method_not_found(id: impl Into<String>, method: &str) -> Self {
        Self::err(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, INVALID_PARAMS, message)
    }

    pub fn internal_error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, INTERNAL_ERROR, message)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}
