//! Tradeclaw Gateway: the control-plane method table
//!
//! Transport-agnostic. A server reads [`RpcRequest`]s off whatever wire it
//! speaks and writes back what [`handle_request`] returns.
//!
//! [`RpcRequest`]: tradeclaw_core::RpcRequest

pub mod rpc;

pub use rpc::{handle_request, route_rpc, to_response, GatewayContext, RpcResult};
