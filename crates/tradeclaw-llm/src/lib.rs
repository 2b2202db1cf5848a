//! Tradeclaw LLM - Model client contract and a scripted client for offline runs

pub mod client;
pub mod scripted;

pub use client::{LlmError, LlmResult, ModelClient, ModelReply, ModelRequest};
pub use scripted::{ScriptedModel, ScriptedReply};
