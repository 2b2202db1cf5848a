//! Tradeclaw Core - Types, tool policy engine, and error handling

pub mod agent;
pub mod error;
pub mod history;
pub mod policy;
pub mod protocol;
pub mod run;
pub mod types;

pub use agent::AgentDefinition;
pub use error::{Error, Result};
pub use history::{SessionEvent, SessionHistoryEntry, SessionSummary, SubagentAnnounce};
pub use policy::{is_tool_allowed, merge_tool_policies, ToolPolicy};
pub use protocol::*;
pub use run::*;
pub use types::*;
