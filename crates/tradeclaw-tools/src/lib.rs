//! Tradeclaw Tools: typed tool registry and the built-in management tools
//!
//! Trading tools (quotes, balances, swaps) live with their integrations and are
//! registered next to these by whoever builds the registry.

pub mod notify;
pub mod registry;
pub mod tools;

pub use notify::{emit, LogSink, Notice, NoticeLevel, NotificationSink};
pub use registry::{PolicyContext, Tool, ToolContext, ToolError, ToolRegistry};
pub use tools::session_tools::{create_orchestrator_handle, Orchestrator, OrchestratorHandle};

/// Registry with every built-in management tool, bound to `handle`.
///
/// After constructing the orchestrator, store a weak reference to it in the
/// handle; until then the tools report themselves disabled.
pub fn create_default_registry(handle: OrchestratorHandle) -> ToolRegistry {
    use tools::session_tools::*;

    let mut registry = ToolRegistry::new();
    registry.register(SessionsSpawnTool::new(handle.clone()));
    registry.register(SessionsSendTool::new(handle.clone()));
    registry.register(SessionsHistoryTool::new(handle.clone()));
    registry.register(RunsWaitTool::new(handle.clone()));
    registry.register(RunsGetTool::new(handle.clone()));
    registry.register(AutopilotTickTool::new(handle));
    registry
}
