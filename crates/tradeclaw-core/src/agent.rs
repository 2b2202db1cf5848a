//! Agent definitions

use crate::policy::ToolPolicy;
use serde::{Deserialize, Serialize};

/// Immutable description of an agent the orchestrator can run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    /// Replaces the default system prompt preamble.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Lane used when a request does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_policy: Option<ToolPolicy>,
    #[serde(default = "default_can_spawn")]
    pub can_spawn_subagents: bool,
}

fn default_can_spawn() -> bool {
    true
}

impl AgentDefinition {
    /// Definition used for ids nothing was configured for: no overrides, no restrictions.
    pub fn permissive(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instructions: None,
            model: None,
            lane: None,
            tool_policy: None,
            can_spawn_subagents: true,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    pub fn with_tool_policy(mut self, policy: ToolPolicy) -> Self {
        self.tool_policy = Some(policy);
        self
    }

    pub fn without_subagents(mut self) -> Self {
        self.can_spawn_subagents = false;
        self
    }
}
