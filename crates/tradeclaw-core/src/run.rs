//! Run records and the requests that create them

use crate::policy::ToolPolicy;
use crate::types::SessionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a run. `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Accepted,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal forward moves. `Accepted -> Failed` covers runs that could not start.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Accepted, Self::Running)
                | (Self::Accepted, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What a finished run produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    /// Last assistant text.
    pub text: String,
    /// Tools that were dispatched and returned a result, in call order.
    pub actions_taken: Vec<String>,
}

/// Durable record of one run, from acceptance to a terminal status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    #[serde(default)]
    pub agent_id: String,
    pub session_key: SessionKey,
    pub status: RunStatus,
    pub accepted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lane: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_key: Option<SessionKey>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,
}

impl RunRecord {
    /// Placeholder for a run id that has no stored record yet.
    pub fn shell(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: String::new(),
            session_key: SessionKey::new(""),
            status: RunStatus::Accepted,
            accepted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            lane: String::new(),
            parent_run_id: None,
            parent_session_key: None,
            metadata: Map::new(),
            error: None,
            output: None,
        }
    }

    /// Shallow merge: every field set in `patch` replaces the stored value.
    pub fn apply(&mut self, patch: RunPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(output) = patch.output {
            self.output = Some(output);
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn label(&self) -> Option<&str> {
        self.metadata.get("label").and_then(Value::as_str)
    }
}

/// Partial update applied by [`RunRecord::apply`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output: Option<RunOutput>,
    pub metadata: Option<Map<String, Value>>,
}

impl RunPatch {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RunStatus::Running),
            started_at: Some(at),
            ..Default::default()
        }
    }

    pub fn completed(at: DateTime<Utc>, output: RunOutput) -> Self {
        Self {
            status: Some(RunStatus::Completed),
            completed_at: Some(at),
            output: Some(output),
            ..Default::default()
        }
    }

    pub fn failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            status: Some(RunStatus::Failed),
            completed_at: Some(at),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Request to execute an agent against a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub session_key: SessionKey,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_policy: Option<ToolPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_key: Option<SessionKey>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RunRequest {
    pub fn new(session_key: impl Into<SessionKey>, input: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            input: input.into(),
            agent_id: None,
            lane: None,
            tool_policy: None,
            parent_run_id: None,
            parent_session_key: None,
            metadata: Map::new(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
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

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_parent(&self) -> bool {
        self.parent_run_id.is_some() || self.parent_session_key.is_some()
    }
}

/// Returned as soon as a run is queued; execution happens later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Request to delegate a task to a child run on a fresh session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_key: Option<SessionKey>,
    /// Extra restrictions for the child, merged under the forced sub-agent denies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_policy: Option<ToolPolicy>,
}

impl SpawnRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, run_id: impl Into<String>, session_key: impl Into<SessionKey>) -> Self {
        self.parent_run_id = Some(run_id.into());
        self.parent_session_key = Some(session_key.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnAccepted {
    pub run_id: String,
    pub accepted_at: DateTime<Utc>,
    pub child_session_key: SessionKey,
}

/// A message delivered to a session, optionally starting a run with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub session_key: SessionKey,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub trigger_run: bool,
}

impl MessageRequest {
    pub fn new(session_key: impl Into<SessionKey>, content: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            content: content.into(),
            agent_id: None,
            trigger_run: false,
        }
    }

    pub fn triggering_run(mut self) -> Self {
        self.trigger_run = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MessageOutcome {
    /// The message was logged; no run was started.
    Appended,
    Started(RunAccepted),
}
