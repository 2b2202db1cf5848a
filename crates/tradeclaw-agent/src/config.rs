//! Orchestrator configuration
//!
//! Loaded from TOML at startup; anything left out falls back to defaults.
//!
//! ```toml
//! state_dir = "/var/lib/tradeclaw"
//! default_agent = "trader"
//! safety_policy = "Never exceed the daily notional cap."
//!
//! [lanes]
//! main = 2
//! autopilot = 1
//!
//! [[agents]]
//! id = "trader"
//! lane = "main"
//! toolPolicy = { deny = ["trade.withdraw"] }
//! ```

use crate::lane_queue::default_lanes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use tradeclaw_core::{AgentDefinition, Error, Result};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root for session logs and run records.
    pub state_dir: PathBuf,
    /// Agent used when a request names none.
    pub default_agent: String,
    /// Operator safety text injected into every system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_policy: Option<String>,
    /// Lane capacities. Lanes not listed keep their defaults.
    pub lanes: BTreeMap<String, usize>,
    pub agents: Vec<AgentDefinition>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            default_agent: "main".into(),
            safety_policy: None,
            lanes: default_lanes(),
            agents: Vec::new(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tradeclaw"))
        .unwrap_or_else(|| PathBuf::from(".tradeclaw"))
}

impl OrchestratorConfig {
    /// `~/.tradeclaw/config.toml`
    pub fn default_path() -> PathBuf {
        default_state_dir().join(CONFIG_FILE)
    }

    /// Load from `path`. A missing file yields defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(path = %path.display(), agents = config.agents.len(), "loaded config");
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::load(&Self::default_path()),
        }
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.retain(|a| a.id != agent.id);
        self.agents.push(agent);
        self
    }

    pub fn with_lane(mut self, lane: impl Into<String>, capacity: usize) -> Self {
        self.lanes.insert(lane.into(), capacity);
        self
    }

    pub fn with_safety_policy(mut self, text: impl Into<String>) -> Self {
        self.safety_policy = Some(text.into());
        self
    }

    /// Reject definitions that would fail at admission anyway.
    pub fn validate(&self) -> Result<()> {
        if self.default_agent.trim().is_empty() {
            return Err(Error::config("default_agent must not be empty"));
        }
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(Error::config("agent id must not be empty"));
            }
            if let Some(policy) = &agent.tool_policy {
                policy
                    .validate()
                    .map_err(|e| Error::config(format!("agent {}: {}", agent.id, e)))?;
            }
        }
        Ok(())
    }

    /// Defaults overlaid with the configured capacities.
    pub fn lane_capacities(&self) -> BTreeMap<String, usize> {
        let mut lanes = default_lanes();
        lanes.extend(self.lanes.iter().map(|(k, v)| (k.clone(), *v)));
        lanes
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }
}
