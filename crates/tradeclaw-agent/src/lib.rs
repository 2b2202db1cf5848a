//! Tradeclaw Agent: run orchestration
//!
//! The [`AgentManager`] accepts work, the [`LaneQueue`] decides when it runs,
//! and the executor drives each run's tool-calling loop. Session logs and run
//! records live under the configured state directory.

pub mod config;
pub mod executor;
pub mod lane_queue;
pub mod manager;
pub mod prompt;
pub mod run_store;
pub mod session_store;

pub use config::OrchestratorConfig;
pub use executor::{effective_policy, MAX_STEPS};
pub use lane_queue::{default_lanes, LaneQueue, QueueStats, QueueTask, LANE_AUTOPILOT, LANE_MAIN, LANE_SUBAGENT};
pub use manager::{subagent_restriction, AgentManager, AgentManagerBuilder, SUBAGENT_DENY};
pub use prompt::build_system_prompt;
pub use run_store::RunStore;
pub use session_store::SessionStore;
