//! Agent manager: the orchestrator
//!
//! Accepts run, message, tick and spawn requests, records them, and hands
//! them to the lane queue. The queue never gives a handle back, so every run
//! also gets a deferred result here that `wait` can subscribe to.

use crate::config::OrchestratorConfig;
use crate::lane_queue::{LaneQueue, QueueStats, QueueTask, LANE_AUTOPILOT, LANE_MAIN, LANE_SUBAGENT};
use crate::run_store::RunStore;
use crate::session_store::SessionStore;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tradeclaw_core::{
    merge_tool_policies, validate_run_id, AgentDefinition, Error, Message, MessageOutcome, MessageRequest, Result,
    RunAccepted, RunRecord, RunRequest, RunStatus, SessionHistoryEntry, SessionKey, SessionSummary, SpawnAccepted,
    SpawnRequest, ToolPolicy,
};
use tradeclaw_llm::ModelClient;
use tradeclaw_tools::{
    create_default_registry, create_orchestrator_handle, LogSink, NotificationSink, Orchestrator, OrchestratorHandle,
    ToolRegistry,
};

/// Tool families a spawned run may never reach.
pub const SUBAGENT_DENY: [&str; 3] = ["sessions.*", "runs.*", "autopilot.*"];

/// Restriction merged into every run that has a parent.
pub fn subagent_restriction() -> ToolPolicy {
    ToolPolicy::deny(SUBAGENT_DENY)
}

/// Everything the executor needs to run one accepted request.
pub(crate) struct RunJob {
    pub record: RunRecord,
    pub agent: AgentDefinition,
    pub request: RunRequest,
}

pub struct AgentManagerBuilder {
    config: OrchestratorConfig,
    model: Arc<dyn ModelClient>,
    tools: Option<(ToolRegistry, OrchestratorHandle)>,
    notifier: Arc<dyn NotificationSink>,
}

impl AgentManagerBuilder {
    /// Use a registry built by the caller. `handle` must be the one its
    /// management tools were created with; it is bound during `build`.
    pub fn tools(mut self, registry: ToolRegistry, handle: OrchestratorHandle) -> Self {
        self.tools = Some((registry, handle));
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub async fn build(self) -> Arc<AgentManager> {
        let (registry, handle) = self.tools.unwrap_or_else(|| {
            let handle = create_orchestrator_handle();
            (create_default_registry(handle.clone()), handle)
        });

        let config = self.config;
        let agents = config
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();

        let manager = Arc::new_cyclic(|me| AgentManager {
            me: me.clone(),
            queue: LaneQueue::new(config.lane_capacities()),
            sessions: SessionStore::new(&config.state_dir),
            runs: RunStore::new(&config.state_dir),
            agents,
            default_agent: config.default_agent.clone(),
            safety_policy: config.safety_policy.clone(),
            model: self.model,
            tools: Arc::new(registry),
            notifier: self.notifier,
            deferred: DashMap::new(),
        });

        let weak: Weak<dyn Orchestrator> = Arc::downgrade(&manager) as Weak<dyn Orchestrator>;
        *handle.write().await = Some(weak);
        info!(
            state_dir = %config.state_dir.display(),
            default_agent = %config.default_agent,
            tools = ?manager.tools.names(),
            "agent manager ready"
        );
        manager
    }
}

pub struct AgentManager {
    me: Weak<AgentManager>,
    pub(crate) queue: LaneQueue,
    pub(crate) sessions: SessionStore,
    pub(crate) runs: RunStore,
    pub(crate) agents: HashMap<String, AgentDefinition>,
    pub(crate) default_agent: String,
    pub(crate) safety_policy: Option<String>,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    /// Pending results, one per run that has not finished yet.
    deferred: DashMap<String, watch::Sender<Option<RunRecord>>>,
}

impl AgentManager {
    pub fn builder(config: OrchestratorConfig, model: Arc<dyn ModelClient>) -> AgentManagerBuilder {
        AgentManagerBuilder {
            config,
            model,
            tools: None,
            notifier: Arc::new(LogSink),
        }
    }

    /// Manager with only the built-in management tools.
    pub async fn new(config: OrchestratorConfig, model: Arc<dyn ModelClient>) -> Arc<Self> {
        Self::builder(config, model).build().await
    }

    /// The configured definition, or a permissive one for unknown ids.
    pub fn agent(&self, id: &str) -> AgentDefinition {
        self.agents
            .get(id)
            .cloned()
            .unwrap_or_else(|| AgentDefinition::permissive(id))
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate, record and queue a run. Returns once it is queued.
    pub async fn submit_run(&self, request: RunRequest) -> Result<RunAccepted> {
        request.session_key.validate()?;
        if let Some(key) = &request.parent_session_key {
            key.validate()?;
        }
        if let Some(policy) = &request.tool_policy {
            policy.validate()?;
        }
        let manager = self
            .me
            .upgrade()
            .ok_or_else(|| Error::Internal("agent manager is shutting down".into()))?;

        let agent_id = request
            .agent_id
            .clone()
            .unwrap_or_else(|| self.default_agent.clone());
        let agent = self.agent(&agent_id);
        let lane = request
            .lane
            .clone()
            .or_else(|| agent.lane.clone())
            .unwrap_or_else(|| LANE_MAIN.to_string());

        let run_id = uuid::Uuid::new_v4().to_string();
        let accepted_at = Utc::now();
        let record = RunRecord {
            run_id: run_id.clone(),
            agent_id,
            session_key: request.session_key.clone(),
            status: RunStatus::Accepted,
            accepted_at,
            started_at: None,
            completed_at: None,
            lane: lane.clone(),
            parent_run_id: request.parent_run_id.clone(),
            parent_session_key: request.parent_session_key.clone(),
            metadata: request.metadata.clone(),
            error: None,
            output: None,
        };

        if let Err(e) = self.runs.write(&record).await {
            warn!(run_id = %run_id, error = %e, "failed to persist accepted run");
        }
        let (tx, _) = watch::channel(None);
        self.deferred.insert(run_id.clone(), tx);

        info!(
            run_id = %run_id,
            session = %record.session_key,
            agent = %record.agent_id,
            lane = %lane,
            parent = ?record.parent_run_id,
            "run accepted"
        );

        let session_key = record.session_key.clone();
        let job = RunJob { record, agent, request };
        self.queue.enqueue(QueueTask::new(run_id.clone(), session_key, lane, move || async move {
            manager.run_job(job).await
        }));

        Ok(RunAccepted { run_id, accepted_at })
    }

    /// Log a message to a session, and start a run with it if asked to.
    pub async fn submit_message(&self, request: MessageRequest) -> Result<MessageOutcome> {
        request.session_key.validate()?;
        if request.trigger_run {
            let mut run = RunRequest::new(request.session_key, request.content);
            run.agent_id = request.agent_id;
            return Ok(MessageOutcome::Started(self.submit_run(run).await?));
        }

        self.sessions
            .append(&request.session_key, &SessionHistoryEntry::message(Message::user(request.content)))
            .await?;
        Ok(MessageOutcome::Appended)
    }

    /// Queue a run on the default agent's autopilot session. Ticks share one
    /// session key, so an overlapping tick waits for the one in flight.
    pub async fn submit_autopilot_tick(&self, reason: &str) -> Result<RunAccepted> {
        let agent_id = self.default_agent.clone();
        let request = RunRequest::new(
            SessionKey::autopilot(&agent_id),
            format!("Autopilot tick: {}. Review positions and act if needed.", reason),
        )
        .with_agent(agent_id)
        .with_lane(LANE_AUTOPILOT)
        .with_metadata("trigger", "autopilot")
        .with_metadata("reason", reason);
        self.submit_run(request).await
    }

    /// Start a child run on a fresh session, restricted from managing sessions or runs.
    pub async fn spawn_subagent(&self, request: SpawnRequest) -> Result<SpawnAccepted> {
        let agent_id = request
            .agent_id
            .clone()
            .unwrap_or_else(|| self.default_agent.clone());
        let child_session_key = SessionKey::subagent(&agent_id);
        let policy = merge_tool_policies(request.tool_policy.as_ref(), Some(&subagent_restriction()));

        let mut run = RunRequest::new(child_session_key.clone(), request.task).with_agent(agent_id);
        run.lane = Some(LANE_SUBAGENT.to_string());
        run.tool_policy = policy;
        run.parent_run_id = request.parent_run_id;
        run.parent_session_key = request.parent_session_key;
        if let Some(label) = request.label {
            run.metadata.insert("label".into(), Value::String(label));
        }

        let accepted = self.submit_run(run).await?;
        Ok(SpawnAccepted {
            run_id: accepted.run_id,
            accepted_at: accepted.accepted_at,
            child_session_key,
        })
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// The run's record once it is terminal, or its current record if
    /// `timeout` passes first. `None` for unknown runs.
    pub async fn wait(&self, run_id: &str, timeout: Option<Duration>) -> Result<Option<RunRecord>> {
        validate_run_id(run_id)?;
        let Some(mut rx) = self.deferred.get(run_id).map(|tx| tx.subscribe()) else {
            return self.runs.get(run_id).await;
        };

        let finished = async move {
            loop {
                if let Some(record) = rx.borrow_and_update().clone() {
                    return Some(record);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        let outcome = match timeout.filter(|t| !t.is_zero()) {
            Some(t) => tokio::time::timeout(t, finished).await.ok().flatten(),
            None => finished.await,
        };
        match outcome {
            Some(record) => Ok(Some(record)),
            None => self.runs.get(run_id).await,
        }
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.runs.get(run_id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.sessions.list().await
    }

    pub async fn session_history(&self, key: &SessionKey, limit: Option<usize>) -> Result<Vec<SessionHistoryEntry>> {
        self.sessions.read(key, limit).await
    }

    /// Resolve a run's deferred result. Subscribers that arrive later read the store.
    pub(crate) fn resolve(&self, record: RunRecord) {
        if let Some((_, tx)) = self.deferred.remove(&record.run_id) {
            tx.send_replace(Some(record));
        }
    }
}

#[async_trait::async_trait]
impl Orchestrator for AgentManager {
    async fn submit_run(&self, request: RunRequest) -> Result<RunAccepted> {
        AgentManager::submit_run(self, request).await
    }

    async fn submit_message(&self, request: MessageRequest) -> Result<MessageOutcome> {
        AgentManager::submit_message(self, request).await
    }

    async fn submit_autopilot_tick(&self, reason: &str) -> Result<RunAccepted> {
        AgentManager::submit_autopilot_tick(self, reason).await
    }

    async fn spawn_subagent(&self, request: SpawnRequest) -> Result<SpawnAccepted> {
        AgentManager::spawn_subagent(self, request).await
    }

    async fn wait(&self, run_id: &str, timeout: Option<Duration>) -> Result<Option<RunRecord>> {
        AgentManager::wait(self, run_id, timeout).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        AgentManager::get_run(self, run_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        AgentManager::list_sessions(self).await
    }

    async fn session_history(&self, key: &SessionKey, limit: Option<usize>) -> Result<Vec<SessionHistoryEntry>> {
        AgentManager::session_history(self, key, limit).await
    }
}
