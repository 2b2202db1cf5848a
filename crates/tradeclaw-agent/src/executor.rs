//! Per-run executor: the bounded tool-calling loop

use crate::manager::{subagent_restriction, AgentManager, RunJob};
use crate::prompt::build_system_prompt;
use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};
use tradeclaw_core::{
    is_tool_allowed, merge_tool_policies, AgentDefinition, Error, Message, Result, Role, RunOutput, RunPatch,
    RunRecord, RunRequest, SessionEvent, SessionHistoryEntry, SessionKey, SubagentAnnounce, ToolCall, ToolPolicy,
};
use tradeclaw_llm::ModelRequest;
use tradeclaw_tools::{emit, Notice, ToolContext};

/// Model calls allowed per run.
pub const MAX_STEPS: usize = 6;

const AUDIT_TARGET: &str = "tradeclaw::audit";

/// What happened to one tool call.
struct Dispatched {
    args: Value,
    content: String,
    /// Marker recorded on the `tool_call` entry.
    error: Option<String>,
    succeeded: bool,
}

/// The policy a run executes under: agent, then request, then the
/// restrictions implied by the agent's and the run's position.
pub fn effective_policy(agent: &AgentDefinition, request: &RunRequest) -> Option<ToolPolicy> {
    let mut policy = merge_tool_policies(agent.tool_policy.as_ref(), request.tool_policy.as_ref());
    if !agent.can_spawn_subagents {
        policy = merge_tool_policies(policy.as_ref(), Some(&ToolPolicy::deny(["sessions.spawn"])));
    }
    if request.has_parent() {
        policy = merge_tool_policies(policy.as_ref(), Some(&subagent_restriction()));
    }
    policy
}

impl AgentManager {
    /// Drive one queued run to a terminal status. The error string goes back
    /// to the lane queue for logging; the record has already been updated.
    pub(crate) async fn run_job(&self, job: RunJob) -> std::result::Result<(), String> {
        let RunJob {
            mut record,
            agent,
            request,
        } = job;

        let started = RunPatch::started(Utc::now());
        record.apply(started.clone());
        self.persist(&record, started).await;
        info!(run_id = %record.run_id, session = %record.session_key, agent = %agent.id, "run started");

        let outcome = match AssertUnwindSafe(self.execute(&record, &agent, &request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Internal("run panicked".into())),
        };

        let patch = match &outcome {
            Ok(output) => RunPatch::completed(Utc::now(), output.clone()),
            Err(e) => RunPatch::failed(Utc::now(), e.to_string()),
        };
        record.apply(patch.clone());
        self.persist(&record, patch).await;

        match &outcome {
            Ok(output) => info!(
                run_id = %record.run_id,
                actions = output.actions_taken.len(),
                "run completed"
            ),
            Err(e) => {
                error!(run_id = %record.run_id, session = %record.session_key, error = %e, "run failed");
                let notice = Notice::warning(format!("Run {} failed", record.run_id), e.to_string())
                    .for_run(&record.run_id, record.session_key.clone());
                emit(self.notifier.as_ref(), notice).await;
            }
        }

        self.announce_to_parent(&record).await;
        self.resolve(record);
        outcome.map(|_| ()).map_err(|e| e.to_string())
    }

    /// Patch the stored record. When nothing is stored, or the patch is
    /// refused because an earlier write was lost, write the whole record.
    async fn persist(&self, record: &RunRecord, patch: RunPatch) {
        // A patch onto a missing record would leave a shell with no session.
        let patched = match self.runs.get(&record.run_id).await {
            Ok(Some(_)) => match self.runs.update(&record.run_id, patch).await {
                Ok(_) => true,
                Err(e) => {
                    debug!(run_id = %record.run_id, error = %e, "run patch refused, rewriting record");
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                debug!(run_id = %record.run_id, error = %e, "cannot read stored run, rewriting record");
                false
            }
        };
        if patched {
            return;
        }
        if let Err(e) = self.runs.write(record).await {
            warn!(run_id = %record.run_id, status = %record.status, error = %e, "failed to persist run");
        }
    }

    /// Append to the session log. Failures are logged; the run keeps its
    /// conversation in memory and carries on.
    async fn log(&self, run_id: &str, key: &SessionKey, entry: SessionHistoryEntry) {
        if let Err(e) = self.sessions.append(key, &entry).await {
            warn!(run_id = %run_id, session = %key, kind = entry.kind(), error = %e, "failed to append to session log");
        }
    }

    async fn announce_to_parent(&self, record: &RunRecord) {
        let Some(parent) = &record.parent_session_key else {
            return;
        };
        let announce = SubagentAnnounce {
            child_run_id: record.run_id.clone(),
            child_session_key: record.session_key.clone(),
            agent_id: record.agent_id.clone(),
            status: record.status,
            parent_run_id: record.parent_run_id.clone(),
            label: record.label().map(str::to_string),
            text: record.output.as_ref().map(|o| o.text.clone()).filter(|t| !t.is_empty()),
            error: record.error.clone(),
        };
        let entry = SessionHistoryEntry::now(SessionEvent::SubagentAnnounce(announce));
        match self.sessions.append(parent, &entry).await {
            Ok(()) => debug!(run_id = %record.run_id, parent = %parent, "announced to parent session"),
            Err(e) => warn!(run_id = %record.run_id, parent = %parent, error = %e, "failed to announce to parent"),
        }
    }

    /// Well-formed messages from the session log, system prompts first.
    async fn load_conversation(&self, key: &SessionKey) -> Result<Vec<Message>> {
        let (system, rest): (Vec<Message>, Vec<Message>) = self
            .sessions
            .get_messages(key)
            .await?
            .into_iter()
            .filter(Message::is_well_formed)
            .partition(|m| m.role == Role::System);
        Ok(system.into_iter().chain(rest).collect())
    }

    async fn execute(&self, record: &RunRecord, agent: &AgentDefinition, request: &RunRequest) -> Result<RunOutput> {
        let key = &record.session_key;
        let mut messages = self.load_conversation(key).await?;

        let policy = effective_policy(agent, request);
        let ctx = ToolContext::new(&record.run_id, key.clone(), &agent.id)
            .with_parent(record.parent_run_id.clone())
            .with_notifier(self.notifier.clone());
        let tools: Vec<_> = self
            .tools
            .list_schemas(&ctx.policy_context())
            .into_iter()
            .filter(|t| is_tool_allowed(policy.as_ref(), &t.name))
            .collect();

        if !messages.iter().any(|m| m.role == Role::System) {
            let system = Message::system(build_system_prompt(agent, self.safety_policy.as_deref(), &tools));
            self.log(&record.run_id, key, SessionHistoryEntry::message(system.clone()))
                .await;
            messages.insert(0, system);
        }

        let input = Message::user(request.input.clone());
        self.log(&record.run_id, key, SessionHistoryEntry::message(input.clone()))
            .await;
        messages.push(input);

        let mut output = RunOutput::default();
        for step in 1..=MAX_STEPS {
            debug!(run_id = %record.run_id, step, messages = messages.len(), tools = tools.len(), "calling model");
            let reply = self
                .model
                .generate(ModelRequest {
                    model: agent.model.clone(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                })
                .await
                .map_err(|e| Error::llm_error(self.model.name(), e.to_string()))?;

            let assistant = reply.into_message().normalize_tool_calls();
            let calls: Vec<ToolCall> = assistant.tool_calls().to_vec();
            self.log(&record.run_id, key, SessionHistoryEntry::message(assistant.clone()))
                .await;
            self.log(
                &record.run_id,
                key,
                SessionHistoryEntry::now(SessionEvent::Llm {
                    run_id: record.run_id.clone(),
                    step,
                    model: agent.model.clone(),
                    text_chars: assistant.content.chars().count(),
                    tool_calls: calls.len(),
                }),
            )
            .await;
            if !assistant.content.is_empty() {
                output.text = assistant.content.clone();
            }
            messages.push(assistant);

            if calls.is_empty() {
                return Ok(output);
            }

            for call in &calls {
                let done = self.dispatch(call, &ctx, policy.as_ref()).await;
                if done.succeeded {
                    output.actions_taken.push(call.name.clone());
                }
                self.log(
                    &record.run_id,
                    key,
                    SessionHistoryEntry::now(SessionEvent::ToolCall {
                        run_id: record.run_id.clone(),
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        args: done.args,
                        error: done.error,
                    }),
                )
                .await;
                let result = Message::tool_result(call.id.clone(), done.content);
                self.log(&record.run_id, key, SessionHistoryEntry::message(result.clone()))
                    .await;
                messages.push(result);
            }
        }

        warn!(run_id = %record.run_id, steps = MAX_STEPS, "step limit reached, finishing run");
        Ok(output)
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext, policy: Option<&ToolPolicy>) -> Dispatched {
        let (args, mut marker) = match call.parse_arguments() {
            Ok(args) => (args, None),
            Err(e) => {
                warn!(run_id = %ctx.run_id, tool = %call.name, error = %e, "unparseable tool arguments, using {{}}");
                (json!({}), Some("invalid_arguments".to_string()))
            }
        };

        if !is_tool_allowed(policy, &call.name) {
            info!(
                target: AUDIT_TARGET,
                tool = %call.name,
                run_id = %ctx.run_id,
                session = %ctx.session_key,
                agent = %ctx.agent_id,
                outcome = "denied",
                "tool invoked"
            );
            let content = json!({ "error": format!("tool '{}' is not allowed by policy", call.name) });
            return Dispatched {
                args,
                content: content.to_string(),
                error: Some("denied".into()),
                succeeded: false,
            };
        }

        match self.tools.invoke(&call.name, ctx, args.clone()).await {
            Ok(value) => Dispatched {
                args,
                content: value.to_string(),
                error: marker,
                succeeded: true,
            },
            Err(e) => {
                debug!(run_id = %ctx.run_id, tool = %call.name, error = %e, "tool returned an error");
                let content = json!({ "error": e.to_string() }).to_string();
                marker.get_or_insert_with(|| e.to_string());
                Dispatched {
                    args,
                    content,
                    error: marker,
                    succeeded: false,
                }
            }
        }
    }
}
