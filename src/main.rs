//! Tradeclaw operator CLI: inspect sessions, runs, and configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tradeclaw_agent::{OrchestratorConfig, RunStore, SessionStore};
use tradeclaw_core::{Role, SessionEvent, SessionHistoryEntry, SessionKey};

/// Tool results longer than this are cut when printing history.
const MAX_RESULT_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "tradeclaw", version, about = "Tradeclaw run orchestration: inspect durable state")]
struct Cli {
    /// Config file (default: ~/.tradeclaw/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions, most recently written first
    Sessions,
    /// Print a session's history
    History {
        /// Session key
        key: String,
        /// Only the newest N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print a run record as JSON
    Run {
        /// Run id
        run_id: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tradeclaw=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = OrchestratorConfig::load_or_default(cli.config.as_deref()).context("loading config")?;
    tracing::debug!(state_dir = %config.state_dir.display(), "using state directory");

    match cli.command {
        Commands::Sessions => {
            let sessions = SessionStore::new(&config.state_dir).list().await?;
            if sessions.is_empty() {
                eprintln!("No sessions under {}", config.sessions_dir().display());
            }
            for s in sessions {
                println!("{}  {}", s.updated_at.format("%Y-%m-%d %H:%M:%S"), s.session_key);
            }
        }
        Commands::History { key, limit } => {
            let key = SessionKey::parse(key)?;
            let entries = SessionStore::new(&config.state_dir).read(&key, limit).await?;
            print!("{}", render_history(&entries));
        }
        Commands::Run { run_id } => {
            let record = RunStore::new(&config.state_dir)
                .get(&run_id)
                .await?
                .with_context(|| format!("run not found: {}", run_id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn render_history(entries: &[SessionHistoryEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("[{}] {}\n", entry.ts.format("%H:%M:%S"), describe(entry)));
    }
    out
}

fn describe(entry: &SessionHistoryEntry) -> String {
    match &entry.event {
        SessionEvent::Message { message } => {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut line = format!("{}: {}", role, truncate(&message.content, MAX_RESULT_CHARS));
            for call in message.tool_calls() {
                line.push_str(&format!("\n    -> {}({}) [{}]", call.name, call.arguments, call.id));
            }
            line
        }
        SessionEvent::ToolCall {
            tool, call_id, error, ..
        } => match error {
            Some(e) => format!("tool_call {} [{}] error: {}", tool, call_id, e),
            None => format!("tool_call {} [{}]", tool, call_id),
        },
        SessionEvent::Llm {
            run_id,
            step,
            tool_calls,
            ..
        } => format!("llm run={} step={} tool_calls={}", run_id, step, tool_calls),
        SessionEvent::SubagentAnnounce(a) => format!(
            "subagent {} {} ({}){}",
            a.label.as_deref().unwrap_or(&a.agent_id),
            a.status,
            a.child_run_id,
            a.error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default()
        ),
        SessionEvent::Audit { event, data } => format!("audit {} {}", event, data),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}... ({} chars)", cut, text.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tradeclaw_core::{Message, RunStatus, SubagentAnnounce, ToolCall};

    #[test]
    fn renders_each_entry_kind() {
        let entries = vec![
            SessionHistoryEntry::message(Message::user("rebalance")),
            SessionHistoryEntry::message(Message::assistant_with_tools(
                "",
                vec![ToolCall::new("call_0", "market.quote", r#"{"symbol":"ETH"}"#)],
            )),
            SessionHistoryEntry::now(SessionEvent::ToolCall {
                run_id: "r1".into(),
                call_id: "call_0".into(),
                tool: "market.quote".into(),
                args: json!({}),
                error: Some("denied".into()),
            }),
            SessionHistoryEntry::now(SessionEvent::SubagentAnnounce(SubagentAnnounce {
                child_run_id: "r2".into(),
                child_session_key: SessionKey::new("subagent:main:x"),
                agent_id: "main".into(),
                status: RunStatus::Failed,
                parent_run_id: Some("r1".into()),
                label: Some("scout".into()),
                text: None,
                error: Some("rate limited".into()),
            })),
        ];

        let text = render_history(&entries);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("user: rebalance"));
        assert!(lines[2].contains(r#"-> market.quote({"symbol":"ETH"}) [call_0]"#));
        assert!(lines[3].ends_with("tool_call market.quote [call_0] error: denied"));
        assert!(lines[4].ends_with("subagent scout failed (r2): rate limited"));
    }

    #[test]
    fn long_content_is_truncated() {
        let long = "x".repeat(MAX_RESULT_CHARS + 50);
        let out = truncate(&long, MAX_RESULT_CHARS);
        assert!(out.ends_with(&format!("... ({} chars)", MAX_RESULT_CHARS + 50)));
        assert_eq!(truncate("short", MAX_RESULT_CHARS), "short");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tradeclaw", "--config", "/tmp/c.toml", "history", "main", "-l", "5"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::History { ref key, limit: Some(5) } if key == "main"));
    }

    #[test]
    fn config_file_selects_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, format!("state_dir = {:?}\n", dir.path().join("state"))).unwrap();

        let config = OrchestratorConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.sessions_dir(), dir.path().join("state/sessions"));
    }
}
