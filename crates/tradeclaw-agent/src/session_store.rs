//! Session store: one append-only JSON Lines log per session
//!
//! `<state_dir>/sessions/<key>.jsonl`. A session exists once something has
//! been appended to it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tradeclaw_core::{Message, Result, SessionHistoryEntry, SessionKey, SessionSummary};

pub struct SessionStore {
    dir: PathBuf,
    /// Serializes appends per session so lines never interleave.
    write_locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl SessionStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("sessions"),
            write_locks: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &SessionKey) -> Result<PathBuf> {
        key.validate()?;
        Ok(self.dir.join(format!("{}.jsonl", key)))
    }

    pub async fn append(&self, key: &SessionKey, entry: &SessionHistoryEntry) -> Result<()> {
        let path = self.path(key)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let lock = self.write_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.write_line(key, &path, &line).await
        };
        drop(lock);
        // Only the map holds it now, so no writer is waiting on this key.
        self.write_locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn write_line(&self, key: &SessionKey, path: &Path, line: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let is_new = !tokio::fs::try_exists(path).await.unwrap_or(false);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        if is_new {
            info!(session = %key, path = %path.display(), "session created");
        }
        Ok(())
    }

    /// Replay a session's log, oldest first. `limit` keeps only the newest N entries.
    pub async fn read(&self, key: &SessionKey, limit: Option<usize>) -> Result<Vec<SessionHistoryEntry>> {
        let path = self.path(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<SessionHistoryEntry> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(session = %key, line = n + 1, error = %e, "skipping malformed history line");
                    None
                }
            })
            .collect();

        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    /// The conversation carried by a session, with tool-call references
    /// normalized for replay to a model.
    pub async fn get_messages(&self, key: &SessionKey) -> Result<Vec<Message>> {
        Ok(self
            .read(key, None)
            .await?
            .into_iter()
            .filter_map(SessionHistoryEntry::into_message)
            .map(Message::normalize_tool_calls)
            .collect())
    }

    /// Known sessions, most recently written first.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let updated_at: DateTime<Utc> = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t.into(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat session log");
                    continue;
                }
            };
            sessions.push(SessionSummary {
                session_key: SessionKey::new(stem),
                updated_at,
            });
        }

        sessions.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_key.cmp(&b.session_key))
        });
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tradeclaw_core::{Error, Role, SessionEvent, ToolCall};

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn append_then_read_preserves_order() {
        let (_dir, store) = store();
        let key = SessionKey::new("main");
        for i in 0..5 {
            store
                .append(&key, &SessionHistoryEntry::message(Message::user(format!("m{i}"))))
                .await
                .unwrap();
        }

        let all = store.read(&key, None).await.unwrap();
        let texts: Vec<_> = all.iter().map(|e| e.as_message().unwrap().content.clone()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);

        let tail = store.read(&key, Some(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].as_message().unwrap().content, "m3");

        assert_eq!(store.read(&key, Some(50)).await.unwrap().len(), 5);
        assert!(store.read(&key, Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_locks_are_released_after_appends() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let key = SessionKey::new(format!("subagent:main:{}", i % 4));
                store
                    .append(&key, &SessionHistoryEntry::message(Message::user(format!("m{i}"))))
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert!(store.write_locks.is_empty());
        for i in 0..4 {
            let key = SessionKey::new(format!("subagent:main:{i}"));
            assert_eq!(store.read(&key, None).await.unwrap().len(), 5);
        }
    }

    #[tokio::test]
    async fn unknown_session_reads_empty() {
        let (_dir, store) = store();
        assert!(store.read(&SessionKey::new("nobody"), None).await.unwrap().is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = store();
        let entry = SessionHistoryEntry::message(Message::user("x"));
        for bad in ["", "../escape", "a\\b"] {
            let err = store.append(&SessionKey::new(bad), &entry).await.unwrap_err();
            assert!(matches!(err, Error::InvalidSessionKey { .. }));
            assert!(store.read(&SessionKey::new(bad), None).await.is_err());
        }
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (dir, store) = store();
        let key = SessionKey::new("main");
        store.append(&key, &SessionHistoryEntry::message(Message::user("ok"))).await.unwrap();

        let path = dir.path().join("sessions/main.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n\n");
        std::fs::write(&path, content).unwrap();
        store.append(&key, &SessionHistoryEntry::message(Message::user("after"))).await.unwrap();

        let entries = store.read(&key, None).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn get_messages_projects_and_normalizes() {
        let (dir, store) = store();
        let key = SessionKey::new("main");
        store.append(&key, &SessionHistoryEntry::message(Message::user("quote eth"))).await.unwrap();
        store
            .append(&key, &SessionHistoryEntry::audit("note", json!({"k": 1})))
            .await
            .unwrap();

        // An older writer stored arguments as an object and left an id blank.
        let legacy = r#"{"ts":"2026-01-05T10:00:00Z","type":"message","message":{"role":"assistant","content":"","tool_calls":[{"id":"","name":"market.quote","arguments":{"symbol":"ETH"}},{"id":"x","name":""}]}}"#;
        let path = dir.path().join("sessions/main.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(legacy);
        content.push('\n');
        std::fs::write(&path, content).unwrap();

        let messages = store.get_messages(&key).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        let calls = messages[1].tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].arguments, r#"{"symbol":"ETH"}"#);
        assert!(messages[1].is_well_formed());
    }

    #[tokio::test]
    async fn non_message_entries_round_trip() {
        let (_dir, store) = store();
        let key = SessionKey::new("main");
        let entry = SessionHistoryEntry::now(SessionEvent::ToolCall {
            run_id: "r1".into(),
            call_id: "call_0".into(),
            tool: "trade.swap".into(),
            args: json!({"amount": 1}),
            error: Some("denied".into()),
        });
        store.append(&key, &entry).await.unwrap();
        store
            .append(
                &key,
                &SessionHistoryEntry::message(Message::assistant_with_tools(
                    "",
                    vec![ToolCall::new("c", "market.quote", "{}")],
                )),
            )
            .await
            .unwrap();

        let back = store.read(&key, None).await.unwrap();
        assert_eq!(back[0], entry);
        assert_eq!(back[1].kind(), "message");
    }

    #[tokio::test]
    async fn list_orders_most_recent_first() {
        let (_dir, store) = store();
        store
            .append(&SessionKey::new("old"), &SessionHistoryEntry::message(Message::user("a")))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        store
            .append(&SessionKey::new("new"), &SessionHistoryEntry::message(Message::user("b")))
            .await
            .unwrap();

        let keys: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_key.to_string())
            .collect();
        assert_eq!(keys, vec!["new", "old"]);
    }
}
