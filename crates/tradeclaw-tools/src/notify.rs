//! Operator notifications. Delivery is best-effort everywhere.

use serde::Serialize;
use tradeclaw_core::SessionKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
}

impl Notice {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            body: body.into(),
            run_id: None,
            session_key: None,
        }
    }

    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            ..Self::info(title, body)
        }
    }

    pub fn for_run(mut self, run_id: impl Into<String>, session_key: SessionKey) -> Self {
        self.run_id = Some(run_id.into());
        self.session_key = Some(session_key);
        self
    }
}

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, notice: &Notice) -> Result<(), String>;
}

/// Writes notices to the log. Used when nothing else is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn emit(&self, notice: &Notice) -> Result<(), String> {
        match notice.level {
            NoticeLevel::Info => tracing::info!(title = %notice.title, run_id = ?notice.run_id, "{}", notice.body),
            NoticeLevel::Warning => tracing::warn!(title = %notice.title, run_id = ?notice.run_id, "{}", notice.body),
        }
        Ok(())
    }
}

/// Deliver `notice`, swallowing sink failures.
pub async fn emit(sink: &dyn NotificationSink, notice: Notice) {
    if let Err(e) = sink.emit(&notice).await {
        tracing::debug!(title = %notice.title, error = %e, "notification dropped");
    }
}
