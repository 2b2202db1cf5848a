//! Error types for Tradeclaw

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid session key {key:?}: {reason}")]
    InvalidSessionKey { key: String, reason: &'static str },

    #[error("invalid run id {id:?}: {reason}")]
    InvalidRunId { id: String, reason: &'static str },

    #[error("invalid tool policy pattern {pattern:?}: {reason}")]
    InvalidPolicy { pattern: String, reason: &'static str },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("llm error: {provider} - {message}")]
    Llm { provider: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn llm_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error was raised while validating a request, before any run existed.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSessionKey { .. } | Self::InvalidRunId { .. } | Self::InvalidPolicy { .. }
        )
    }
}
