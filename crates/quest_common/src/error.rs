//! Error types for the progression engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuestError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active session. Log in first.")]
    NoActiveSession,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuestError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        QuestError::NotFound(format!("{} {}", what, id))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        QuestError::Validation(message.into())
    }

    pub fn code(&self) -> i32 {
        match self {
            QuestError::NotFound(_) => 2,
            QuestError::NoActiveSession => 3,
            QuestError::Validation(_) => 4,
            QuestError::QuotaExceeded(_) => 5,
            QuestError::Persistence(_) => 6,
            QuestError::Config(_) => 7,
            QuestError::Io(_) => 8,
        }
    }
}

impl From<rusqlite::Error> for QuestError {
    fn from(err: rusqlite::Error) -> Self {
        QuestError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for QuestError {
    fn from(err: serde_json::Error) -> Self {
        QuestError::Persistence(format!("payload encoding: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, QuestError>;
