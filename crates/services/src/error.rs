//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{QuestionError, QuestionId, SessionId, SessionStateError, SettingsError};
use storage::{SessionStoreError, StorageError};

/// Errors returned by a `QuestionRepository`. Callers may retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContentError {
    #[error("content repository unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    InvalidQuestion(#[from] QuestionError),
}

/// Errors emitted by the exam session service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no questions available for session")]
    Empty,
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("only {available} of {requested} questions available")]
    InsufficientQuestions { requested: u32, available: u32 },
    #[error("question {0} is not available from the content repository")]
    QuestionUnavailable(QuestionId),
    #[error("answer index {index} is out of range for {options} options")]
    InvalidAnswer { index: usize, options: usize },
    #[error("could not save progress: storage is full")]
    ProgressNotSaved { requested: u64, available: u64 },
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Store(SessionStoreError),
}

impl From<SessionStoreError> for SessionError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::QuotaExceeded {
                requested,
                available,
            } => SessionError::ProgressNotSaved {
                requested,
                available,
            },
            other => SessionError::Store(other),
        }
    }
}

/// Errors emitted by `ExamSettingsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsServiceError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("could not encode settings: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
