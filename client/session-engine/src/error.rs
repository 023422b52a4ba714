use thiserror::Error;

use crate::models::SessionPhase;

/// Errors raised by the remote grading service client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("session {0} not found or expired")]
    NotFound(String),
    #[error("session {0} has no questions")]
    Empty(String),
    #[error("grading service returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid grading service url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Why a session could not be brought from LOADING to ACTIVE.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("session {0} not found or expired")]
    NotFound(String),
    #[error("session {0} has no questions")]
    Empty(String),
    #[error("session descriptor is invalid: {0}")]
    InvalidDescriptor(String),
    #[error("failed to fetch session: {0}")]
    Transport(#[source] ClientError),
}

impl From<ClientError> for LoadError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(id) => LoadError::NotFound(id),
            ClientError::Empty(id) => LoadError::Empty(id),
            other => LoadError::Transport(other),
        }
    }
}

/// Which finalization step failed. Per-answer persistence never shows up here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FinalizeError {
    #[error("failed to mark session complete: {0}")]
    Complete(#[source] ClientError),
    #[error("failed to fetch results: {0}")]
    Results(#[source] ClientError),
}

#[derive(Debug, Error)]
pub enum AnswerStoreError {
    #[error("no answer slot for question {0}")]
    UnknownQuestion(String),
    #[error("option {option_id} does not belong to question {question_id}")]
    UnknownOption {
        question_id: String,
        option_id: String,
    },
    #[error("answer to question {0} was already recorded and cannot be withdrawn")]
    AlreadyPersisted(String),
}

#[derive(Debug, Error)]
#[error("question index {index} out of bounds (0..{len})")]
pub struct NavigationError {
    pub index: usize,
    pub len: usize,
}

/// Errors surfaced by `SessionEngine` to the UI layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("operation not allowed while session is {0}")]
    NotActive(SessionPhase),
    #[error("a submission is already in progress")]
    AlreadySubmitting,
    #[error("automatic submission already ran for this session")]
    AutoSubmitSpent,
    #[error("session is already complete on the grading service; only results can be fetched")]
    AlreadyFinalized,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error(transparent)]
    Answer(#[from] AnswerStoreError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
}

impl SessionError {
    /// Whether the UI should offer a retry action for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Finalize(_))
    }
}
