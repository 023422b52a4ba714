use serde::{Deserialize, Serialize};

use super::{OptionId, QuestionId};

/// Per-question answer state held by the answer store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSlot {
    pub question_id: QuestionId,
    pub selected_option: Option<OptionId>,
    pub flagged: bool,
    pub time_spent_seconds: u32,
    /// Option the grading service has already acknowledged for this question.
    #[serde(default)]
    pub persisted_option: Option<OptionId>,
}

impl AnswerSlot {
    pub fn unanswered(question_id: impl Into<QuestionId>) -> Self {
        Self {
            question_id: question_id.into(),
            selected_option: None,
            flagged: false,
            time_spent_seconds: 0,
            persisted_option: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.selected_option.is_some()
    }

    /// Answered, and the current selection has not been acknowledged remotely yet.
    pub fn needs_persisting(&self) -> bool {
        self.selected_option.is_some() && self.selected_option != self.persisted_option
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: QuestionId,
    pub selected_option_id: OptionId,
    pub time_spent_seconds: u32,
    pub idempotency_key: String,
}

impl SubmitAnswerRequest {
    /// Builds the request for an answered slot; `None` when nothing is selected.
    pub fn from_slot(session_id: &str, slot: &AnswerSlot) -> Option<Self> {
        let option = slot.selected_option.as_ref()?;
        Some(Self {
            question_id: slot.question_id.clone(),
            selected_option_id: option.clone(),
            time_spent_seconds: slot.time_spent_seconds,
            idempotency_key: format!("{}:{}:{}", session_id, slot.question_id, option),
        })
    }
}

/// Outcome of one per-answer persistence attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub question_id: QuestionId,
    pub option_id: OptionId,
    pub persisted: bool,
}
