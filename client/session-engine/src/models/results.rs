use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OptionId, QuestionId};

/// Authoritative score breakdown from `GET /api/v1/sessions/{id}/results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub session_id: String,
    pub total_questions: u32,
    pub answered_questions: u32,
    pub correct_answers: u32,
    pub score_percentage: f64,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub breakdown: Vec<QuestionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: QuestionId,
    pub selected_option_id: Option<OptionId>,
    pub correct_option_id: OptionId,
    pub correct: bool,
}
