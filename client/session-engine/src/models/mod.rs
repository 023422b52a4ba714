use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod answer;
pub mod results;
pub mod timer;

pub type QuestionId = String;
pub type OptionId = String;

/// Session descriptor as returned by `GET /api/v1/sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionDescriptor {
    #[validate(length(min = 1))]
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub question_count: Option<u32>,
    #[validate(range(min = 1))]
    pub duration_minutes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionEnvelope {
    #[validate(nested)]
    pub session: SessionDescriptor,
    #[validate(nested)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Question {
    #[validate(length(min = 1))]
    pub id: QuestionId,
    pub body: String,
    #[validate(length(min = 2, max = 5), nested)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl Question {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct QuestionOption {
    #[validate(length(min = 1))]
    pub id: OptionId,
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Lifecycle phase of a session attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Active,
    Submitting,
    Completed,
    Abandoned,
    LoadFailed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Loading => "loading",
            SessionPhase::Active => "active",
            SessionPhase::Submitting => "submitting",
            SessionPhase::Completed => "completed",
            SessionPhase::Abandoned => "abandoned",
            SessionPhase::LoadFailed => "load_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Abandoned | SessionPhase::LoadFailed
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's in-memory view of one timed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub subject: Option<String>,
    pub question_count: usize,
    pub duration_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
}

impl Session {
    pub fn from_descriptor(descriptor: &SessionDescriptor, question_count: usize) -> Self {
        Self {
            id: descriptor.id.clone(),
            subject: descriptor.subject.clone(),
            question_count,
            duration_seconds: descriptor.duration_minutes.saturating_mul(60),
            created_at: descriptor.created_at,
            phase: SessionPhase::Active,
        }
    }
}

/// Recovery snapshot written to the local cache after a successful load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub questions: Vec<Question>,
    pub loaded_at: DateTime<Utc>,
}

/// Aggregates for a pre-submit review screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub total_questions: usize,
    pub answered: usize,
    pub flagged: usize,
    pub unanswered: usize,
    pub progress_percentage: f64,
    pub remaining_seconds: u32,
}
