#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use examprep_session::{
    config::Config,
    error::ClientError,
    models::{
        answer::SubmitAnswerRequest,
        results::{QuestionResult, Results},
        Difficulty, Question, QuestionOption, SessionDescriptor, SessionEnvelope,
    },
    services::{
        exam_client::ExamService,
        local_cache::{LocalCache, MemorySnapshotStore},
    },
    SessionEngine,
};

pub const CORRECT_OPTION: &str = "a";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn envelope(session_id: &str, duration_minutes: u32, question_count: usize) -> SessionEnvelope {
    let questions = (1..=question_count)
        .map(|n| Question {
            id: format!("q{}", n),
            body: format!("Question number {}", n),
            options: ["a", "b", "c", "d"]
                .iter()
                .map(|id| QuestionOption {
                    id: id.to_string(),
                    label: id.to_uppercase(),
                    text: format!("Option {}", id),
                })
                .collect(),
            difficulty: Difficulty::Medium,
        })
        .collect();

    SessionEnvelope {
        session: SessionDescriptor {
            id: session_id.to_string(),
            subject: Some("general".to_string()),
            question_count: Some(question_count as u32),
            duration_minutes,
            created_at: Utc::now(),
        },
        questions,
    }
}

pub fn test_config() -> Config {
    Config {
        tick_interval_ms: 1000,
        retry_max_attempts: 1,
        retry_base_backoff_ms: 0,
        retry_max_backoff_ms: 0,
        ..Config::default()
    }
}

#[derive(Debug, Clone)]
pub enum LoadScript {
    Ok(SessionEnvelope),
    NotFound,
    Unavailable,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub get_session: usize,
    pub submitted: Vec<SubmitAnswerRequest>,
    pub complete: usize,
    pub results: usize,
}

/// In-memory grading service with scriptable failures.
pub struct ScriptedExamService {
    load: LoadScript,
    failing_questions: HashSet<String>,
    complete_failures: AtomicUsize,
    results_failures: AtomicUsize,
    complete_delay: Option<Duration>,
    persisted: Mutex<HashMap<String, String>>,
    pub calls: Mutex<Calls>,
}

impl ScriptedExamService {
    pub fn new(load: LoadScript) -> Self {
        Self {
            load,
            failing_questions: HashSet::new(),
            complete_failures: AtomicUsize::new(0),
            results_failures: AtomicUsize::new(0),
            complete_delay: None,
            persisted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn serving(envelope: SessionEnvelope) -> Self {
        Self::new(LoadScript::Ok(envelope))
    }

    pub fn failing_question(mut self, question_id: &str) -> Self {
        self.failing_questions.insert(question_id.to_string());
        self
    }

    pub fn fail_complete(self, times: usize) -> Self {
        self.complete_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_results(self, times: usize) -> Self {
        self.results_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn complete_delay(mut self, delay: Duration) -> Self {
        self.complete_delay = Some(delay);
        self
    }

    pub fn submitted_question_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .calls
            .lock()
            .unwrap()
            .submitted
            .iter()
            .map(|r| r.question_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn complete_calls(&self) -> usize {
        self.calls.lock().unwrap().complete
    }

    pub fn results_calls(&self) -> usize {
        self.calls.lock().unwrap().results
    }

    pub fn get_session_calls(&self) -> usize {
        self.calls.lock().unwrap().get_session
    }

    fn unavailable() -> ClientError {
        ClientError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: "simulated outage".to_string(),
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExamService for ScriptedExamService {
    async fn get_session(&self, session_id: &str) -> Result<SessionEnvelope, ClientError> {
        self.calls.lock().unwrap().get_session += 1;
        match &self.load {
            LoadScript::Ok(envelope) => Ok(envelope.clone()),
            LoadScript::NotFound => Err(ClientError::NotFound(session_id.to_string())),
            LoadScript::Unavailable => Err(Self::unavailable()),
        }
    }

    async fn submit_answer(
        &self,
        _session_id: &str,
        req: &SubmitAnswerRequest,
    ) -> Result<(), ClientError> {
        self.calls.lock().unwrap().submitted.push(req.clone());
        if self.failing_questions.contains(&req.question_id) {
            return Err(Self::unavailable());
        }
        self.persisted
            .lock()
            .unwrap()
            .insert(req.question_id.clone(), req.selected_option_id.clone());
        Ok(())
    }

    async fn complete_session(&self, _session_id: &str) -> Result<(), ClientError> {
        self.calls.lock().unwrap().complete += 1;
        if let Some(delay) = self.complete_delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.complete_failures) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn get_results(&self, session_id: &str) -> Result<Results, ClientError> {
        self.calls.lock().unwrap().results += 1;
        if Self::take_failure(&self.results_failures) {
            return Err(Self::unavailable());
        }

        let total = match &self.load {
            LoadScript::Ok(envelope) => envelope.questions.len() as u32,
            _ => 0,
        };
        let persisted = self.persisted.lock().unwrap().clone();
        let breakdown: Vec<QuestionResult> = persisted
            .iter()
            .map(|(question_id, option)| QuestionResult {
                question_id: question_id.clone(),
                selected_option_id: Some(option.clone()),
                correct_option_id: CORRECT_OPTION.to_string(),
                correct: option == CORRECT_OPTION,
            })
            .collect();
        let correct = breakdown.iter().filter(|r| r.correct).count() as u32;

        Ok(Results {
            session_id: session_id.to_string(),
            total_questions: total,
            answered_questions: persisted.len() as u32,
            correct_answers: correct,
            score_percentage: if total == 0 {
                0.0
            } else {
                correct as f64 / total as f64 * 100.0
            },
            completed_at: Some(Utc::now()),
            breakdown,
        })
    }
}

pub fn memory_cache() -> (LocalCache, MemorySnapshotStore) {
    let store = MemorySnapshotStore::new();
    (LocalCache::new(Arc::new(store.clone())), store)
}

pub fn engine_for(service: Arc<ScriptedExamService>) -> (SessionEngine, MemorySnapshotStore) {
    let (cache, store) = memory_cache();
    (SessionEngine::new(service, cache, &test_config()), store)
}

// --- HTTP fake of the grading service ---

#[derive(Default)]
pub struct GraderState {
    pub sessions: HashMap<String, SessionEnvelope>,
    pub answers: Vec<SubmitAnswerRequest>,
    pub completed: HashSet<String>,
    pub authorization: Vec<String>,
    pub fail_answers_for: HashSet<String>,
}

pub type SharedGrader = Arc<Mutex<GraderState>>;

async fn grader_get_session(
    State(state): State<SharedGrader>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.authorization.push(auth.to_string());
    }
    match state.sessions.get(&id) {
        Some(envelope) => (StatusCode::OK, Json(serde_json::to_value(envelope).unwrap())),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Session not found"})),
        ),
    }
}

async fn grader_submit_answer(
    State(state): State<SharedGrader>,
    Path(id): Path<String>,
    Json(req): Json<SubmitAnswerRequest>,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    if !state.sessions.contains_key(&id) {
        return StatusCode::NOT_FOUND;
    }
    if state.fail_answers_for.contains(&req.question_id) {
        return StatusCode::BAD_REQUEST;
    }
    state.answers.push(req);
    StatusCode::OK
}

async fn grader_complete(State(state): State<SharedGrader>, Path(id): Path<String>) -> StatusCode {
    let mut state = state.lock().unwrap();
    if !state.sessions.contains_key(&id) {
        return StatusCode::NOT_FOUND;
    }
    state.completed.insert(id);
    StatusCode::NO_CONTENT
}

async fn grader_results(
    State(state): State<SharedGrader>,
    Path(id): Path<String>,
) -> Result<Json<Results>, StatusCode> {
    let state = state.lock().unwrap();
    let envelope = state.sessions.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    if !state.completed.contains(&id) {
        return Err(StatusCode::CONFLICT);
    }

    let answers: Vec<&SubmitAnswerRequest> = state.answers.iter().collect();
    let correct = answers
        .iter()
        .filter(|a| a.selected_option_id == CORRECT_OPTION)
        .count() as u32;
    let total = envelope.questions.len() as u32;

    Ok(Json(Results {
        session_id: id,
        total_questions: total,
        answered_questions: answers.len() as u32,
        correct_answers: correct,
        score_percentage: correct as f64 / total as f64 * 100.0,
        completed_at: Some(Utc::now()),
        breakdown: Vec::new(),
    }))
}

/// Serves a fake grading service on an ephemeral port; returns its base URL.
pub async fn spawn_fake_grader(state: SharedGrader) -> String {
    let app = Router::new()
        .route("/api/v1/sessions/{id}", get(grader_get_session))
        .route("/api/v1/sessions/{id}/answers", post(grader_submit_answer))
        .route("/api/v1/sessions/{id}/complete", post(grader_complete))
        .route("/api/v1/sessions/{id}/results", get(grader_results))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}
