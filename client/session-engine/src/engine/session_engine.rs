use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use validator::Validate;

use crate::config::Config;
use crate::engine::answer_store::AnswerStore;
use crate::engine::navigator::Navigator;
use crate::engine::submission::{
    FinalizeFailure, FinalizeReport, SubmissionCoordinator, SubmitTrigger,
};
use crate::engine::timer::{Timer, TimerSignal};
use crate::error::{LoadError, SessionError};
use crate::metrics::{FINALIZE_ATTEMPTS_TOTAL, SESSIONS_ACTIVE, SESSION_TRANSITIONS_TOTAL};
use crate::models::answer::{AnswerSlot, PersistOutcome};
use crate::models::results::Results;
use crate::models::timer::{TimeExpired, TimerEvent, TimerTick};
use crate::models::{OptionId, Question, Session, SessionPhase, SessionSummary};
use crate::services::exam_client::ExamService;
use crate::services::local_cache::LocalCache;

type FinalizeFuture =
    Pin<Box<dyn Future<Output = Result<FinalizeReport, FinalizeFailure>> + Send + 'static>>;

/// Entry guard for the SUBMITTING phase.
///
/// `in_progress` admits one submission at a time. `auto_submitted` is the
/// one-shot latch that keeps a late expiry from starting a second submission;
/// it is released again only when a manual submission rolls back.
#[derive(Debug, Default)]
struct SubmissionGuard {
    in_progress: Option<SubmitTrigger>,
    auto_submitted: bool,
}

impl SubmissionGuard {
    fn try_acquire(&mut self, trigger: SubmitTrigger) -> Result<(), SessionError> {
        if self.in_progress.is_some() {
            return Err(SessionError::AlreadySubmitting);
        }
        if trigger == SubmitTrigger::Expiry && self.auto_submitted {
            return Err(SessionError::AutoSubmitSpent);
        }
        self.in_progress = Some(trigger);
        self.auto_submitted = true;
        Ok(())
    }

    fn release_after_failure(&mut self) -> Option<SubmitTrigger> {
        let trigger = self.in_progress.take();
        if trigger == Some(SubmitTrigger::Manual) {
            self.auto_submitted = false;
        }
        trigger
    }
}

/// Commands the UI layer sends to a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Next,
    Previous,
    JumpTo(usize),
    Select(OptionId),
    ClearSelection,
    ToggleFlag,
    Refresh,
    Submit,
    Abandon,
}

/// Notifications from a running engine to the UI layer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Timer(TimerEvent),
    Updated {
        current_index: usize,
        answer: Option<AnswerSlot>,
        summary: SessionSummary,
    },
    CommandRejected {
        command: EngineCommand,
        reason: String,
    },
    SubmissionStarted(SubmitTrigger),
    SubmissionFailed {
        trigger: SubmitTrigger,
        message: String,
        retryable: bool,
    },
    Completed(Results),
    Abandoned,
}

/// Runs one timed attempt from load to a terminal phase.
pub struct SessionEngine {
    service: Arc<dyn ExamService>,
    cache: LocalCache,
    coordinator: SubmissionCoordinator,
    timer: Timer,
    phase: SessionPhase,
    session: Option<Session>,
    questions: Vec<Question>,
    answers: AnswerStore,
    navigator: Navigator,
    guard: SubmissionGuard,
    completed_remotely: bool,
    finalize_calls: u32,
    results: Option<Results>,
}

impl SessionEngine {
    pub fn new(service: Arc<dyn ExamService>, cache: LocalCache, config: &Config) -> Self {
        let coordinator = SubmissionCoordinator::new(service.clone(), config.retry());
        Self {
            service,
            cache,
            coordinator,
            timer: Timer::new(config.tick_interval()),
            phase: SessionPhase::Loading,
            session: None,
            questions: Vec::new(),
            answers: AnswerStore::new(&[]),
            navigator: Navigator::new(0),
            guard: SubmissionGuard::default(),
            completed_remotely: false,
            finalize_calls: 0,
            results: None,
        }
    }

    fn transition(&mut self, to: SessionPhase) {
        let from = self.phase;
        if from == to {
            return;
        }

        let was_live = matches!(from, SessionPhase::Active | SessionPhase::Submitting);
        let is_live = matches!(to, SessionPhase::Active | SessionPhase::Submitting);
        if !was_live && is_live {
            SESSIONS_ACTIVE.inc();
        } else if was_live && !is_live {
            SESSIONS_ACTIVE.dec();
        }

        self.phase = to;
        if let Some(session) = self.session.as_mut() {
            session.phase = to;
        }
        SESSION_TRANSITIONS_TOTAL
            .with_label_values(&[to.as_str()])
            .inc();
        tracing::info!(
            session_id = %self.session_id(),
            "Session phase {} -> {}",
            from,
            to
        );
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Active => Ok(()),
            other => Err(SessionError::NotActive(other)),
        }
    }

    /// ACTIVE, and the grading service has not already closed the session.
    fn ensure_answerable(&self) -> Result<(), SessionError> {
        self.ensure_active()?;
        if self.completed_remotely {
            return Err(SessionError::AlreadyFinalized);
        }
        Ok(())
    }

    /// LOADING -> ACTIVE, or LOADING -> LOAD_FAILED.
    pub async fn load(&mut self, session_id: &str) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Loading {
            return Err(SessionError::NotActive(self.phase));
        }

        match self.fetch_and_validate(session_id).await {
            Ok((session, questions)) => {
                self.answers = AnswerStore::new(&questions);
                self.navigator = Navigator::new(questions.len());
                self.cache.put(&session, &questions).await;

                let allotted = session.duration_seconds;
                self.session = Some(session);
                self.questions = questions;
                self.transition(SessionPhase::Active);
                self.timer.start(allotted);

                tracing::info!(
                    session_id = %session_id,
                    questions = self.questions.len(),
                    duration_seconds = allotted,
                    "Session loaded"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to load session");
                self.transition(SessionPhase::LoadFailed);
                Err(e.into())
            }
        }
    }

    async fn fetch_and_validate(
        &self,
        session_id: &str,
    ) -> Result<(Session, Vec<Question>), LoadError> {
        let envelope = self.service.get_session(session_id).await?;

        if envelope.questions.is_empty() {
            return Err(LoadError::Empty(session_id.to_string()));
        }
        envelope
            .validate()
            .map_err(|e| LoadError::InvalidDescriptor(e.to_string()))?;
        if envelope.session.id != session_id {
            return Err(LoadError::InvalidDescriptor(format!(
                "requested session {} but received {}",
                session_id, envelope.session.id
            )));
        }

        {
            let mut seen = HashSet::new();
            if let Some(dup) = envelope
                .questions
                .iter()
                .find(|q| !seen.insert(q.id.as_str()))
            {
                return Err(LoadError::InvalidDescriptor(format!(
                    "duplicate question id {}",
                    dup.id
                )));
            }
        }

        let session = Session::from_descriptor(&envelope.session, envelope.questions.len());
        Ok((session, envelope.questions))
    }

    // --- read-only views ---

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn session_id(&self) -> &str {
        self.session.as_ref().map(|s| s.id.as_str()).unwrap_or("-")
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    pub fn current_index(&self) -> usize {
        self.navigator.current()
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.navigator.current())
    }

    pub fn current_answer(&self) -> Option<&AnswerSlot> {
        self.answers.slot_at(self.navigator.current())
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.timer.remaining_seconds()
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn results(&self) -> Option<&Results> {
        self.results.as_ref()
    }

    /// Number of finalize pipelines started so far.
    pub fn finalize_calls(&self) -> u32 {
        self.finalize_calls
    }

    pub fn flagged_indices(&self) -> Vec<usize> {
        self.answers.flagged_indices()
    }

    pub fn summary(&self) -> SessionSummary {
        let total = self.answers.len();
        let answered = self.answers.answered_count();
        SessionSummary {
            total_questions: total,
            answered,
            flagged: self.answers.flagged_count(),
            unanswered: total - answered,
            progress_percentage: self.answers.progress_percentage(),
            remaining_seconds: self.timer.remaining_seconds(),
        }
    }

    // --- navigation and answering (ACTIVE only) ---

    pub fn next(&mut self) -> Result<bool, SessionError> {
        self.ensure_active()?;
        Ok(self.navigator.next())
    }

    pub fn previous(&mut self) -> Result<bool, SessionError> {
        self.ensure_active()?;
        Ok(self.navigator.previous())
    }

    pub fn jump_to(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.navigator.jump_to(index)?;
        Ok(())
    }

    fn current_question_id(&self) -> Option<String> {
        self.current_question().map(|q| q.id.clone())
    }

    /// Selects an option for the current question.
    pub fn select_option(&mut self, option_id: &str) -> Result<(), SessionError> {
        self.ensure_answerable()?;
        if let Some(question_id) = self.current_question_id() {
            self.answers.set(&question_id, Some(option_id.to_string()))?;
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), SessionError> {
        self.ensure_answerable()?;
        if let Some(question_id) = self.current_question_id() {
            self.answers.set(&question_id, None)?;
        }
        Ok(())
    }

    /// Toggles the flag on the current question and returns its new value.
    pub fn toggle_flag(&mut self) -> Result<bool, SessionError> {
        self.ensure_answerable()?;
        match self.current_question_id() {
            Some(question_id) => Ok(self.answers.toggle_flag(&question_id)?),
            None => Ok(false),
        }
    }

    // --- timer ---

    /// Waits for the next countdown tick and applies it. Pends while the timer is idle.
    pub async fn tick(&mut self) -> TimerEvent {
        let signal = self.timer.tick().await;
        self.apply_timer_signal(signal)
    }

    fn apply_timer_signal(&mut self, signal: TimerSignal) -> TimerEvent {
        if let Some(question_id) = self.current_question_id() {
            // Slot exists for every loaded question
            let _ = self.answers.add_time(&question_id, 1);
        }

        let session_id = self.session_id().to_string();
        match signal {
            TimerSignal::Tick { remaining_seconds } => {
                tracing::debug!(session_id = %session_id, remaining_seconds, "Timer tick");
                TimerEvent::TimerTick(TimerTick {
                    session_id,
                    remaining_seconds,
                    elapsed_seconds: self.timer.elapsed_seconds(),
                    total_seconds: self.timer.total_seconds(),
                    urgency: self.timer.urgency(),
                    timestamp: Utc::now(),
                })
            }
            TimerSignal::Expired => {
                tracing::info!(session_id = %session_id, "Time expired");
                TimerEvent::TimeExpired(TimeExpired {
                    session_id,
                    timestamp: Utc::now(),
                    message: "Time limit exceeded".to_string(),
                })
            }
        }
    }

    // --- submission ---

    /// ACTIVE -> SUBMITTING. Returns the detached finalize pipeline on success.
    ///
    /// This is the single check-and-set point: a second caller, whichever
    /// trigger it carries, is turned away while a submission is running.
    fn begin_submission(&mut self, trigger: SubmitTrigger) -> Result<FinalizeFuture, SessionError> {
        self.ensure_active()?;
        if let Err(e) = self.guard.try_acquire(trigger) {
            tracing::debug!(
                session_id = %self.session_id(),
                trigger = trigger.as_str(),
                "Submission request ignored by guard"
            );
            return Err(e);
        }

        self.timer.stop();
        self.transition(SessionPhase::Submitting);
        self.finalize_calls += 1;
        tracing::info!(
            session_id = %self.session_id(),
            trigger = trigger.as_str(),
            answered = self.answers.answered_count(),
            "Submission started"
        );

        let coordinator = self.coordinator.clone();
        let session_id = self.session_id().to_string();
        let answers = self.answers.slots().to_vec();
        let already_completed = self.completed_remotely;

        Ok(Box::pin(async move {
            coordinator
                .finalize(&session_id, &answers, already_completed)
                .await
        }))
    }

    fn record_persisted(&mut self, outcomes: &[PersistOutcome]) {
        for outcome in outcomes.iter().filter(|o| o.persisted) {
            let _ = self
                .answers
                .mark_persisted(&outcome.question_id, &outcome.option_id);
        }
    }

    /// SUBMITTING -> COMPLETED, or the rollback to ACTIVE.
    async fn finish_submission(
        &mut self,
        outcome: Result<FinalizeReport, FinalizeFailure>,
    ) -> Result<Results, SessionError> {
        match outcome {
            Ok(report) => {
                let trigger = self.guard.in_progress.take().unwrap_or(SubmitTrigger::Manual);
                self.record_persisted(&report.outcomes);
                FINALIZE_ATTEMPTS_TOTAL
                    .with_label_values(&[trigger.as_str(), "success"])
                    .inc();

                self.timer.stop();
                self.transition(SessionPhase::Completed);
                self.cache.clear().await;

                tracing::info!(
                    session_id = %self.session_id(),
                    persisted = report.persisted_count(),
                    score = report.results.score_percentage,
                    "Session completed"
                );
                self.results = Some(report.results.clone());
                Ok(report.results)
            }
            Err(failure) => {
                self.record_persisted(&failure.outcomes);
                self.completed_remotely |= failure.completed_remotely;
                let trigger = self
                    .guard
                    .release_after_failure()
                    .unwrap_or(SubmitTrigger::Manual);
                FINALIZE_ATTEMPTS_TOTAL
                    .with_label_values(&[trigger.as_str(), "failure"])
                    .inc();

                self.transition(SessionPhase::Active);
                // Once completed remotely the attempt is closed; only the results fetch remains
                if !self.completed_remotely {
                    self.timer.resume();
                }

                tracing::error!(
                    session_id = %self.session_id(),
                    trigger = trigger.as_str(),
                    error = %failure.error,
                    "Finalization failed; session rolled back"
                );
                Err(failure.error.into())
            }
        }
    }

    /// Manual submit. Waits for the whole finalize pipeline.
    pub async fn submit(&mut self) -> Result<Results, SessionError> {
        let pipeline = self.begin_submission(SubmitTrigger::Manual)?;
        let outcome = pipeline.await;
        self.finish_submission(outcome).await
    }

    /// Auto-submit after expiry. Turned away once an expiry submission has run.
    pub async fn auto_submit(&mut self) -> Result<Results, SessionError> {
        let pipeline = self.begin_submission(SubmitTrigger::Expiry)?;
        let outcome = pipeline.await;
        self.finish_submission(outcome).await
    }

    /// ACTIVE -> ABANDONED. No remote calls are made. Refused once the
    /// grading service has completed the session.
    pub async fn abandon(&mut self) -> Result<(), SessionError> {
        self.ensure_answerable()?;
        self.timer.stop();
        self.transition(SessionPhase::Abandoned);
        self.cache.clear().await;
        Ok(())
    }

    // --- event loop ---

    /// Drives the engine from UI commands and the countdown until a terminal
    /// phase is reached or the UI goes away.
    ///
    /// Finalization runs alongside command handling, so commands that arrive
    /// mid-submission are rejected rather than queued.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> SessionPhase {
        let mut pending: Option<(SubmitTrigger, FinalizeFuture)> = None;
        let mut ui_open = true;

        while !self.phase.is_terminal() {
            if !ui_open && pending.is_none() {
                // UI torn down: release the timer, keep the snapshot for recovery
                self.timer.stop();
                break;
            }

            tokio::select! {
                event = self.tick() => {
                    let expired = matches!(event, TimerEvent::TimeExpired(_));
                    let _ = events.send(EngineEvent::Timer(event));
                    if expired {
                        match self.begin_submission(SubmitTrigger::Expiry) {
                            Ok(pipeline) => {
                                let trigger = SubmitTrigger::Expiry;
                                let _ = events.send(EngineEvent::SubmissionStarted(trigger));
                                pending = Some((trigger, pipeline));
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Expiry did not start a submission");
                            }
                        }
                    }
                }
                outcome = wait_pipeline(&mut pending) => {
                    let trigger = pending.take().map(|(t, _)| t).unwrap_or(SubmitTrigger::Manual);
                    match self.finish_submission(outcome).await {
                        Ok(results) => {
                            let _ = events.send(EngineEvent::Completed(results));
                        }
                        Err(e) => {
                            let _ = events.send(EngineEvent::SubmissionFailed {
                                trigger,
                                retryable: e.is_retryable(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                command = commands.recv(), if ui_open => {
                    match command {
                        Some(command) => self.handle_command(command, &events, &mut pending).await,
                        None => ui_open = false,
                    }
                }
            }
        }

        self.phase
    }

    async fn handle_command(
        &mut self,
        command: EngineCommand,
        events: &mpsc::UnboundedSender<EngineEvent>,
        pending: &mut Option<(SubmitTrigger, FinalizeFuture)>,
    ) {
        let result = match &command {
            EngineCommand::Next => self.next().map(|_| ()),
            EngineCommand::Previous => self.previous().map(|_| ()),
            EngineCommand::JumpTo(index) => self.jump_to(*index),
            EngineCommand::Select(option_id) => self.select_option(option_id),
            EngineCommand::ClearSelection => self.clear_selection(),
            EngineCommand::ToggleFlag => self.toggle_flag().map(|_| ()),
            EngineCommand::Refresh => self.ensure_active(),
            EngineCommand::Submit => match self.begin_submission(SubmitTrigger::Manual) {
                Ok(pipeline) => {
                    *pending = Some((SubmitTrigger::Manual, pipeline));
                    let _ = events.send(EngineEvent::SubmissionStarted(SubmitTrigger::Manual));
                    return;
                }
                Err(e) => Err(e),
            },
            EngineCommand::Abandon => match self.abandon().await {
                Ok(()) => {
                    let _ = events.send(EngineEvent::Abandoned);
                    return;
                }
                Err(e) => Err(e),
            },
        };

        let event = match result {
            Ok(()) => EngineEvent::Updated {
                current_index: self.current_index(),
                answer: self.current_answer().cloned(),
                summary: self.summary(),
            },
            Err(e) => EngineEvent::CommandRejected {
                command,
                reason: e.to_string(),
            },
        };
        let _ = events.send(event);
    }
}

async fn wait_pipeline(
    pending: &mut Option<(SubmitTrigger, FinalizeFuture)>,
) -> Result<FinalizeReport, FinalizeFailure> {
    match pending {
        Some((_, pipeline)) => pipeline.await,
        None => std::future::pending().await,
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.timer.stop();
        if matches!(self.phase, SessionPhase::Active | SessionPhase::Submitting) {
            SESSIONS_ACTIVE.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_admits_one_submission_at_a_time() {
        let mut guard = SubmissionGuard::default();
        assert!(guard.try_acquire(SubmitTrigger::Manual).is_ok());
        assert!(matches!(
            guard.try_acquire(SubmitTrigger::Expiry),
            Err(SessionError::AlreadySubmitting)
        ));
        assert!(matches!(
            guard.try_acquire(SubmitTrigger::Manual),
            Err(SessionError::AlreadySubmitting)
        ));
    }

    #[test]
    fn manual_rollback_rearms_auto_submit() {
        let mut guard = SubmissionGuard::default();
        assert!(guard.try_acquire(SubmitTrigger::Manual).is_ok());
        assert_eq!(guard.release_after_failure(), Some(SubmitTrigger::Manual));
        assert!(guard.try_acquire(SubmitTrigger::Expiry).is_ok());
    }

    #[test]
    fn expiry_rollback_keeps_auto_submit_latched() {
        let mut guard = SubmissionGuard::default();
        assert!(guard.try_acquire(SubmitTrigger::Expiry).is_ok());
        assert_eq!(guard.release_after_failure(), Some(SubmitTrigger::Expiry));
        assert!(matches!(
            guard.try_acquire(SubmitTrigger::Expiry),
            Err(SessionError::AutoSubmitSpent)
        ));
        // The user can still retry by hand
        assert!(guard.try_acquire(SubmitTrigger::Manual).is_ok());
    }
}
