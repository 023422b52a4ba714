use std::sync::Arc;

use futures::future::join_all;

use crate::error::{ClientError, FinalizeError};
use crate::metrics::ANSWERS_PERSISTED_TOTAL;
use crate::models::answer::{AnswerSlot, PersistOutcome, SubmitAnswerRequest};
use crate::models::results::Results;
use crate::services::exam_client::ExamService;
use crate::utils::retry::{retry_async_if, RetryConfig};

/// What started a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Manual,
    Expiry,
}

impl SubmitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitTrigger::Manual => "manual",
            SubmitTrigger::Expiry => "expiry",
        }
    }
}

#[derive(Debug)]
pub struct FinalizeReport {
    pub results: Results,
    pub outcomes: Vec<PersistOutcome>,
}

impl FinalizeReport {
    pub fn persisted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.persisted).count()
    }
}

/// A failed finalize still reports what it managed to do, so a retry can skip it.
#[derive(Debug)]
pub struct FinalizeFailure {
    pub error: FinalizeError,
    pub outcomes: Vec<PersistOutcome>,
    pub completed_remotely: bool,
}

/// Persists answers, marks the session complete and fetches results.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    service: Arc<dyn ExamService>,
    retry: RetryConfig,
}

impl SubmissionCoordinator {
    pub fn new(service: Arc<dyn ExamService>, retry: RetryConfig) -> Self {
        Self { service, retry }
    }

    /// Runs the finalize pipeline.
    ///
    /// Only slots whose current selection has not been acknowledged yet are
    /// sent. Per-answer failures are logged and never fail the call; only the
    /// completion and results steps can. When `already_completed` is set the
    /// session is closed remotely, so nothing is sent and only the results are
    /// fetched.
    pub async fn finalize(
        &self,
        session_id: &str,
        answers: &[AnswerSlot],
        already_completed: bool,
    ) -> Result<FinalizeReport, FinalizeFailure> {
        if already_completed {
            tracing::info!(
                session_id = %session_id,
                "Session already complete; fetching results only"
            );
            return self.fetch_results(session_id, Vec::new()).await;
        }

        let (to_send, skipped): (Vec<&AnswerSlot>, Vec<&AnswerSlot>) =
            answers.iter().partition(|slot| slot.needs_persisting());

        tracing::info!(
            session_id = %session_id,
            sending = to_send.len(),
            skipped = skipped.len(),
            "Finalizing session"
        );

        let outcomes = join_all(
            to_send
                .into_iter()
                .filter_map(|slot| SubmitAnswerRequest::from_slot(session_id, slot))
                .map(|req| self.persist_answer(session_id, req)),
        )
        .await;

        let failed = outcomes.iter().filter(|o| !o.persisted).count();
        if failed > 0 {
            tracing::warn!(
                session_id = %session_id,
                failed,
                total = outcomes.len(),
                "Some answers were not persisted; continuing with completion"
            );
        }

        if let Err(e) = self.service.complete_session(session_id).await {
            return Err(FinalizeFailure {
                error: FinalizeError::Complete(e),
                outcomes,
                completed_remotely: false,
            });
        }
        tracing::info!(session_id = %session_id, "Session marked complete");

        self.fetch_results(session_id, outcomes).await
    }

    async fn fetch_results(
        &self,
        session_id: &str,
        outcomes: Vec<PersistOutcome>,
    ) -> Result<FinalizeReport, FinalizeFailure> {
        let results = retry_async_if(self.retry.clone(), ClientError::is_transient, || {
            self.service.get_results(session_id)
        })
        .await;

        match results {
            Ok(results) => Ok(FinalizeReport { results, outcomes }),
            Err(e) => Err(FinalizeFailure {
                error: FinalizeError::Results(e),
                outcomes,
                completed_remotely: true,
            }),
        }
    }

    async fn persist_answer(&self, session_id: &str, req: SubmitAnswerRequest) -> PersistOutcome {
        let result = retry_async_if(self.retry.clone(), ClientError::is_transient, || {
            self.service.submit_answer(session_id, &req)
        })
        .await;

        let persisted = match result {
            Ok(()) => {
                ANSWERS_PERSISTED_TOTAL.with_label_values(&["success"]).inc();
                true
            }
            Err(e) => {
                ANSWERS_PERSISTED_TOTAL.with_label_values(&["failure"]).inc();
                tracing::warn!(
                    session_id = %session_id,
                    question_id = %req.question_id,
                    error = %e,
                    "Failed to persist answer"
                );
                false
            }
        };

        PersistOutcome {
            question_id: req.question_id,
            option_id: req.selected_option_id,
            persisted,
        }
    }
}
