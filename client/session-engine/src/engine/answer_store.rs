use std::collections::HashMap;

use crate::error::AnswerStoreError;
use crate::models::answer::AnswerSlot;
use crate::models::{OptionId, Question, QuestionId};

/// One answer slot per question, in question order.
///
/// Aggregates are computed from the slots on every call.
#[derive(Debug, Clone)]
pub struct AnswerStore {
    slots: Vec<AnswerSlot>,
    questions: Vec<Question>,
    index: HashMap<QuestionId, usize>,
}

impl AnswerStore {
    pub fn new(questions: &[Question]) -> Self {
        let slots = questions
            .iter()
            .map(|q| AnswerSlot::unanswered(q.id.clone()))
            .collect();
        let index = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.clone(), i))
            .collect();

        Self {
            slots,
            questions: questions.to_vec(),
            index,
        }
    }

    fn position(&self, question_id: &str) -> Result<usize, AnswerStoreError> {
        self.index
            .get(question_id)
            .copied()
            .ok_or_else(|| AnswerStoreError::UnknownQuestion(question_id.to_string()))
    }

    /// Sets or clears the selection for a question.
    ///
    /// A selection the grading service already acknowledged can be changed
    /// but not cleared, since there is no remote call to withdraw it.
    pub fn set(
        &mut self,
        question_id: &str,
        selection: Option<OptionId>,
    ) -> Result<(), AnswerStoreError> {
        let pos = self.position(question_id)?;
        match &selection {
            Some(option_id) if !self.questions[pos].has_option(option_id) => {
                return Err(AnswerStoreError::UnknownOption {
                    question_id: question_id.to_string(),
                    option_id: option_id.clone(),
                });
            }
            None if self.slots[pos].persisted_option.is_some() => {
                return Err(AnswerStoreError::AlreadyPersisted(question_id.to_string()));
            }
            _ => {}
        }
        self.slots[pos].selected_option = selection;
        Ok(())
    }

    /// Flips the flag and returns its new value.
    pub fn toggle_flag(&mut self, question_id: &str) -> Result<bool, AnswerStoreError> {
        let pos = self.position(question_id)?;
        let slot = &mut self.slots[pos];
        slot.flagged = !slot.flagged;
        Ok(slot.flagged)
    }

    pub fn add_time(&mut self, question_id: &str, seconds: u32) -> Result<(), AnswerStoreError> {
        let pos = self.position(question_id)?;
        let slot = &mut self.slots[pos];
        slot.time_spent_seconds = slot.time_spent_seconds.saturating_add(seconds);
        Ok(())
    }

    /// Records that the grading service acknowledged `option_id` for the question.
    pub fn mark_persisted(
        &mut self,
        question_id: &str,
        option_id: &str,
    ) -> Result<(), AnswerStoreError> {
        let pos = self.position(question_id)?;
        self.slots[pos].persisted_option = Some(option_id.to_string());
        Ok(())
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerSlot> {
        self.index.get(question_id).map(|&i| &self.slots[i])
    }

    pub fn slot_at(&self, index: usize) -> Option<&AnswerSlot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[AnswerSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_answered()).count()
    }

    pub fn flagged_count(&self) -> usize {
        self.slots.iter().filter(|s| s.flagged).count()
    }

    pub fn flagged_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.flagged)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        self.answered_count() as f64 / self.slots.len() as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, QuestionOption};

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{}", i),
                body: format!("Question {}", i),
                options: ["a", "b", "c"]
                    .iter()
                    .map(|id| QuestionOption {
                        id: id.to_string(),
                        label: id.to_uppercase(),
                        text: format!("option {}", id),
                    })
                    .collect(),
                difficulty: Difficulty::Medium,
            })
            .collect()
    }

    #[test]
    fn seeds_one_unanswered_slot_per_question() {
        let store = AnswerStore::new(&questions(4));
        assert_eq!(store.len(), 4);
        assert!(store.slots().iter().all(|s| !s.is_answered() && !s.flagged));
        assert_eq!(store.progress_percentage(), 0.0);
    }

    #[test]
    fn aggregates_track_every_change() {
        let mut store = AnswerStore::new(&questions(4));

        store.set("q0", Some("a".to_string())).unwrap();
        assert_eq!(store.answered_count(), 1);
        assert_eq!(store.progress_percentage(), 25.0);

        store.set("q1", Some("b".to_string())).unwrap();
        store.set("q0", Some("c".to_string())).unwrap();
        assert_eq!(store.answered_count(), 2);
        assert_eq!(store.progress_percentage(), 50.0);

        store.set("q1", None).unwrap();
        assert_eq!(store.answered_count(), 1);
        assert_eq!(store.progress_percentage(), 25.0);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn toggle_flag_flips_and_counts() {
        let mut store = AnswerStore::new(&questions(3));
        assert!(store.toggle_flag("q2").unwrap());
        assert_eq!(store.flagged_count(), 1);
        assert_eq!(store.flagged_indices(), vec![2]);
        assert!(!store.toggle_flag("q2").unwrap());
        assert_eq!(store.flagged_count(), 0);
    }

    #[test]
    fn rejects_unknown_question_and_option() {
        let mut store = AnswerStore::new(&questions(1));
        assert!(matches!(
            store.set("missing", Some("a".to_string())),
            Err(AnswerStoreError::UnknownQuestion(_))
        ));
        assert!(matches!(
            store.set("q0", Some("z".to_string())),
            Err(AnswerStoreError::UnknownOption { .. })
        ));
        assert!(!store.get("q0").unwrap().is_answered());
    }

    #[test]
    fn time_and_persistence_bookkeeping() {
        let mut store = AnswerStore::new(&questions(1));
        store.add_time("q0", 3).unwrap();
        store.set("q0", Some("b".to_string())).unwrap();
        assert!(store.get("q0").unwrap().needs_persisting());

        store.mark_persisted("q0", "b").unwrap();
        let slot = store.get("q0").unwrap();
        assert_eq!(slot.time_spent_seconds, 3);
        assert!(!slot.needs_persisting());
    }

    #[test]
    fn acknowledged_answer_can_change_but_not_clear() {
        let mut store = AnswerStore::new(&questions(1));
        store.set("q0", Some("a".to_string())).unwrap();
        store.mark_persisted("q0", "a").unwrap();

        assert!(matches!(
            store.set("q0", None),
            Err(AnswerStoreError::AlreadyPersisted(_))
        ));
        assert_eq!(
            store.get("q0").unwrap().selected_option.as_deref(),
            Some("a")
        );

        store.set("q0", Some("c".to_string())).unwrap();
        assert!(store.get("q0").unwrap().needs_persisting());
    }
}
