use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{ParticipantId, QuestionId, SessionId};
use crate::model::policy::SessionPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("session already completed")]
    Completed,

    #[error("question {0} is not part of this session")]
    UnknownQuestion(QuestionId),

    #[error("question {0} appears more than once")]
    DuplicateQuestion(QuestionId),

    #[error("question {0} has more than one answer")]
    DuplicateAnswer(QuestionId),

    #[error("too many questions for a single session: {len}")]
    TooManyQuestions { len: usize },

    #[error("last_saved_at is before created_at")]
    InvalidTimeRange,
}

/// Where the question set of a session came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionSource {
    Policy { policy: SessionPolicy },
    Questions { ids: Vec<QuestionId> },
}

/// One submitted answer. `selected_index` refers to the original option order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub selected_index: u32,
    pub correct: bool,
    pub time_spent_ms: u64,
    pub answered_at: DateTime<Utc>,
}

/// Mutable aggregate for one exam attempt.
///
/// Counters are always derived from `answers`, so `answered_count <= total_questions`
/// and `correct_count <= answered_count` hold by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSession {
    id: SessionId,
    participant: ParticipantId,
    source: SessionSource,
    question_ids: Vec<QuestionId>,
    answers: Vec<AnswerRecord>,
    answered_count: u32,
    correct_count: u32,
    created_at: DateTime<Utc>,
    last_saved_at: DateTime<Utc>,
    completed: bool,
}

impl ExamSession {
    /// Start a fresh session over the given question ids.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::DuplicateQuestion` if an id repeats, or
    /// `TooManyQuestions` if the list cannot be counted in `u32`.
    pub fn new(
        id: SessionId,
        participant: ParticipantId,
        source: SessionSource,
        question_ids: Vec<QuestionId>,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionStateError> {
        Self::from_persisted(
            id,
            participant,
            source,
            question_ids,
            Vec::new(),
            now,
            now,
            false,
        )
    }

    /// Rehydrate a session from storage, re-checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError` if ids repeat, answers reference unknown
    /// questions, or timestamps are out of order.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: SessionId,
        participant: ParticipantId,
        source: SessionSource,
        question_ids: Vec<QuestionId>,
        answers: Vec<AnswerRecord>,
        created_at: DateTime<Utc>,
        last_saved_at: DateTime<Utc>,
        completed: bool,
    ) -> Result<Self, SessionStateError> {
        if last_saved_at < created_at {
            return Err(SessionStateError::InvalidTimeRange);
        }
        if u32::try_from(question_ids.len()).is_err() {
            return Err(SessionStateError::TooManyQuestions {
                len: question_ids.len(),
            });
        }

        let mut known = HashSet::with_capacity(question_ids.len());
        for qid in &question_ids {
            if !known.insert(qid) {
                return Err(SessionStateError::DuplicateQuestion(qid.clone()));
            }
        }

        let mut answered = HashSet::with_capacity(answers.len());
        for answer in &answers {
            if !known.contains(&answer.question_id) {
                return Err(SessionStateError::UnknownQuestion(
                    answer.question_id.clone(),
                ));
            }
            if !answered.insert(&answer.question_id) {
                return Err(SessionStateError::DuplicateAnswer(
                    answer.question_id.clone(),
                ));
            }
        }

        let mut session = Self {
            id,
            participant,
            source,
            question_ids,
            answers,
            answered_count: 0,
            correct_count: 0,
            created_at,
            last_saved_at,
            completed,
        };
        session.recount();
        Ok(session)
    }

    /// Record (or replace) the answer for a question.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Completed` once the session is finished, or
    /// `UnknownQuestion` if the id is not part of the session.
    pub fn record_answer(&mut self, answer: AnswerRecord) -> Result<&AnswerRecord, SessionStateError> {
        if self.completed {
            return Err(SessionStateError::Completed);
        }
        if !self.question_ids.contains(&answer.question_id) {
            return Err(SessionStateError::UnknownQuestion(answer.question_id));
        }

        let idx = match self
            .answers
            .iter()
            .position(|a| a.question_id == answer.question_id)
        {
            Some(idx) => {
                self.answers[idx] = answer;
                idx
            }
            None => {
                self.answers.push(answer);
                self.answers.len() - 1
            }
        };
        self.recount();
        Ok(&self.answers[idx])
    }

    /// Mark the attempt finished. Completing twice is an error.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Completed` if already completed.
    pub fn complete(&mut self) -> Result<(), SessionStateError> {
        if self.completed {
            return Err(SessionStateError::Completed);
        }
        self.completed = true;
        Ok(())
    }

    /// Stamp the time of a successful save.
    pub fn mark_saved(&mut self, at: DateTime<Utc>) {
        self.last_saved_at = at.max(self.created_at);
    }

    fn recount(&mut self) {
        let answered = self.answers.len();
        let correct = self.answers.iter().filter(|a| a.correct).count();
        // bounded by question_ids.len(), which was checked to fit in u32
        self.answered_count = u32::try_from(answered).unwrap_or(u32::MAX);
        self.correct_count = u32::try_from(correct).unwrap_or(u32::MAX);
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    #[must_use]
    pub fn source(&self) -> &SessionSource {
        &self.source
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    #[must_use]
    pub fn answer_for(&self, question_id: &QuestionId) -> Option<&AnswerRecord> {
        self.answers.iter().find(|a| &a.question_id == question_id)
    }

    /// First question in session order that has no answer yet.
    #[must_use]
    pub fn next_unanswered(&self) -> Option<&QuestionId> {
        self.question_ids
            .iter()
            .find(|qid| self.answer_for(qid).is_none())
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        u32::try_from(self.question_ids.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn answered_count(&self) -> u32 {
        self.answered_count
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    /// Total time spent on answered questions, in milliseconds.
    #[must_use]
    pub fn time_spent_ms(&self) -> u64 {
        self.answers
            .iter()
            .fold(0_u64, |acc, a| acc.saturating_add(a.time_spent_ms))
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_saved_at(&self) -> DateTime<Utc> {
        self.last_saved_at
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn ids(items: &[&str]) -> Vec<QuestionId> {
        items.iter().map(|s| QuestionId::new(*s)).collect()
    }

    fn answer(qid: &str, correct: bool) -> AnswerRecord {
        AnswerRecord {
            question_id: QuestionId::new(qid),
            selected_index: 1,
            correct,
            time_spent_ms: 1_500,
            answered_at: fixed_now(),
        }
    }

    fn build_session() -> ExamSession {
        let qids = ids(&["q1", "q2", "q3"]);
        ExamSession::new(
            SessionId::new("s1"),
            ParticipantId::new("u1"),
            SessionSource::Questions { ids: qids.clone() },
            qids,
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn counters_follow_answers() {
        let mut session = build_session();
        session.record_answer(answer("q1", true)).unwrap();
        session.record_answer(answer("q2", false)).unwrap();

        assert_eq!(session.answered_count(), 2);
        assert_eq!(session.correct_count(), 1);
        assert_eq!(session.next_unanswered(), Some(&QuestionId::new("q3")));
        assert_eq!(session.time_spent_ms(), 3_000);
    }

    #[test]
    fn re_answering_replaces_previous_record() {
        let mut session = build_session();
        session.record_answer(answer("q1", false)).unwrap();
        session.record_answer(answer("q1", true)).unwrap();

        assert_eq!(session.answered_count(), 1);
        assert_eq!(session.correct_count(), 1);
    }

    #[test]
    fn rejects_unknown_question_and_completed_session() {
        let mut session = build_session();
        let err = session.record_answer(answer("q9", true)).unwrap_err();
        assert_eq!(err, SessionStateError::UnknownQuestion(QuestionId::new("q9")));

        session.complete().unwrap();
        let err = session.record_answer(answer("q1", true)).unwrap_err();
        assert_eq!(err, SessionStateError::Completed);
        assert_eq!(session.complete().unwrap_err(), SessionStateError::Completed);
    }

    #[test]
    fn duplicate_question_ids_are_rejected() {
        let qids = ids(&["q1", "q1"]);
        let err = ExamSession::new(
            SessionId::new("s1"),
            ParticipantId::anonymous(),
            SessionSource::Questions { ids: qids.clone() },
            qids,
            fixed_now(),
        )
        .unwrap_err();
        assert_eq!(err, SessionStateError::DuplicateQuestion(QuestionId::new("q1")));
    }

    #[test]
    fn persisted_answers_are_validated() {
        let qids = ids(&["q1", "q2"]);
        let err = ExamSession::from_persisted(
            SessionId::new("s1"),
            ParticipantId::anonymous(),
            SessionSource::Questions { ids: qids.clone() },
            qids.clone(),
            vec![answer("q1", true), answer("q1", false)],
            fixed_now(),
            fixed_now(),
            false,
        )
        .unwrap_err();
        assert_eq!(err, SessionStateError::DuplicateAnswer(QuestionId::new("q1")));

        let err = ExamSession::from_persisted(
            SessionId::new("s1"),
            ParticipantId::anonymous(),
            SessionSource::Questions { ids: qids.clone() },
            qids,
            Vec::new(),
            fixed_now(),
            fixed_now() - Duration::seconds(1),
            false,
        )
        .unwrap_err();
        assert_eq!(err, SessionStateError::InvalidTimeRange);
    }

    #[test]
    fn mark_saved_never_precedes_creation() {
        let mut session = build_session();
        session.mark_saved(fixed_now() - Duration::days(1));
        assert_eq!(session.last_saved_at(), session.created_at());

        session.mark_saved(fixed_now() + Duration::minutes(5));
        assert_eq!(session.last_saved_at(), fixed_now() + Duration::minutes(5));
    }
}
