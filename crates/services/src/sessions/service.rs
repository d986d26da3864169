use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use exam_core::model::{
    AnswerRecord, ExamSession, ExamSettings, ParticipantId, Question, QuestionId, SessionId,
    SessionPolicy, SessionSource, SessionStateError, StorageOperation,
};
use exam_core::shuffle::{ShuffledQuestion, shuffle};
use storage::{SaveOutcome, SessionStore};

use super::assembler::{Deficiency, SessionAssembler};
use crate::Clock;
use crate::content::QuestionRepository;
use crate::error::SessionError;
use crate::telemetry::StorageTelemetry;

/// A freshly created and saved session, with its questions ready to display.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSession {
    pub session: ExamSession,
    pub questions: Vec<ShuffledQuestion>,
    /// Categories that could not supply their full count.
    pub deficiencies: Vec<Deficiency>,
    /// Completed sessions evicted to make room for this one.
    pub pruned: Vec<SessionId>,
}

/// Result of answering one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub answer: AnswerRecord,
    /// Displayed index of the correct option.
    pub correct_index: usize,
    pub answered: u32,
    pub correct_count: u32,
    pub total: u32,
    /// Every question in the session has an answer.
    pub all_answered: bool,
}

impl AnswerOutcome {
    #[must_use]
    pub fn correct(&self) -> bool {
        self.answer.correct
    }
}

/// Drives exam sessions from start to completion.
///
/// Sessions are addressed by id on every call; nothing tracks an active one.
#[derive(Clone)]
pub struct ExamSessionService {
    clock: Clock,
    content: Arc<dyn QuestionRepository>,
    store: SessionStore,
    telemetry: StorageTelemetry,
    settings: ExamSettings,
    assembler: SessionAssembler,
}

impl ExamSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        content: Arc<dyn QuestionRepository>,
        store: SessionStore,
        telemetry: StorageTelemetry,
        settings: ExamSettings,
    ) -> Self {
        Self {
            clock,
            content,
            store,
            telemetry,
            settings,
            assembler: SessionAssembler::new(),
        }
    }

    /// Swap in new settings, e.g. after `ExamSettingsService::update`.
    #[must_use]
    pub fn with_settings(mut self, settings: ExamSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ExamSettings {
        &self.settings
    }

    #[must_use]
    pub fn telemetry(&self) -> &StorageTelemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Assemble a session from `policy`, save it, and return its questions.
    ///
    /// Short category pools still produce a session unless strict exam size is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` if nothing could be drawn,
    /// `InsufficientQuestions` in strict mode, `Content` if the repository
    /// fails, or `ProgressNotSaved` if the session does not fit in storage.
    pub async fn start_from_policy(
        &self,
        policy: SessionPolicy,
    ) -> Result<StartedSession, SessionError> {
        let mut pools = HashMap::new();
        for category in policy.categories() {
            let pool = self.content.fetch_questions_by_category(category).await?;
            pools.insert(category.clone(), pool);
        }

        let assembly = self.assembler.assemble(&pools, &policy);
        if assembly.is_empty() {
            return Err(SessionError::Empty);
        }
        if self.settings.strict_exam_size() && !assembly.is_complete() {
            return Err(SessionError::InsufficientQuestions {
                requested: assembly.requested,
                available: u32::try_from(assembly.len()).unwrap_or(u32::MAX),
            });
        }

        let participant = self.settings.participant();
        let mut session = ExamSession::new(
            SessionId::generate(),
            participant.clone(),
            SessionSource::Policy { policy },
            assembly.question_ids(),
            self.clock.now(),
        )?;
        let saved = self.persist(&mut session).await?;

        info!(
            session_id = %session.id(),
            questions = session.total_questions(),
            requested = assembly.requested,
            "exam session started"
        );

        let questions = assembly
            .questions
            .iter()
            .map(|q| self.present(q, &participant))
            .collect();
        Ok(StartedSession {
            session,
            questions,
            deficiencies: assembly.deficiencies,
            pruned: saved.pruned,
        })
    }

    /// Start an ad-hoc session over explicit question ids.
    ///
    /// Repeated ids and ids the repository does not know are dropped.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` if no requested question exists, `Content`
    /// if the repository fails, or `ProgressNotSaved` if the session does not
    /// fit in storage.
    pub async fn start_from_question_ids(
        &self,
        ids: Vec<QuestionId>,
    ) -> Result<StartedSession, SessionError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let requested: Vec<QuestionId> = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let fetched = self.content.fetch_questions_by_ids(&requested).await?;
        let mut by_id: HashMap<QuestionId, Question> =
            fetched.into_iter().map(|q| (q.id().clone(), q)).collect();
        let questions: Vec<Question> = requested
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();

        if questions.len() < requested.len() {
            warn!(
                requested = requested.len(),
                found = questions.len(),
                "some requested questions are unavailable"
            );
        }
        if questions.is_empty() {
            return Err(SessionError::Empty);
        }

        let participant = self.settings.participant();
        let mut session = ExamSession::new(
            SessionId::generate(),
            participant.clone(),
            SessionSource::Questions { ids: requested },
            questions.iter().map(|q| q.id().clone()).collect(),
            self.clock.now(),
        )?;
        let saved = self.persist(&mut session).await?;
        info!(
            session_id = %session.id(),
            questions = session.total_questions(),
            "exam session started"
        );

        let questions = questions
            .iter()
            .map(|q| self.present(q, &participant))
            .collect();
        Ok(StartedSession {
            session,
            questions,
            deficiencies: Vec::new(),
            pruned: saved.pruned,
        })
    }

    /// Load a stored session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if the session is missing or unreadable.
    pub async fn resume(&self, id: &SessionId) -> Result<ExamSession, SessionError> {
        self.telemetry
            .measure(StorageOperation::Load, self.store.load(id))
            .await?
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// The session's questions in session order, as its participant sees them.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown sessions, or
    /// `QuestionUnavailable` if the repository no longer has a question.
    pub async fn questions(&self, id: &SessionId) -> Result<Vec<ShuffledQuestion>, SessionError> {
        let session = self.resume(id).await?;
        let fetched = self
            .content
            .fetch_questions_by_ids(session.question_ids())
            .await?;
        let by_id: HashMap<&QuestionId, &Question> = fetched.iter().map(|q| (q.id(), q)).collect();

        session
            .question_ids()
            .iter()
            .map(|qid| {
                by_id
                    .get(qid)
                    .map(|q| self.present(q, session.participant()))
                    .ok_or_else(|| SessionError::QuestionUnavailable(qid.clone()))
            })
            .collect()
    }

    /// Record an answer given as the displayed option index and save progress.
    ///
    /// Answering the same question again replaces the earlier answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` if the session is complete or the question
    /// is not part of it, `InvalidAnswer` if the index is out of range, or
    /// `ProgressNotSaved` if the save does not fit in storage.
    pub async fn submit_answer(
        &self,
        id: &SessionId,
        question_id: &QuestionId,
        displayed_index: usize,
        time_spent_ms: u64,
    ) -> Result<AnswerOutcome, SessionError> {
        let mut session = self.resume(id).await?;
        if session.is_complete() {
            return Err(SessionStateError::Completed.into());
        }
        if !session.question_ids().contains(question_id) {
            return Err(SessionStateError::UnknownQuestion(question_id.clone()).into());
        }

        let question = self
            .content
            .fetch_questions_by_ids(std::slice::from_ref(question_id))
            .await?
            .into_iter()
            .find(|q| q.id() == question_id)
            .ok_or_else(|| SessionError::QuestionUnavailable(question_id.clone()))?;
        let presented = self.present(&question, session.participant());

        let invalid = || SessionError::InvalidAnswer {
            index: displayed_index,
            options: presented.options().len(),
        };
        let original = presented.original_index(displayed_index).ok_or_else(invalid)?;
        let selected_index = u32::try_from(original).map_err(|_| invalid())?;

        let answer = session
            .record_answer(AnswerRecord {
                question_id: question_id.clone(),
                selected_index,
                correct: original == question.correct_answer(),
                time_spent_ms,
                answered_at: self.clock.now(),
            })?
            .clone();
        self.persist(&mut session).await?;

        Ok(AnswerOutcome {
            answer,
            correct_index: presented.correct_answer(),
            answered: session.answered_count(),
            correct_count: session.correct_count(),
            total: session.total_questions(),
            all_answered: session.next_unanswered().is_none(),
        })
    }

    /// Mark a session finished and save it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` if it was already completed.
    pub async fn complete(&self, id: &SessionId) -> Result<ExamSession, SessionError> {
        let mut session = self.resume(id).await?;
        session.complete()?;
        self.persist(&mut session).await?;
        info!(
            session_id = %session.id(),
            answered = session.answered_count(),
            correct = session.correct_count(),
            total = session.total_questions(),
            "exam session completed"
        );
        Ok(session)
    }

    /// Discard a session. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn abandon(&self, id: &SessionId) -> Result<bool, SessionError> {
        Ok(self
            .telemetry
            .measure(StorageOperation::Delete, self.store.delete(id))
            .await?)
    }

    /// Ids of all stored sessions.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn session_ids(&self) -> Result<Vec<SessionId>, SessionError> {
        Ok(self
            .telemetry
            .measure(StorageOperation::Load, self.store.list_ids())
            .await?)
    }

    /// Apply the configured retention to completed sessions.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn optimize_storage(&self) -> Result<Vec<SessionId>, SessionError> {
        let removed = self
            .telemetry
            .measure(
                StorageOperation::Optimize,
                self.store.optimize(
                    self.settings.retention_days(),
                    self.settings.max_completed_sessions(),
                ),
            )
            .await?;
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn export_sessions(&self) -> Result<String, SessionError> {
        Ok(self
            .telemetry
            .measure(StorageOperation::Export, self.store.export_all())
            .await?)
    }

    /// Merge an exported document into the store. All-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the document is invalid or a write fails.
    pub async fn import_sessions(&self, blob: &str) -> Result<usize, SessionError> {
        Ok(self
            .telemetry
            .measure(StorageOperation::Import, self.store.import_all(blob))
            .await?)
    }

    /// Delete every stored session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn clear_sessions(&self) -> Result<usize, SessionError> {
        Ok(self
            .telemetry
            .measure(StorageOperation::Clear, self.store.clear_all())
            .await?)
    }

    async fn persist(&self, session: &mut ExamSession) -> Result<SaveOutcome, SessionError> {
        let outcome = self
            .telemetry
            .measure(StorageOperation::Save, self.store.save(session))
            .await?;
        if !outcome.pruned.is_empty() {
            info!(
                session_id = %session.id(),
                pruned = outcome.pruned.len(),
                "evicted completed sessions to make room"
            );
        }
        Ok(outcome)
    }

    fn present(&self, question: &Question, participant: &ParticipantId) -> ShuffledQuestion {
        if self.settings.shuffle_options() {
            shuffle(question, participant)
        } else {
            ShuffledQuestion::unshuffled(question.clone())
        }
    }
}
