//! Versioned persisted shape of an exam session.
//!
//! Records are decoded at the boundary: legacy payloads are migrated, then
//! every record is rebuilt through `ExamSession::from_persisted`, so a stored
//! value either becomes a valid aggregate or is reported as corrupt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use exam_core::model::{
    AnswerRecord, ExamSession, ParticipantId, QuestionId, SessionId, SessionPolicy,
    SessionSource, SessionStateError,
};

/// Current record schema version.
pub const RECORD_VERSION: u32 = 2;

/// Tag carried by export documents.
pub const EXPORT_FORMAT: &str = "exam-sessions";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u64),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Invalid(#[from] SessionStateError),
}

/// Persisted session, schema version 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub version: u32,
    pub id: SessionId,
    pub participant_id: ParticipantId,
    pub source: SessionSource,
    pub question_ids: Vec<QuestionId>,
    pub answers: Vec<AnswerRecord>,
    pub created_at: DateTime<Utc>,
    pub last_saved_at: DateTime<Utc>,
    pub completed: bool,
}

impl SessionRecord {
    #[must_use]
    pub fn from_session(session: &ExamSession) -> Self {
        Self {
            version: RECORD_VERSION,
            id: session.id().clone(),
            participant_id: session.participant().clone(),
            source: session.source().clone(),
            question_ids: session.question_ids().to_vec(),
            answers: session.answers().to_vec(),
            created_at: session.created_at(),
            last_saved_at: session.last_saved_at(),
            completed: session.is_complete(),
        }
    }

    /// # Errors
    ///
    /// Returns `RecordError::Invalid` if the record violates session invariants.
    pub fn into_session(self) -> Result<ExamSession, RecordError> {
        Ok(ExamSession::from_persisted(
            self.id,
            self.participant_id,
            self.source,
            self.question_ids,
            self.answers,
            self.created_at,
            self.last_saved_at,
            self.completed,
        )?)
    }
}

//
// ─── LEGACY (V1) ───────────────────────────────────────────────────────────────
//

/// Web client timestamps were either epoch milliseconds or ISO strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

impl LegacyTimestamp {
    fn resolve(self) -> Result<DateTime<Utc>, RecordError> {
        match self {
            LegacyTimestamp::Text(t) => Ok(t),
            LegacyTimestamp::Millis(ms) => {
                DateTime::<Utc>::from_timestamp_millis(ms).ok_or(RecordError::InvalidTimestamp(ms))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacySource {
    Questions(Vec<QuestionId>),
    Policy(SessionPolicy),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAnswer {
    question_id: QuestionId,
    selected_index: u32,
    correct: bool,
    #[serde(default)]
    time_spent_ms: u64,
    answered_at: LegacyTimestamp,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    id: SessionId,
    policy_or_question_ids: LegacySource,
    #[serde(default)]
    answers: Vec<LegacyAnswer>,
    created_at: LegacyTimestamp,
    last_saved_at: LegacyTimestamp,
    #[serde(default)]
    completed: bool,
}

impl LegacyRecord {
    fn migrate(self) -> Result<SessionRecord, RecordError> {
        let mut answers = Vec::with_capacity(self.answers.len());
        for a in self.answers {
            answers.push(AnswerRecord {
                question_id: a.question_id,
                selected_index: a.selected_index,
                correct: a.correct,
                time_spent_ms: a.time_spent_ms,
                answered_at: a.answered_at.resolve()?,
            });
        }

        let (source, question_ids) = match self.policy_or_question_ids {
            LegacySource::Questions(ids) => (SessionSource::Questions { ids: ids.clone() }, ids),
            // v1 policy sessions never stored their draw; the answered ids are
            // the only part of it that can be recovered.
            LegacySource::Policy(policy) => {
                let ids = answers.iter().map(|a| a.question_id.clone()).collect();
                (SessionSource::Policy { policy }, ids)
            }
        };

        Ok(SessionRecord {
            version: RECORD_VERSION,
            id: self.id,
            participant_id: ParticipantId::anonymous(),
            source,
            question_ids,
            answers,
            created_at: self.created_at.resolve()?,
            last_saved_at: self.last_saved_at.resolve()?,
            completed: self.completed,
        })
    }
}

//
// ─── ENCODE / DECODE ───────────────────────────────────────────────────────────
//

/// Decode any supported record version into the current schema.
///
/// # Errors
///
/// Returns `RecordError` for malformed JSON, unknown versions, or legacy
/// payloads that cannot be migrated.
pub fn decode_record(value: Value) -> Result<SessionRecord, RecordError> {
    let version = value.get("version").and_then(Value::as_u64);
    match version {
        None => serde_json::from_value::<LegacyRecord>(value)?.migrate(),
        Some(v) if v == u64::from(RECORD_VERSION) => Ok(serde_json::from_value(value)?),
        Some(v) => Err(RecordError::UnsupportedVersion(v)),
    }
}

/// Parse, migrate and validate a stored session.
///
/// # Errors
///
/// Returns `RecordError` if the text is not a valid session in any supported version.
pub fn decode_session(raw: &str) -> Result<ExamSession, RecordError> {
    let value: Value = serde_json::from_str(raw)?;
    decode_record(value)?.into_session()
}

/// # Errors
///
/// Returns `RecordError::Malformed` if serialization fails.
pub fn encode_session(session: &ExamSession) -> Result<String, RecordError> {
    Ok(serde_json::to_string(&SessionRecord::from_session(session))?)
}

/// Backup document holding every stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub format: String,
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub sessions: BTreeMap<String, Value>,
}

impl ExportDocument {
    /// # Errors
    ///
    /// Returns `RecordError::Malformed` if any record fails to serialize; no
    /// partial document is produced.
    pub fn new(
        exported_at: DateTime<Utc>,
        records: Vec<SessionRecord>,
    ) -> Result<Self, RecordError> {
        let mut sessions = BTreeMap::new();
        for record in records {
            let id = record.id.as_str().to_owned();
            sessions.insert(id, serde_json::to_value(record)?);
        }
        Ok(Self {
            format: EXPORT_FORMAT.to_owned(),
            version: RECORD_VERSION,
            exported_at,
            sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::time::fixed_now;

    fn session() -> ExamSession {
        let ids = vec![QuestionId::new("q1"), QuestionId::new("q2")];
        let mut s = ExamSession::new(
            SessionId::new("s1"),
            ParticipantId::new("u1"),
            SessionSource::Questions { ids: ids.clone() },
            ids,
            fixed_now(),
        )
        .unwrap();
        s.record_answer(AnswerRecord {
            question_id: QuestionId::new("q2"),
            selected_index: 3,
            correct: true,
            time_spent_ms: 900,
            answered_at: fixed_now(),
        })
        .unwrap();
        s
    }

    #[test]
    fn current_records_decode_to_the_same_session() {
        let original = session();
        let raw = encode_session(&original).unwrap();
        assert!(raw.contains("\"version\":2"));
        assert!(raw.contains("\"questionIds\""));

        assert_eq!(decode_session(&raw).unwrap(), original);
    }

    #[test]
    fn legacy_question_list_record_is_migrated() {
        let raw = r#"{
            "id": "old",
            "policyOrQuestionIds": ["q1", "q2", "q3"],
            "answers": [
                {"questionId": "q1", "selectedIndex": 0, "correct": false,
                 "timeSpentMs": 1200, "answeredAt": 1700000000000}
            ],
            "createdAt": 1699999990000,
            "lastSavedAt": "2023-11-14T22:13:20Z",
            "completed": false
        }"#;

        let s = decode_session(raw).unwrap();
        assert_eq!(s.id(), &SessionId::new("old"));
        assert_eq!(s.participant(), &ParticipantId::anonymous());
        assert_eq!(s.total_questions(), 3);
        assert_eq!(s.answered_count(), 1);
        assert_eq!(s.correct_count(), 0);
        assert_eq!(s.last_saved_at(), fixed_now());
    }

    #[test]
    fn legacy_policy_record_recovers_answered_ids() {
        let raw = r#"{
            "id": "old-policy",
            "policyOrQuestionIds": {"counts": {"easy": 2}, "total": 2},
            "answers": [
                {"questionId": "e7", "selectedIndex": 1, "correct": true,
                 "timeSpentMs": 10, "answeredAt": "2023-11-14T22:13:20Z"}
            ],
            "createdAt": "2023-11-14T22:13:20Z",
            "lastSavedAt": "2023-11-14T22:13:20Z",
            "completed": true
        }"#;

        let s = decode_session(raw).unwrap();
        assert!(matches!(s.source(), SessionSource::Policy { .. }));
        assert_eq!(s.question_ids(), [QuestionId::new("e7")]);
        assert!(s.is_complete());
    }

    #[test]
    fn rejects_garbage_unknown_versions_and_broken_invariants() {
        assert!(matches!(
            decode_session("{not json"),
            Err(RecordError::Malformed(_))
        ));
        assert!(matches!(
            decode_session(r#"{"version": 9, "id": "x"}"#),
            Err(RecordError::UnsupportedVersion(9))
        ));

        let mut record = SessionRecord::from_session(&session());
        record.question_ids.push(QuestionId::new("q1"));
        let raw = serde_json::to_string(&record).unwrap();
        assert!(matches!(
            decode_session(&raw),
            Err(RecordError::Invalid(SessionStateError::DuplicateQuestion(_)))
        ));
    }

    #[test]
    fn export_document_keys_records_by_id() {
        let record = SessionRecord::from_session(&session());
        let doc = ExportDocument::new(fixed_now(), vec![record.clone()]).unwrap();

        assert_eq!(doc.format, EXPORT_FORMAT);
        assert_eq!(doc.version, RECORD_VERSION);
        let stored = doc.sessions.get("s1").cloned().unwrap();
        assert_eq!(decode_record(stored).unwrap(), record);
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let raw = encode_session(&session()).unwrap().replace("\"createdAt\"", "\"created\"");
        assert!(matches!(decode_session(&raw), Err(RecordError::Malformed(_))));
    }
}
