use chrono::Duration;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use exam_core::Clock;
use exam_core::model::{ExamSession, SessionId};

use crate::record::{
    EXPORT_FORMAT, ExportDocument, RECORD_VERSION, RecordError, SessionRecord, decode_record,
    decode_session, encode_session,
};
use crate::repository::{KeyValueStore, StorageError, entry_size};

pub const DEFAULT_SESSION_PREFIX: &str = "exam:session:";

/// Errors surfaced by `SessionStore`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionStoreError {
    /// The write did not fit even after pruning completed sessions.
    #[error("storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("invalid import: {0}")]
    InvalidImport(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStoreConfig {
    pub key_prefix: String,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_SESSION_PREFIX.to_owned(),
        }
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub bytes: u64,
    /// Completed sessions evicted to make room, oldest first.
    pub pruned: Vec<SessionId>,
}

/// A decoded session together with its on-store footprint.
struct StoredSession {
    key: String,
    bytes: u64,
    session: ExamSession,
}

/// Persists exam session snapshots in a shared key/value store.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    config: SessionStoreConfig,
}

impl SessionStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Clock) -> Self {
        Self::with_config(kv, clock, SessionStoreConfig::default())
    }

    #[must_use]
    pub fn with_config(kv: Arc<dyn KeyValueStore>, clock: Clock, config: SessionStoreConfig) -> Self {
        Self { kv, clock, config }
    }

    #[must_use]
    pub fn key_for(&self, id: &SessionId) -> String {
        format!("{}{}", self.config.key_prefix, id.as_str())
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    /// Serialize and write a session, stamping `last_saved_at` on success.
    ///
    /// On quota failure, completed sessions are evicted oldest-first until the
    /// shortfall is covered and the write is retried once.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::QuotaExceeded` if the retry also fails, or
    /// other storage errors.
    pub async fn save(&self, session: &mut ExamSession) -> Result<SaveOutcome, SessionStoreError> {
        let now = self.clock.now();
        let mut snapshot = session.clone();
        snapshot.mark_saved(now);
        let raw = encode_session(&snapshot)?;
        let key = self.key_for(snapshot.id());
        let bytes = entry_size(&key, &raw);

        let pruned = match self.kv.set(&key, &raw).await {
            Ok(()) => Vec::new(),
            Err(StorageError::QuotaExceeded {
                requested,
                available,
            }) => {
                let shortfall = requested.saturating_sub(available);
                warn!(
                    session_id = %snapshot.id(),
                    requested,
                    available,
                    "session save hit storage quota; pruning completed sessions"
                );
                let pruned = self.prune_completed(shortfall, snapshot.id()).await?;
                match self.kv.set(&key, &raw).await {
                    Ok(()) => pruned,
                    Err(StorageError::QuotaExceeded {
                        requested,
                        available,
                    }) => {
                        warn!(
                            session_id = %snapshot.id(),
                            pruned = pruned.len(),
                            "session save failed after pruning"
                        );
                        return Err(SessionStoreError::QuotaExceeded {
                            requested,
                            available,
                        });
                    }
                    Err(other) => return Err(other.into()),
                }
            }
            Err(other) => return Err(other.into()),
        };

        session.mark_saved(now);
        debug!(session_id = %session.id(), bytes, "session saved");
        Ok(SaveOutcome { bytes, pruned })
    }

    /// Read a session. Corrupt or foreign content is logged and treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::Storage` only when the backend itself fails.
    pub async fn load(&self, id: &SessionId) -> Result<Option<ExamSession>, SessionStoreError> {
        let key = self.key_for(id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        match decode_session(&raw) {
            Ok(session) if session.id() == id => Ok(Some(session)),
            Ok(session) => {
                warn!(key = %key, stored_id = %session.id(), "session record id does not match its key");
                Ok(None)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "discarding corrupt session record");
                Ok(None)
            }
        }
    }

    /// Remove a session. Returns whether anything was stored under the id.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::Storage` on backend failure.
    pub async fn delete(&self, id: &SessionId) -> Result<bool, SessionStoreError> {
        let key = self.key_for(id);
        let existed = self.kv.get(&key).await?.is_some();
        self.kv.remove(&key).await?;
        Ok(existed)
    }

    /// Ids of every key in the session namespace, including corrupt entries.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::Storage` on backend failure.
    pub async fn list_ids(&self) -> Result<Vec<SessionId>, SessionStoreError> {
        let prefix = self.key_prefix();
        Ok(self
            .kv
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(SessionId::new))
            .collect())
    }

    /// Serialize every readable session into one backup document.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` on backend or serialization failure.
    pub async fn export_all(&self) -> Result<String, SessionStoreError> {
        let records = self
            .stored_sessions()
            .await?
            .into_iter()
            .map(|s| SessionRecord::from_session(&s.session))
            .collect();
        let doc = ExportDocument::new(self.clock.now(), records)?;
        serde_json::to_string(&doc).map_err(|e| SessionStoreError::Record(e.into()))
    }

    /// Restore sessions from an export document, all or nothing.
    ///
    /// Every record is validated before anything is written. If a write fails
    /// midway, keys already written are put back to their previous values.
    /// Sessions not present in the document are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::InvalidImport` for a malformed document, or
    /// the write error that forced a rollback.
    pub async fn import_all(&self, blob: &str) -> Result<usize, SessionStoreError> {
        let staged = match self.validate_import(blob) {
            Ok(staged) => staged,
            Err(reason) => {
                warn!(%reason, "rejecting session import");
                return Err(SessionStoreError::InvalidImport(reason));
            }
        };

        let mut previous: Vec<(String, Option<String>)> = Vec::with_capacity(staged.len());
        for (key, raw) in &staged {
            let written = match self.kv.get(key).await {
                Ok(before) => {
                    previous.push((key.clone(), before));
                    self.kv.set(key, raw).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                warn!(key = %key, error = %err, "import write failed; rolling back");
                self.rollback(previous).await;
                return Err(match err {
                    StorageError::QuotaExceeded {
                        requested,
                        available,
                    } => SessionStoreError::QuotaExceeded {
                        requested,
                        available,
                    },
                    other => other.into(),
                });
            }
        }

        info!(count = staged.len(), "imported sessions");
        Ok(staged.len())
    }

    fn validate_import(&self, blob: &str) -> Result<Vec<(String, String)>, String> {
        let doc: ExportDocument =
            serde_json::from_str(blob).map_err(|e| format!("not an export document: {e}"))?;
        if doc.format != EXPORT_FORMAT {
            return Err(format!("unexpected format tag {:?}", doc.format));
        }
        if doc.version > RECORD_VERSION {
            return Err(format!("unsupported export version {}", doc.version));
        }

        let mut staged = Vec::with_capacity(doc.sessions.len());
        for (id, value) in doc.sessions {
            let session = decode_record(value)
                .and_then(SessionRecord::into_session)
                .map_err(|e| format!("session {id}: {e}"))?;
            if session.id().as_str() != id {
                return Err(format!("session {id}: record id {} does not match", session.id()));
            }
            let raw = encode_session(&session).map_err(|e| format!("session {id}: {e}"))?;
            staged.push((self.key_for(session.id()), raw));
        }
        Ok(staged)
    }

    async fn rollback(&self, previous: Vec<(String, Option<String>)>) {
        for (key, before) in previous.into_iter().rev() {
            let restored = match before {
                Some(raw) => self.kv.set(&key, &raw).await,
                None => self.kv.remove(&key).await,
            };
            if let Err(err) = restored {
                warn!(key = %key, error = %err, "failed to restore key during import rollback");
            }
        }
    }

    /// Delete every session in the namespace. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::Storage` on backend failure.
    pub async fn clear_all(&self) -> Result<usize, SessionStoreError> {
        let keys: Vec<String> = self
            .kv
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(self.key_prefix()))
            .collect();
        for key in &keys {
            self.kv.remove(key).await?;
        }
        info!(count = keys.len(), "cleared all sessions");
        Ok(keys.len())
    }

    /// Apply the retention policy to completed sessions.
    ///
    /// Completed sessions last saved more than `retention_days` ago are removed,
    /// then only the newest `max_completed` completed sessions are kept.
    /// In-progress sessions are never touched.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::Storage` on backend failure.
    pub async fn optimize(
        &self,
        retention_days: u32,
        max_completed: u32,
    ) -> Result<Vec<SessionId>, SessionStoreError> {
        // a retention reaching past the earliest representable time has no cutoff
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(Duration::days(i64::from(retention_days)));
        let mut completed: Vec<StoredSession> = self
            .stored_sessions()
            .await?
            .into_iter()
            .filter(|s| s.session.is_complete())
            .collect();
        // newest first
        completed.sort_by_key(|s| std::cmp::Reverse(s.session.last_saved_at()));

        let keep = usize::try_from(max_completed).unwrap_or(usize::MAX);
        let mut removed = Vec::new();
        for (rank, stored) in completed.iter().enumerate() {
            let expired = cutoff.is_some_and(|c| stored.session.last_saved_at() < c);
            if rank >= keep || expired {
                self.kv.remove(&stored.key).await?;
                removed.push(stored.session.id().clone());
            }
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "pruned completed sessions");
        }
        Ok(removed)
    }

    /// Evict completed sessions, oldest first, until `bytes_needed` are freed.
    async fn prune_completed(
        &self,
        bytes_needed: u64,
        keep: &SessionId,
    ) -> Result<Vec<SessionId>, SessionStoreError> {
        let mut candidates: Vec<StoredSession> = self
            .stored_sessions()
            .await?
            .into_iter()
            .filter(|s| s.session.is_complete() && s.session.id() != keep)
            .collect();
        candidates.sort_by_key(|s| s.session.last_saved_at());

        let mut freed = 0_u64;
        let mut pruned = Vec::new();
        for stored in candidates {
            if freed >= bytes_needed {
                break;
            }
            self.kv.remove(&stored.key).await?;
            freed = freed.saturating_add(stored.bytes);
            pruned.push(stored.session.id().clone());
        }

        info!(pruned = pruned.len(), freed, bytes_needed, "quota prune pass finished");
        Ok(pruned)
    }

    async fn stored_sessions(&self) -> Result<Vec<StoredSession>, SessionStoreError> {
        let mut out = Vec::new();
        for key in self.kv.keys().await? {
            if !key.starts_with(self.key_prefix()) {
                continue;
            }
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match decode_session(&raw) {
                Ok(session) if key == self.key_for(session.id()) => out.push(StoredSession {
                    bytes: entry_size(&key, &raw),
                    key,
                    session,
                }),
                Ok(session) => warn!(
                    key = %key,
                    stored_id = %session.id(),
                    "skipping session record whose id does not match its key"
                ),
                Err(err) => warn!(key = %key, error = %err, "skipping corrupt session record"),
            }
        }
        Ok(out)
    }
}

/// Best-effort `lastSavedAt` of a raw record, without strict decoding.
pub(crate) fn loose_last_saved(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("lastSavedAt")? {
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&chrono::Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;
    use exam_core::model::{AnswerRecord, ParticipantId, QuestionId, SessionSource};
    use exam_core::time::{fixed_clock, fixed_now};

    fn build_session(id: &str, questions: usize) -> ExamSession {
        let ids: Vec<QuestionId> = (0..questions)
            .map(|i| QuestionId::new(format!("{id}-q{i}")))
            .collect();
        ExamSession::new(
            SessionId::new(id),
            ParticipantId::new("u1"),
            SessionSource::Questions { ids: ids.clone() },
            ids,
            fixed_now(),
        )
        .unwrap()
    }

    fn store(kv: InMemoryStore) -> SessionStore {
        SessionStore::new(Arc::new(kv), fixed_clock())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = store(InMemoryStore::new());
        let mut session = build_session("s1", 3);
        let first = session.question_ids()[0].clone();
        session
            .record_answer(AnswerRecord {
                question_id: first,
                selected_index: 2,
                correct: true,
                time_spent_ms: 4_000,
                answered_at: fixed_now(),
            })
            .unwrap();

        let outcome = store.save(&mut session).await.unwrap();
        assert!(outcome.pruned.is_empty());
        assert!(outcome.bytes > 0);

        let loaded = store.load(session.id()).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn missing_and_corrupt_sessions_load_as_none() {
        let kv = InMemoryStore::new();
        let store = store(kv.clone());
        assert!(store.load(&SessionId::new("nope")).await.unwrap().is_none());

        kv.set("exam:session:bad", "{{{ definitely not json").await.unwrap();
        assert!(store.load(&SessionId::new("bad")).await.unwrap().is_none());

        kv.set("exam:session:partial", r#"{"version":2,"id":"partial"}"#)
            .await
            .unwrap();
        assert!(store.load(&SessionId::new("partial")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_under_wrong_key_is_ignored() {
        let kv = InMemoryStore::new();
        let store = store(kv.clone());
        let mut session = build_session("real", 1);
        store.save(&mut session).await.unwrap();
        let raw = kv.get("exam:session:real").await.unwrap().unwrap();
        kv.set("exam:session:other", &raw).await.unwrap();

        assert!(store.load(&SessionId::new("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_session_existed() {
        let store = store(InMemoryStore::new());
        let mut session = build_session("s1", 1);
        store.save(&mut session).await.unwrap();

        assert!(store.delete(session.id()).await.unwrap());
        assert!(!store.delete(session.id()).await.unwrap());
        assert!(store.load(session.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_all_only_touches_session_namespace() {
        let kv = InMemoryStore::new();
        let store = store(kv.clone());
        kv.set("exam:settings", "{}").await.unwrap();
        for id in ["a", "b", "c"] {
            store.save(&mut build_session(id, 1)).await.unwrap();
        }

        assert_eq!(store.clear_all().await.unwrap(), 3);
        assert!(store.list_ids().await.unwrap().is_empty());
        assert!(kv.get("exam:settings").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn export_skips_corrupt_entries() {
        let kv = InMemoryStore::new();
        let store = store(kv.clone());
        store.save(&mut build_session("good", 2)).await.unwrap();
        kv.set("exam:session:broken", "nope").await.unwrap();

        let blob = store.export_all().await.unwrap();
        let doc: ExportDocument = serde_json::from_str(&blob).unwrap();
        assert_eq!(doc.format, EXPORT_FORMAT);
        assert_eq!(doc.version, RECORD_VERSION);
        assert_eq!(doc.sessions.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn loose_timestamp_reads_both_encodings() {
        assert_eq!(
            loose_last_saved(r#"{"lastSavedAt":"2023-11-14T22:13:20Z"}"#),
            Some(fixed_now())
        );
        assert_eq!(
            loose_last_saved(r#"{"lastSavedAt":1700000000000}"#),
            Some(fixed_now())
        );
        assert_eq!(loose_last_saved("garbage"), None);
    }
}
