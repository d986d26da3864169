use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::ParticipantId;

pub const DEFAULT_METRICS_CAPACITY: usize = 50;
pub const DEFAULT_SLOW_OPERATION_MS: u64 = 1_000;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_MAX_COMPLETED_SESSIONS: u32 = 20;

/// Engine configuration passed explicitly into every entry point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ExamSettingsDraft", into = "ExamSettingsDraft")]
pub struct ExamSettings {
    participant: Option<ParticipantId>,
    shuffle_options: bool,
    strict_exam_size: bool,
    metrics_capacity: usize,
    slow_operation_ms: u64,
    retention_days: u32,
    max_completed_sessions: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExamSettingsDraft {
    pub participant: Option<String>,
    pub shuffle_options: bool,
    pub strict_exam_size: bool,
    pub metrics_capacity: usize,
    pub slow_operation_ms: u64,
    pub retention_days: u32,
    pub max_completed_sessions: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("metrics capacity must be at least 1")]
    ZeroMetricsCapacity,
    #[error("slow operation threshold must be positive")]
    ZeroSlowThreshold,
}

impl Default for ExamSettingsDraft {
    fn default() -> Self {
        Self {
            participant: None,
            shuffle_options: true,
            strict_exam_size: false,
            metrics_capacity: DEFAULT_METRICS_CAPACITY,
            slow_operation_ms: DEFAULT_SLOW_OPERATION_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_completed_sessions: DEFAULT_MAX_COMPLETED_SESSIONS,
        }
    }
}

impl ExamSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize the draft.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the metrics capacity or slow threshold is zero.
    pub fn validate(self) -> Result<ExamSettings, SettingsError> {
        if self.metrics_capacity == 0 {
            return Err(SettingsError::ZeroMetricsCapacity);
        }
        if self.slow_operation_ms == 0 {
            return Err(SettingsError::ZeroSlowThreshold);
        }

        let participant = self
            .participant
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(ParticipantId::new);

        Ok(ExamSettings {
            participant,
            shuffle_options: self.shuffle_options,
            strict_exam_size: self.strict_exam_size,
            metrics_capacity: self.metrics_capacity,
            slow_operation_ms: self.slow_operation_ms,
            retention_days: self.retention_days,
            max_completed_sessions: self.max_completed_sessions,
        })
    }
}

impl From<ExamSettings> for ExamSettingsDraft {
    fn from(s: ExamSettings) -> Self {
        Self {
            participant: s.participant.map(|p| p.as_str().to_owned()),
            shuffle_options: s.shuffle_options,
            strict_exam_size: s.strict_exam_size,
            metrics_capacity: s.metrics_capacity,
            slow_operation_ms: s.slow_operation_ms,
            retention_days: s.retention_days,
            max_completed_sessions: s.max_completed_sessions,
        }
    }
}

impl TryFrom<ExamSettingsDraft> for ExamSettings {
    type Error = SettingsError;

    fn try_from(draft: ExamSettingsDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            participant: None,
            shuffle_options: true,
            strict_exam_size: false,
            metrics_capacity: DEFAULT_METRICS_CAPACITY,
            slow_operation_ms: DEFAULT_SLOW_OPERATION_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_completed_sessions: DEFAULT_MAX_COMPLETED_SESSIONS,
        }
    }
}

impl ExamSettings {
    /// Participant identity, or the anonymous sentinel when none is configured.
    #[must_use]
    pub fn participant(&self) -> ParticipantId {
        self.participant.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn shuffle_options(&self) -> bool {
        self.shuffle_options
    }

    #[must_use]
    pub fn strict_exam_size(&self) -> bool {
        self.strict_exam_size
    }

    #[must_use]
    pub fn metrics_capacity(&self) -> usize {
        self.metrics_capacity
    }

    #[must_use]
    pub fn slow_operation_ms(&self) -> u64 {
        self.slow_operation_ms
    }

    #[must_use]
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    #[must_use]
    pub fn max_completed_sessions(&self) -> u32 {
        self.max_completed_sessions
    }

    /// Editable copy of these settings.
    #[must_use]
    pub fn to_draft(&self) -> ExamSettingsDraft {
        self.clone().into()
    }
}
