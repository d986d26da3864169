mod ids;
mod metric;
mod policy;
mod question;
mod session;
mod settings;

pub use ids::{ParseIdError, ParticipantId, QuestionId, SessionId};
pub use metric::{StorageMetric, StorageOperation};
pub use policy::{PolicyError, SessionPolicy};
pub use question::{Category, Difficulty, Question, QuestionDraft, QuestionError, QuestionType};
pub use session::{AnswerRecord, ExamSession, SessionSource, SessionStateError};
pub use settings::{
    DEFAULT_MAX_COMPLETED_SESSIONS, DEFAULT_METRICS_CAPACITY, DEFAULT_RETENTION_DAYS,
    DEFAULT_SLOW_OPERATION_MS, ExamSettings, ExamSettingsDraft, SettingsError,
};
