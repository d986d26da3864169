#![forbid(unsafe_code)]

pub mod content;
pub mod error;
pub mod sessions;
pub mod settings_service;
pub mod telemetry;

pub use exam_core::Clock;

pub use content::{InMemoryQuestionBank, QuestionRepository};
pub use error::{ContentError, SessionError, SettingsServiceError};
pub use sessions::{
    AnswerOutcome, Assembly, Deficiency, ExamSessionService, SessionAssembler, StartedSession,
};
pub use settings_service::{ExamSettingsService, SETTINGS_KEY};
pub use telemetry::{METRICS_KEY, MetricsBuffer, OperationSummary, StorageTelemetry};
