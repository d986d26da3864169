mod assembler;
mod service;

pub use crate::error::SessionError;
pub use assembler::{Assembly, Deficiency, SessionAssembler};
pub use service::{AnswerOutcome, ExamSessionService, StartedSession};
