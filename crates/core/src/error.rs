use thiserror::Error;

use crate::model::{PolicyError, QuestionError, SessionStateError, SettingsError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Session(#[from] SessionStateError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_convert_transparently() {
        let err: Error = PolicyError::Empty.into();
        assert!(matches!(err, Error::Policy(PolicyError::Empty)));
        assert_eq!(err.to_string(), "policy requests no questions");
    }
}
