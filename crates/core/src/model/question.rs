use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question id must not be blank")]
    BlankId,

    #[error("correct answer index {index} is out of range for {len} options")]
    CorrectAnswerOutOfRange { index: usize, len: usize },

    #[error("unknown question type: {0}")]
    UnknownType(String),

    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),
}

//
// ─── TAGS ──────────────────────────────────────────────────────────────────────
//

/// Closed set of question kinds served by the content repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    SentenceCompletion,
    Restatement,
    ReadingComprehension,
    Vocabulary,
    ListeningComprehension,
    WordFormation,
    GrammarInContext,
}

impl QuestionType {
    pub const ALL: [QuestionType; 7] = [
        QuestionType::SentenceCompletion,
        QuestionType::Restatement,
        QuestionType::ReadingComprehension,
        QuestionType::Vocabulary,
        QuestionType::ListeningComprehension,
        QuestionType::WordFormation,
        QuestionType::GrammarInContext,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::SentenceCompletion => "sentence-completion",
            QuestionType::Restatement => "restatement",
            QuestionType::ReadingComprehension => "reading-comprehension",
            QuestionType::Vocabulary => "vocabulary",
            QuestionType::ListeningComprehension => "listening-comprehension",
            QuestionType::WordFormation => "word-formation",
            QuestionType::GrammarInContext => "grammar-in-context",
        }
    }

    /// Parses the kebab-case tag used by the content repository.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::UnknownType` for tags outside the closed set.
    pub fn parse(tag: &str) -> Result<Self, QuestionError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| QuestionError::UnknownType(tag.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// # Errors
    ///
    /// Returns `QuestionError::UnknownDifficulty` for anything but easy/medium/hard.
    pub fn parse(tag: &str) -> Result<Self, QuestionError> {
        match tag {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(QuestionError::UnknownDifficulty(other.to_owned())),
        }
    }
}

/// Key a session policy distributes questions over.
///
/// Usually a question type or a difficulty tag, but topic ids from the content
/// repository are accepted as well.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<QuestionType> for Category {
    fn from(value: QuestionType) -> Self {
        Self(value.as_str().to_owned())
    }
}

impl From<Difficulty> for Category {
    fn from(value: Difficulty) -> Self {
        Self(value.as_str().to_owned())
    }
}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Category({})", self.0)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// Unvalidated question as delivered by the content repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub id: QuestionId,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub correct_answer: usize,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passage_id: Option<String>,
}

impl QuestionDraft {
    /// # Errors
    ///
    /// Returns `QuestionError` if the id is blank or the correct index does not
    /// point at an option. A question without options carries no answer and is
    /// accepted as-is.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.id.as_str().trim().is_empty() {
            return Err(QuestionError::BlankId);
        }
        if !self.options.is_empty() && self.correct_answer >= self.options.len() {
            return Err(QuestionError::CorrectAnswerOutOfRange {
                index: self.correct_answer,
                len: self.options.len(),
            });
        }

        Ok(Question {
            id: self.id,
            question_type: self.question_type,
            options: self.options,
            correct_answer: self.correct_answer,
            difficulty: self.difficulty,
            topic: self.topic,
            passage_id: self.passage_id,
        })
    }
}

/// Immutable content unit served to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuestionDraft", into = "QuestionDraft")]
pub struct Question {
    id: QuestionId,
    question_type: QuestionType,
    options: Vec<String>,
    correct_answer: usize,
    difficulty: Difficulty,
    topic: Option<String>,
    passage_id: Option<String>,
}

impl TryFrom<QuestionDraft> for Question {
    type Error = QuestionError;

    fn try_from(draft: QuestionDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl From<Question> for QuestionDraft {
    fn from(q: Question) -> Self {
        Self {
            id: q.id,
            question_type: q.question_type,
            options: q.options,
            correct_answer: q.correct_answer,
            difficulty: q.difficulty,
            topic: q.topic,
            passage_id: q.passage_id,
        }
    }
}

impl Question {
    /// Convenience constructor for a question without topic or passage.
    ///
    /// # Errors
    ///
    /// See [`QuestionDraft::validate`].
    pub fn new(
        id: QuestionId,
        question_type: QuestionType,
        options: Vec<String>,
        correct_answer: usize,
        difficulty: Difficulty,
    ) -> Result<Self, QuestionError> {
        QuestionDraft {
            id,
            question_type,
            options,
            correct_answer,
            difficulty,
            topic: None,
            passage_id: None,
        }
        .validate()
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_passage(mut self, passage_id: impl Into<String>) -> Self {
        self.passage_id = Some(passage_id.into());
        self
    }

    /// Same question with its options replaced by a reordering of the originals.
    pub(crate) fn reordered(&self, options: Vec<String>, correct_answer: usize) -> Self {
        Self {
            options,
            correct_answer,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.id
    }

    #[must_use]
    pub fn question_type(&self) -> QuestionType {
        self.question_type
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_answer(&self) -> usize {
        self.correct_answer
    }

    /// Text of the correct option, if the question has any options.
    #[must_use]
    pub fn correct_text(&self) -> Option<&str> {
        self.options.get(self.correct_answer).map(String::as_str)
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    #[must_use]
    pub fn passage_id(&self) -> Option<&str> {
        self.passage_id.as_deref()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn rejects_out_of_range_correct_answer() {
        let err = Question::new(
            QuestionId::new("q1"),
            QuestionType::Vocabulary,
            opts(&["A", "B"]),
            2,
            Difficulty::Easy,
        )
        .unwrap_err();

        assert_eq!(err, QuestionError::CorrectAnswerOutOfRange { index: 2, len: 2 });
    }

    #[test]
    fn accepts_question_without_options() {
        let q = Question::new(
            QuestionId::new("q1"),
            QuestionType::ReadingComprehension,
            Vec::new(),
            0,
            Difficulty::Hard,
        )
        .unwrap();

        assert!(q.correct_text().is_none());
    }

    #[test]
    fn rejects_blank_id() {
        let err = Question::new(
            QuestionId::new("  "),
            QuestionType::Vocabulary,
            opts(&["A"]),
            0,
            Difficulty::Easy,
        )
        .unwrap_err();

        assert_eq!(err, QuestionError::BlankId);
    }

    #[test]
    fn deserializes_repository_json_and_validates() {
        let json = r#"{
            "id": "q9",
            "type": "grammar-in-context",
            "options": ["is", "are", "be"],
            "correctAnswer": 1,
            "difficulty": "medium",
            "passageId": "p3"
        }"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.question_type(), QuestionType::GrammarInContext);
        assert_eq!(q.correct_text(), Some("are"));
        assert_eq!(q.passage_id(), Some("p3"));

        let bad = json.replace("\"correctAnswer\": 1", "\"correctAnswer\": 7");
        assert!(serde_json::from_str::<Question>(&bad).is_err());
    }

    #[test]
    fn type_tags_round_trip_through_parse() {
        for t in QuestionType::ALL {
            assert_eq!(QuestionType::parse(t.as_str()).unwrap(), t);
        }
        assert!(QuestionType::parse("essay").is_err());
    }

    #[test]
    fn difficulty_tags_parse() {
        assert_eq!(Difficulty::parse("hard").unwrap(), Difficulty::Hard);
        assert!(matches!(
            Difficulty::parse("extreme"),
            Err(QuestionError::UnknownDifficulty(_))
        ));
    }

    #[test]
    fn builder_attaches_topic_and_passage() {
        let q = Question::new(
            QuestionId::new("q4"),
            QuestionType::ReadingComprehension,
            opts(&["A", "B"]),
            0,
            Difficulty::Medium,
        )
        .unwrap()
        .with_topic("ecology")
        .with_passage("p1");

        assert_eq!(q.topic(), Some("ecology"));
        assert_eq!(q.passage_id(), Some("p1"));
        let json = serde_json::to_string(&q).unwrap();
        assert!(json.contains("\"passageId\":\"p1\""));
    }

    #[test]
    fn category_from_tags() {
        assert_eq!(Category::from(Difficulty::Hard).as_str(), "hard");
        assert_eq!(
            Category::from(QuestionType::WordFormation).as_str(),
            "word-formation"
        );
    }
}
