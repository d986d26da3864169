use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use exam_core::model::{Category, Question, QuestionId};

use crate::error::ContentError;

/// Narrow read interface to the hosted question repository.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// All questions filed under a category.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` if the repository cannot be reached.
    async fn fetch_questions_by_category(
        &self,
        category: &Category,
    ) -> Result<Vec<Question>, ContentError>;

    /// Questions for the given ids, in request order; unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` if the repository cannot be reached.
    async fn fetch_questions_by_ids(
        &self,
        ids: &[QuestionId],
    ) -> Result<Vec<Question>, ContentError>;
}

/// Fixed in-memory question bank, for tests and offline use.
///
/// A question belongs to a category when the category names its type, its
/// difficulty, or its topic.
#[derive(Clone, Default)]
pub struct InMemoryQuestionBank {
    questions: Arc<Vec<Question>>,
    by_id: Arc<HashMap<QuestionId, usize>>,
}

impl InMemoryQuestionBank {
    #[must_use]
    pub fn new(questions: Vec<Question>) -> Self {
        let by_id = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id().clone(), i))
            .collect();
        Self {
            questions: Arc::new(questions),
            by_id: Arc::new(by_id),
        }
    }

    fn matches(question: &Question, category: &Category) -> bool {
        let key = category.as_str();
        question.question_type().as_str() == key
            || question.difficulty().as_str() == key
            || question.topic() == Some(key)
    }
}

#[async_trait]
impl QuestionRepository for InMemoryQuestionBank {
    async fn fetch_questions_by_category(
        &self,
        category: &Category,
    ) -> Result<Vec<Question>, ContentError> {
        Ok(self
            .questions
            .iter()
            .filter(|q| Self::matches(q, category))
            .cloned()
            .collect())
    }

    async fn fetch_questions_by_ids(
        &self,
        ids: &[QuestionId],
    ) -> Result<Vec<Question>, ContentError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|&i| self.questions[i].clone()))
            .collect())
    }
}
