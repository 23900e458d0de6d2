use std::sync::Arc;

use crate::error::EngineError;
use crate::store::ProgressStore;

/// Case-insensitive comparison after trimming surrounding whitespace.
/// Exact match only: no partial credit and no numeric tolerance.
pub fn answers_match(given: &str, canonical: &str) -> bool {
    let given = given.trim();
    let canonical = canonical.trim();
    given == canonical || given.to_lowercase() == canonical.to_lowercase()
}

pub struct AnswerEvaluator {
    store: Arc<dyn ProgressStore>,
}

impl AnswerEvaluator {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub async fn evaluate(&self, question_id: &str, answer_given: &str) -> Result<bool, EngineError> {
        let question = self
            .store
            .find_question(question_id)
            .await?
            .ok_or_else(|| EngineError::not_found("question", question_id))?;

        Ok(answers_match(answer_given, &question.correct_answer))
    }
}
