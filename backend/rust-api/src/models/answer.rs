use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::UserStats;
use crate::services::rewards::{LevelProgress, StreakChange};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 64, message = "taskId is required"))]
    pub task_id: String,
    #[validate(length(min = 1, max = 64, message = "questionId is required"))]
    pub question_id: String,
    #[validate(length(min = 1, max = 1000, message = "answer must be 1-1000 characters"))]
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_user: Option<UserStats>,
    #[serde(default)]
    pub leveled_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_progress: Option<LevelProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak_change: Option<StreakChange>,
}
