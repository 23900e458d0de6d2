use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per (user, task) progress row, stored in "user_task_progress".
/// Unique on (user_id, task_id); terminal once `is_completed` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTaskProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub mistakes: u32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UserTaskProgress {
    pub fn new(user_id: &str, task_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
            progress: 0.0,
            attempts: 0,
            mistakes: 0,
            is_completed: false,
            completed_at: None,
        }
    }
}

/// Append-only submission log entry, stored in "user_answers"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAnswer {
    #[serde(rename = "_id")]
    pub id: String,
    pub progress_id: String,
    pub question_id: String,
    pub answer_given: String,
    pub is_correct: bool,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,
}

/// A completed task as seen by the recommendation scorer
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTask {
    pub task_id: String,
    pub language: String,
    pub task_type: super::TaskType,
    pub completed_at: Option<DateTime<Utc>>,
}
