use serde::{Deserialize, Serialize};

/// Task difficulty. Ordinals drive recommendation scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn ordinal(self) -> u8 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Quiz,
    FillBlank,
}

/// Catalog entry stored in the "tasks" collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub language: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub xp: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Question stored in "task_questions". `correct_answer` never leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub question_text: String,
    pub correct_answer: String,
}
