use serde::{Deserialize, Serialize};

use super::task::{Difficulty, Task, TaskType};

/// A candidate task with its composite desirability score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTask {
    pub task: Task,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendedTask {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub language: String,
    pub difficulty: Difficulty,
    pub points: u32,
    pub xp: u32,
    pub score: f64,
}

impl From<ScoredTask> for RecommendedTask {
    fn from(scored: ScoredTask) -> Self {
        let ScoredTask { task, score } = scored;
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            task_type: task.task_type,
            language: task.language,
            difficulty: task.difficulty,
            points: task.points,
            xp: task.xp,
            score,
        }
    }
}
