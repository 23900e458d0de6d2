//! Ranks a user's unfinished tasks by a weighted multi-factor score.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::metrics::RECOMMENDATIONS_SERVED_TOTAL;
use crate::models::progress::CompletedTask;
use crate::models::recommendation::ScoredTask;
use crate::models::{Difficulty, Task, TaskType};
use crate::store::{ProgressStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub difficulty: f64,
    pub affinity: f64,
    pub streak: f64,
    pub variety: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            difficulty: 0.4,
            affinity: 0.3,
            streak: 0.2,
            variety: 0.1,
        }
    }
}

pub const DEFAULT_AFFINITY: f64 = 0.2;

/// Share of completed tasks per language.
pub fn language_affinity(history: &[CompletedTask]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for completed in history {
        *counts.entry(completed.language.clone()).or_default() += 1;
    }

    let total = history.len() as f64;
    counts
        .into_iter()
        .map(|(language, count)| (language, f64::from(count) / total))
        .collect()
}

/// Type of the most recent completion. History is ordered oldest first.
pub fn last_task_type(history: &[CompletedTask]) -> Option<TaskType> {
    history.last().map(|completed| completed.task_type)
}

fn target_difficulty(level: u32) -> u8 {
    match level {
        0..=2 => 1,
        3..=4 => 2,
        _ => 3,
    }
}

pub fn difficulty_fit(level: u32, difficulty: Difficulty) -> f64 {
    match difficulty.ordinal().abs_diff(target_difficulty(level)) {
        0 => 1.0,
        1 => 0.5,
        _ => 0.1,
    }
}

pub fn streak_modifier(streak: u32, difficulty: Difficulty) -> f64 {
    if streak > 5 {
        match difficulty {
            Difficulty::Hard => 1.0,
            Difficulty::Medium => 0.7,
            Difficulty::Easy => 0.3,
        }
    } else if streak < 3 {
        match difficulty {
            Difficulty::Easy => 1.0,
            Difficulty::Medium => 0.5,
            Difficulty::Hard => 0.0,
        }
    } else {
        0.5
    }
}

pub fn variety(last_type: Option<TaskType>, task_type: TaskType) -> f64 {
    if last_type == Some(task_type) {
        0.0
    } else {
        1.0
    }
}

/// Inputs that do not change between candidates
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub level: u32,
    pub streak: u32,
    pub affinity: HashMap<String, f64>,
    pub last_type: Option<TaskType>,
}

impl ScoringContext {
    pub fn new(level: u32, streak: u32, history: &[CompletedTask]) -> Self {
        Self {
            level,
            streak,
            affinity: language_affinity(history),
            last_type: last_task_type(history),
        }
    }
}

pub fn score_task(
    task: &Task,
    ctx: &ScoringContext,
    weights: &ScoringWeights,
    default_affinity: f64,
) -> f64 {
    let affinity = ctx
        .affinity
        .get(&task.language)
        .copied()
        .unwrap_or(default_affinity);

    weights.difficulty * difficulty_fit(ctx.level, task.difficulty)
        + weights.affinity * affinity
        + weights.streak * streak_modifier(ctx.streak, task.difficulty)
        + weights.variety * variety(ctx.last_type, task.task_type)
}

/// Highest score first; equal scores fall back to task id ascending.
pub fn rank(
    candidates: Vec<Task>,
    ctx: &ScoringContext,
    weights: &ScoringWeights,
    default_affinity: f64,
) -> Vec<ScoredTask> {
    let mut scored: Vec<ScoredTask> = candidates
        .into_iter()
        .map(|task| {
            let score = score_task(&task, ctx, weights, default_affinity);
            ScoredTask { task, score }
        })
        .collect();

    scored.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.task.id.cmp(&b.task.id),
        other => other,
    });
    scored
}

pub struct RecommendationService {
    store: Arc<dyn ProgressStore>,
    weights: ScoringWeights,
    default_affinity: f64,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn ProgressStore>, weights: ScoringWeights, default_affinity: f64) -> Self {
        Self {
            store,
            weights,
            default_affinity,
        }
    }

    /// Read-only; every call works from a fresh snapshot of the store.
    pub async fn recommend(&self, user_id: &str) -> Result<Vec<ScoredTask>, EngineError> {
        let result = self.recommend_inner(user_id).await;
        let status = match &result {
            Ok(_) => "success",
            Err(EngineError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        RECOMMENDATIONS_SERVED_TOTAL.with_label_values(&[status]).inc();

        if let Err(EngineError::Storage(e)) = &result {
            tracing::error!("Recommendation engine failure: user={}, error={}", user_id, e);
        }
        result
    }

    async fn recommend_inner(&self, user_id: &str) -> Result<Vec<ScoredTask>, EngineError> {
        let profile = async {
            let user = self.store.find_user(user_id).await?;
            let history = self.store.completion_history(user_id).await?;
            StoreResult::Ok((user, history))
        };
        let candidates = self.store.unfinished_tasks(user_id);

        let ((user, history), candidates) = tokio::try_join!(profile, candidates)?;
        let user = user.ok_or_else(|| EngineError::not_found("user", user_id))?;

        let ctx = ScoringContext::new(user.level, user.streak_count, &history);
        let ranked = rank(candidates, &ctx, &self.weights, self.default_affinity);

        tracing::debug!(
            "Ranked {} candidate tasks for user {} (level={}, streak={}, history={})",
            ranked.len(),
            user_id,
            user.level,
            user.streak_count,
            history.len()
        );
        Ok(ranked)
    }
}
