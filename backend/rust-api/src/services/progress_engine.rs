//! Answer submission: attempt log, per-task progress and completion rewards,
//! all inside one store transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::answer_evaluator::answers_match;
use super::badge_worker::BadgeQueue;
use super::rewards::{RewardPolicy, RewardSummary};
use crate::error::EngineError;
use crate::metrics::{record_answer, LEVEL_UPS_TOTAL, SUBMISSION_RETRIES_TOTAL, TASKS_COMPLETED_TOTAL};
use crate::models::{User, UserAnswer};
use crate::store::{ProgressStore, ProgressTransaction};
use crate::utils::retry::{retry_async_when, RetryConfig};

#[derive(Debug, Clone)]
pub struct AnswerSubmission {
    pub user_id: String,
    pub task_id: String,
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub is_correct: bool,
    pub is_completed: bool,
    /// Completion percentage after this submission
    pub progress: f64,
    /// Present only on the submission that completed the task
    pub updated_user: Option<User>,
    pub reward: Option<RewardSummary>,
}

pub fn completion_percent(correct: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (correct.min(total) as f64 / total as f64) * 100.0
}

pub struct ProgressEngine {
    store: Arc<dyn ProgressStore>,
    rewards: RewardPolicy,
    badges: Option<BadgeQueue>,
    retry: RetryConfig,
}

impl ProgressEngine {
    pub fn new(store: Arc<dyn ProgressStore>, rewards: RewardPolicy) -> Self {
        Self {
            store,
            rewards,
            badges: None,
            retry: RetryConfig::default(),
        }
    }

    /// Completions enqueue badge evaluation here once their transaction commits.
    pub fn with_badge_queue(mut self, queue: BadgeQueue) -> Self {
        self.badges = Some(queue);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn rewards(&self) -> &RewardPolicy {
        &self.rewards
    }

    pub async fn submit_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SubmitOutcome, EngineError> {
        tracing::info!(
            "Processing answer submission: user={}, task={}, question={}",
            submission.user_id,
            submission.task_id,
            submission.question_id
        );

        let mut attempt = 0u32;
        let result = retry_async_when(self.retry.clone(), EngineError::is_transient, || {
            attempt += 1;
            if attempt > 1 {
                SUBMISSION_RETRIES_TOTAL.inc();
                tracing::warn!(
                    "Retrying submission after write conflict: user={}, task={}, attempt={}",
                    submission.user_id,
                    submission.task_id,
                    attempt
                );
            }
            self.submit_once(submission)
        })
        .await;

        match &result {
            Ok(outcome) => {
                record_answer(outcome.is_correct);
                if outcome.is_completed {
                    TASKS_COMPLETED_TOTAL.inc();
                    if outcome.reward.as_ref().is_some_and(RewardSummary::leveled_up) {
                        LEVEL_UPS_TOTAL.inc();
                    }
                    // Only reached after commit; never awaited.
                    if let Some(queue) = &self.badges {
                        queue.enqueue(&submission.user_id);
                    }
                }
                tracing::info!(
                    "Answer processed: user={}, task={}, correct={}, completed={}, progress={:.1}",
                    submission.user_id,
                    submission.task_id,
                    outcome.is_correct,
                    outcome.is_completed,
                    outcome.progress
                );
            }
            Err(EngineError::Storage(e)) => {
                tracing::error!(
                    "Could not save answer attempt: user={}, task={}, error={}",
                    submission.user_id,
                    submission.task_id,
                    e
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Answer rejected: user={}, task={}, reason={}",
                    submission.user_id,
                    submission.task_id,
                    e
                );
            }
        }

        result
    }

    async fn submit_once(&self, submission: &AnswerSubmission) -> Result<SubmitOutcome, EngineError> {
        let mut tx = self.store.begin().await?;

        match self.apply(tx.as_mut(), submission, Utc::now()).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort().await {
                    tracing::warn!("Failed to abort submission transaction: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn ProgressTransaction,
        submission: &AnswerSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, EngineError> {
        let AnswerSubmission {
            user_id,
            task_id,
            question_id,
            answer,
        } = submission;

        let task = tx
            .find_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        let question = tx
            .find_question(question_id)
            .await?
            .filter(|q| q.task_id == task.id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;
        if tx.find_user(user_id).await?.is_none() {
            return Err(EngineError::not_found("user", user_id));
        }

        let mut progress = tx.lock_progress(user_id, task_id).await?;
        if progress.is_completed {
            return Err(EngineError::AlreadyCompleted {
                user_id: user_id.clone(),
                task_id: task_id.clone(),
            });
        }

        let is_correct = answers_match(answer, &question.correct_answer);
        tx.insert_answer(&UserAnswer {
            id: Uuid::new_v4().to_string(),
            progress_id: progress.id.clone(),
            question_id: question.id.clone(),
            answer_given: answer.clone(),
            is_correct,
            submitted_at: now,
        })
        .await?;

        progress.attempts += 1;
        if !is_correct {
            progress.mistakes += 1;
        }

        let total = tx.count_questions(&task.id).await?;
        let correct = tx.count_correct_questions(&progress.id).await?;
        progress.progress = completion_percent(correct, total);

        if !is_correct || total == 0 || correct < total {
            tx.save_progress(&progress).await?;
            return Ok(SubmitOutcome {
                is_correct,
                is_completed: false,
                progress: progress.progress,
                updated_user: None,
                reward: None,
            });
        }

        progress.is_completed = true;
        progress.completed_at = Some(now);
        progress.progress = 100.0;
        tx.save_progress(&progress).await?;

        let mut user = tx
            .lock_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", user_id))?;
        let reward = self.rewards.apply_completion(&mut user, &task, now);
        tx.save_user(&user).await?;

        tracing::info!(
            "Task completed: user={}, task={}, xp_gained={}, level={}->{}, streak={} ({})",
            user_id,
            task_id,
            reward.xp_gained,
            reward.previous_level,
            reward.new_level,
            user.streak_count,
            reward.streak.as_str()
        );

        Ok(SubmitOutcome {
            is_correct: true,
            is_completed: true,
            progress: 100.0,
            updated_user: Some(user),
            reward: Some(reward),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_percent_is_bounded() {
        assert_eq!(completion_percent(0, 3), 0.0);
        assert!((completion_percent(1, 3) - 33.333).abs() < 0.01);
        assert_eq!(completion_percent(3, 3), 100.0);
        assert_eq!(completion_percent(5, 3), 100.0);
        assert_eq!(completion_percent(1, 0), 0.0);
    }
}
