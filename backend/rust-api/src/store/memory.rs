//! In-process store used by tests and `STORE_BACKEND=memory` local runs.
//!
//! A transaction holds the state mutex for its whole lifetime and works on a
//! private copy, so transactions are fully serialized and a dropped or aborted
//! transaction leaves no trace.
//!
//! `begin` copies the whole state, answer log included, so every submission
//! costs time proportional to the data held. Fine for tests and small local
//! runs; use MongoDB for anything bigger.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{ProgressStore, ProgressTransaction, StoreError, StoreResult};
use crate::models::progress::CompletedTask;
use crate::models::{Badge, Task, TaskQuestion, User, UserAnswer, UserBadge, UserTaskProgress};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<String, User>,
    tasks: BTreeMap<String, Task>,
    questions: BTreeMap<String, TaskQuestion>,
    progress: HashMap<(String, String), UserTaskProgress>,
    answers: Vec<UserAnswer>,
    badges: BTreeMap<String, Badge>,
    user_badges: Vec<UserBadge>,
}

impl MemoryState {
    fn completed_task_ids(&self, user_id: &str) -> HashSet<&str> {
        self.progress
            .values()
            .filter(|p| p.user_id == user_id && p.is_completed)
            .map(|p| p.task_id.as_str())
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_commits: Arc<AtomicBool>,
    conflict_commits: Arc<AtomicUsize>,
    fail_badge_grants: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id.clone(), user);
    }

    pub async fn insert_task(&self, task: Task) {
        self.state.lock().await.tasks.insert(task.id.clone(), task);
    }

    pub async fn insert_question(&self, question: TaskQuestion) {
        self.state
            .lock()
            .await
            .questions
            .insert(question.id.clone(), question);
    }

    pub async fn insert_progress(&self, progress: UserTaskProgress) {
        let key = (progress.user_id.clone(), progress.task_id.clone());
        self.state.lock().await.progress.insert(key, progress);
    }

    pub async fn progress(&self, user_id: &str, task_id: &str) -> Option<UserTaskProgress> {
        self.state
            .lock()
            .await
            .progress
            .get(&(user_id.to_string(), task_id.to_string()))
            .cloned()
    }

    pub async fn answers(&self, progress_id: &str) -> Vec<UserAnswer> {
        self.state
            .lock()
            .await
            .answers
            .iter()
            .filter(|a| a.progress_id == progress_id)
            .cloned()
            .collect()
    }

    pub async fn user_badges(&self, user_id: &str) -> Vec<UserBadge> {
        self.state
            .lock()
            .await
            .user_badges
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Make every subsequent commit fail as if the backend went away.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `count` commits with a write conflict.
    pub fn set_conflict_commits(&self, count: usize) {
        self.conflict_commits.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_badge_grants(&self, fail: bool) {
        self.fail_badge_grants.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn ProgressTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
            conflict_commits: self.conflict_commits.clone(),
        }))
    }

    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn find_question(&self, question_id: &str) -> StoreResult<Option<TaskQuestion>> {
        Ok(self.state.lock().await.questions.get(question_id).cloned())
    }

    async fn user_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.state.lock().await.users.keys().cloned().collect())
    }

    async fn completion_history(&self, user_id: &str) -> StoreResult<Vec<CompletedTask>> {
        let state = self.state.lock().await;
        let mut history: Vec<CompletedTask> = state
            .progress
            .values()
            .filter(|p| p.user_id == user_id && p.is_completed)
            .filter_map(|p| {
                state.tasks.get(&p.task_id).map(|task| CompletedTask {
                    task_id: task.id.clone(),
                    language: task.language.clone(),
                    task_type: task.task_type,
                    completed_at: p.completed_at,
                })
            })
            .collect();
        history.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(history)
    }

    async fn unfinished_tasks(&self, user_id: &str) -> StoreResult<Vec<Task>> {
        let state = self.state.lock().await;
        let completed = state.completed_task_ids(user_id);
        Ok(state
            .tasks
            .values()
            .filter(|t| t.is_active && !completed.contains(t.id.as_str()))
            .cloned()
            .collect())
    }

    async fn count_completed(&self, user_id: &str) -> StoreResult<u64> {
        Ok(self.state.lock().await.completed_task_ids(user_id).len() as u64)
    }

    async fn list_badges(&self) -> StoreResult<Vec<Badge>> {
        Ok(self.state.lock().await.badges.values().cloned().collect())
    }

    async fn granted_badge_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .user_badges
            .iter()
            .filter(|b| b.user_id == user_id)
            .map(|b| b.badge_id.clone())
            .collect())
    }

    async fn grant_badge(
        &self,
        user_id: &str,
        badge_id: &str,
        achieved_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if self.fail_badge_grants.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("badge grants disabled".to_string()));
        }
        let mut state = self.state.lock().await;
        if state
            .user_badges
            .iter()
            .any(|b| b.user_id == user_id && b.badge_id == badge_id)
        {
            return Ok(false);
        }
        state.user_badges.push(UserBadge {
            user_id: user_id.to_string(),
            badge_id: badge_id.to_string(),
            achieved_at,
        });
        Ok(true)
    }

    async fn ensure_badge(&self, name: &str, description: &str) -> StoreResult<Badge> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.badges.values().find(|b| b.name == name) {
            return Ok(existing.clone());
        }
        let badge = Badge {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
        };
        state.badges.insert(badge.id.clone(), badge.clone());
        Ok(badge)
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_commit: bool,
    conflict_commits: Arc<AtomicUsize>,
}

#[async_trait]
impl ProgressTransaction for MemoryTransaction {
    async fn find_task(&mut self, task_id: &str) -> StoreResult<Option<Task>> {
        Ok(self.working.tasks.get(task_id).cloned())
    }

    async fn find_question(&mut self, question_id: &str) -> StoreResult<Option<TaskQuestion>> {
        Ok(self.working.questions.get(question_id).cloned())
    }

    async fn find_user(&mut self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(user_id).cloned())
    }

    async fn lock_progress(
        &mut self,
        user_id: &str,
        task_id: &str,
    ) -> StoreResult<UserTaskProgress> {
        let row = self
            .working
            .progress
            .entry((user_id.to_string(), task_id.to_string()))
            .or_insert_with(|| UserTaskProgress::new(user_id, task_id));
        Ok(row.clone())
    }

    async fn lock_user(&mut self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(user_id).cloned())
    }

    async fn insert_answer(&mut self, answer: &UserAnswer) -> StoreResult<()> {
        self.working.answers.push(answer.clone());
        Ok(())
    }

    async fn count_questions(&mut self, task_id: &str) -> StoreResult<u64> {
        Ok(self
            .working
            .questions
            .values()
            .filter(|q| q.task_id == task_id)
            .count() as u64)
    }

    async fn count_correct_questions(&mut self, progress_id: &str) -> StoreResult<u64> {
        let distinct: HashSet<&str> = self
            .working
            .answers
            .iter()
            .filter(|a| a.progress_id == progress_id && a.is_correct)
            .map(|a| a.question_id.as_str())
            .collect();
        Ok(distinct.len() as u64)
    }

    async fn save_progress(&mut self, progress: &UserTaskProgress) -> StoreResult<()> {
        self.working.progress.insert(
            (progress.user_id.clone(), progress.task_id.clone()),
            progress.clone(),
        );
        Ok(())
    }

    async fn save_user(&mut self, user: &User) -> StoreResult<()> {
        match self.working.users.get_mut(&user.id) {
            Some(existing) => {
                existing.level = user.level;
                existing.xp = user.xp;
                existing.points = user.points;
                existing.streak_count = user.streak_count;
                existing.last_active_date = user.last_active_date;
            }
            None => {
                self.working.users.insert(user.id.clone(), user.clone());
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            mut guard,
            working,
            fail_commit,
            conflict_commits,
        } = *self;
        if fail_commit {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }
        if conflict_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict("write conflict".to_string()));
        }
        *guard = working;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
