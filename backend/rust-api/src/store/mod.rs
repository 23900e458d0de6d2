//! Storage seam for the progress engine.
//!
//! `ProgressStore` exposes committed-state reads plus `begin()`, which opens a
//! `ProgressTransaction`. Everything written through a transaction becomes
//! visible atomically on `commit()` or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{Config, StoreBackend};

use crate::models::progress::CompletedTask;
use crate::models::{Badge, Task, TaskQuestion, User, UserAnswer, UserTaskProgress};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction touched the same rows; retrying is safe.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed record: {0}")]
    Decode(String),

    #[error(transparent)]
    Backend(mongodb::error::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Backend name for health reporting
    fn name(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    async fn begin(&self) -> StoreResult<Box<dyn ProgressTransaction>>;

    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    async fn find_question(&self, question_id: &str) -> StoreResult<Option<TaskQuestion>>;

    async fn user_ids(&self) -> StoreResult<Vec<String>>;

    /// Completed tasks of a user, oldest completion first.
    async fn completion_history(&self, user_id: &str) -> StoreResult<Vec<CompletedTask>>;

    /// Active tasks the user has not completed.
    async fn unfinished_tasks(&self, user_id: &str) -> StoreResult<Vec<Task>>;

    async fn count_completed(&self, user_id: &str) -> StoreResult<u64>;

    async fn list_badges(&self) -> StoreResult<Vec<Badge>>;

    async fn granted_badge_ids(&self, user_id: &str) -> StoreResult<Vec<String>>;

    /// Find-or-create on (user, badge). Returns true only when this call
    /// created the grant; an existing grant is not an error.
    async fn grant_badge(
        &self,
        user_id: &str,
        badge_id: &str,
        achieved_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Upsert a catalog badge by name.
    async fn ensure_badge(&self, name: &str, description: &str) -> StoreResult<Badge>;
}

#[async_trait]
pub trait ProgressTransaction: Send {
    async fn find_task(&mut self, task_id: &str) -> StoreResult<Option<Task>>;

    async fn find_question(&mut self, question_id: &str) -> StoreResult<Option<TaskQuestion>>;

    async fn find_user(&mut self, user_id: &str) -> StoreResult<Option<User>>;

    /// Find-or-create the progress row and hold a write lock on it until the
    /// transaction ends.
    async fn lock_progress(&mut self, user_id: &str, task_id: &str)
        -> StoreResult<UserTaskProgress>;

    /// Re-read the user row under a write lock.
    async fn lock_user(&mut self, user_id: &str) -> StoreResult<Option<User>>;

    async fn insert_answer(&mut self, answer: &UserAnswer) -> StoreResult<()>;

    async fn count_questions(&mut self, task_id: &str) -> StoreResult<u64>;

    /// Distinct questions answered correctly at least once on this progress row.
    async fn count_correct_questions(&mut self, progress_id: &str) -> StoreResult<u64>;

    async fn save_progress(&mut self, progress: &UserTaskProgress) -> StoreResult<()>;

    /// Persist gamification fields of the user.
    async fn save_user(&mut self, user: &User) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

/// Opens the backend selected by `config.store_backend`. MongoDB indexes are
/// created before the store is handed out.
pub async fn open(config: &Config) -> StoreResult<Arc<dyn ProgressStore>> {
    match config.store_backend {
        StoreBackend::Mongo => {
            let client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
            let store = MongoStore::new(client, &config.mongo_database);
            store.ensure_indexes().await?;
            tracing::info!("MongoDB store ready (database: {})", config.mongo_database);
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
