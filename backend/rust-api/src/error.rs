//! Error taxonomy shared by the progress engine, badge evaluator and
//! recommendation scorer.
//!
//! `NotFound` and `AlreadyCompleted` are expected outcomes that callers map
//! to typed responses. `Storage` means the enclosing transaction was rolled
//! back; the caller sees a generic failure.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced user, task or question does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The task was already completed by this user; nothing was recorded.
    #[error("task {task_id} already completed by user {user_id}")]
    AlreadyCompleted { user_id: String, task_id: String },

    /// The store rejected a read or write.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(what: &str, id: &str) -> Self {
        EngineError::NotFound(format!("{} {}", what, id))
    }

    /// Conflicts between concurrent transactions are safe to retry from scratch.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Storage(StoreError::Conflict(_)))
    }
}
