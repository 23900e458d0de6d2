//! Post-commit badge evaluation.
//!
//! Completions enqueue the user id; a fixed pool of workers drains the queue.
//! Enqueueing never waits: when the queue is full the job is dropped, and the
//! user's next completion re-evaluates everything anyway. On shutdown the
//! queue is closed and jobs already queued are still evaluated.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::badge_service::BadgeEvaluator;
use crate::metrics::BADGE_JOBS_DROPPED_TOTAL;

#[derive(Clone)]
pub struct BadgeQueue {
    sender: mpsc::Sender<String>,
}

/// Handles of the spawned workers.
pub struct BadgeWorkers {
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BadgeWorkers {
    /// Closes the queue, lets the workers finish what is already queued and
    /// waits for them. Later enqueues are counted as dropped.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Badge worker panicked: {}", e);
            }
        }
        tracing::info!("Badge workers drained");
    }
}

impl BadgeQueue {
    /// Spawns `workers` tasks on the current tokio runtime.
    pub fn spawn(
        evaluator: Arc<BadgeEvaluator>,
        workers: usize,
        capacity: usize,
    ) -> (Self, BadgeWorkers) {
        let (sender, receiver) = mpsc::channel::<String>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown, _) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let evaluator = evaluator.clone();
                let mut stop = shutdown.subscribe();
                tokio::spawn(async move {
                    tracing::debug!("Badge worker {} started", worker_id);
                    loop {
                        let job = {
                            let mut receiver = receiver.lock().await;
                            if *stop.borrow() {
                                receiver.close();
                            }
                            tokio::select! {
                                job = receiver.recv() => job,
                                Ok(()) = stop.changed() => {
                                    receiver.close();
                                    receiver.recv().await
                                }
                            }
                        };
                        let Some(user_id) = job else {
                            break;
                        };

                        if let Err(e) = evaluator.evaluate_and_grant(&user_id).await {
                            tracing::error!(
                                "Failed to check badges in background: user={}, error={}",
                                user_id,
                                e
                            );
                        }
                    }
                    tracing::debug!("Badge worker {} stopped", worker_id);
                })
            })
            .collect();

        (
            Self { sender },
            BadgeWorkers {
                shutdown,
                handles: Mutex::new(handles),
            },
        )
    }

    pub fn enqueue(&self, user_id: &str) {
        match self.sender.try_send(user_id.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                BADGE_JOBS_DROPPED_TOTAL.inc();
                tracing::warn!("Badge queue full, dropping evaluation for user {}", user_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                BADGE_JOBS_DROPPED_TOTAL.inc();
                tracing::warn!("Badge queue closed, dropping evaluation for user {}", user_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::progress::UserTaskProgress;
    use crate::services::badge_service::BadgeRules;
    use crate::store::{MemoryStore, ProgressStore};
    use std::time::Duration;

    async fn store_with_completions(users: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_badge("Novice", "").await.unwrap();
        for user_id in users {
            let mut done = UserTaskProgress::new(user_id, "t-1");
            done.is_completed = true;
            store.insert_progress(done).await;
        }
        store
    }

    fn evaluator(store: &MemoryStore) -> Arc<BadgeEvaluator> {
        Arc::new(BadgeEvaluator::new(
            Arc::new(store.clone()),
            BadgeRules::default(),
        ))
    }

    #[tokio::test]
    async fn queued_job_grants_badge() {
        let store = store_with_completions(&["u-1"]).await;
        let (queue, workers) = BadgeQueue::spawn(evaluator(&store), 2, 8);
        queue.enqueue("u-1");

        for _ in 0..100 {
            if !store.user_badges("u-1").await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.user_badges("u-1").await.len(), 1);

        tokio::time::timeout(Duration::from_secs(5), workers.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_queued_jobs() {
        let users = ["u-1", "u-2", "u-3", "u-4", "u-5"];
        let store = store_with_completions(&users).await;
        let (queue, workers) = BadgeQueue::spawn(evaluator(&store), 1, 16);
        for user_id in users {
            queue.enqueue(user_id);
        }

        tokio::time::timeout(Duration::from_secs(5), workers.shutdown())
            .await
            .unwrap();

        for user_id in users {
            assert_eq!(store.user_badges(user_id).await.len(), 1, "{}", user_id);
        }
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_counted_as_dropped() {
        let store = store_with_completions(&["u-1"]).await;
        let (queue, workers) = BadgeQueue::spawn(evaluator(&store), 1, 4);
        workers.shutdown().await;

        let dropped_before = BADGE_JOBS_DROPPED_TOTAL.get();
        queue.enqueue("u-1");

        assert!(BADGE_JOBS_DROPPED_TOTAL.get() >= dropped_before + 1);
        assert!(store.user_badges("u-1").await.is_empty());
    }
}
