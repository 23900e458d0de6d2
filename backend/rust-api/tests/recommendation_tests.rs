mod common;

use chrono::{Duration, Utc};
use codequest_api::{
    error::EngineError,
    models::{Difficulty, TaskType, UserTaskProgress},
    services::recommendation_service::{RecommendationService, ScoringWeights, DEFAULT_AFFINITY},
    store::MemoryStore,
};
use std::sync::Arc;

use common::{seed_user, task};

fn service(store: &MemoryStore) -> RecommendationService {
    RecommendationService::new(
        Arc::new(store.clone()),
        ScoringWeights::default(),
        DEFAULT_AFFINITY,
    )
}

async fn mark_completed(store: &MemoryStore, user_id: &str, task_id: &str, days_ago: i64) {
    let mut progress = UserTaskProgress::new(user_id, task_id);
    progress.is_completed = true;
    progress.progress = 100.0;
    progress.completed_at = Some(Utc::now() - Duration::days(days_ago));
    store.insert_progress(progress).await;
}

#[tokio::test]
async fn beginner_sees_easy_before_hard() {
    let store = MemoryStore::new();
    seed_user(&store, "u-1").await;
    store
        .insert_task(task("t-hard", Difficulty::Hard, TaskType::Quiz, "rust"))
        .await;
    store
        .insert_task(task("t-easy", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;

    let ranked = service(&store).recommend("u-1").await.unwrap();

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].task.id, "t-easy");
    assert!(ranked[0].score > ranked[1].score);
}

#[tokio::test]
async fn completed_and_inactive_tasks_are_excluded() {
    let store = MemoryStore::new();
    seed_user(&store, "u-1").await;
    store
        .insert_task(task("t-done", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;
    store
        .insert_task(task("t-open", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;
    let mut retired = task("t-retired", Difficulty::Easy, TaskType::Quiz, "rust");
    retired.is_active = false;
    store.insert_task(retired).await;
    mark_completed(&store, "u-1", "t-done", 1).await;

    let ids: Vec<String> = service(&store)
        .recommend("u-1")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.task.id)
        .collect();

    assert_eq!(ids, ["t-open"]);
}

#[tokio::test]
async fn in_progress_tasks_stay_candidates() {
    let store = MemoryStore::new();
    seed_user(&store, "u-1").await;
    store
        .insert_task(task("t-1", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;
    let mut started = UserTaskProgress::new("u-1", "t-1");
    started.attempts = 2;
    store.insert_progress(started).await;

    let ranked = service(&store).recommend("u-1").await.unwrap();
    assert_eq!(ranked.len(), 1);
}

#[tokio::test]
async fn history_drives_affinity_and_variety() {
    let store = MemoryStore::new();
    seed_user(&store, "u-1").await;
    // History: one go quiz (older), then two rust fill-blanks (latest)
    store
        .insert_task(task("h-1", Difficulty::Easy, TaskType::Quiz, "go"))
        .await;
    store
        .insert_task(task("h-2", Difficulty::Easy, TaskType::FillBlank, "rust"))
        .await;
    store
        .insert_task(task("h-3", Difficulty::Easy, TaskType::FillBlank, "rust"))
        .await;
    mark_completed(&store, "u-1", "h-1", 3).await;
    mark_completed(&store, "u-1", "h-2", 2).await;
    mark_completed(&store, "u-1", "h-3", 1).await;

    store
        .insert_task(task("c-go-fill", Difficulty::Easy, TaskType::FillBlank, "go"))
        .await;
    store
        .insert_task(task("c-rust-quiz", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;
    store
        .insert_task(task("c-python-quiz", Difficulty::Easy, TaskType::Quiz, "python"))
        .await;

    let ranked = service(&store).recommend("u-1").await.unwrap();
    let ids: Vec<&str> = ranked.iter().map(|s| s.task.id.as_str()).collect();

    // rust quiz: 0.4 + 0.3*(2/3) + 0.2 + 0.1 = 0.9
    // python quiz: 0.4 + 0.3*0.2 + 0.2 + 0.1 = 0.76
    // go fill-blank: 0.4 + 0.3*(1/3) + 0.2 + 0.0 = 0.7
    assert_eq!(ids, ["c-rust-quiz", "c-python-quiz", "c-go-fill"]);
    assert!((ranked[0].score - 0.9).abs() < 1e-9);
    assert!((ranked[2].score - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn long_streak_favours_hard_tasks() {
    let store = MemoryStore::new();
    let mut user = seed_user(&store, "u-1").await;
    user.level = 5;
    user.streak_count = 8;
    store.insert_user(user).await;
    store
        .insert_task(task("t-easy", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;
    store
        .insert_task(task("t-medium", Difficulty::Medium, TaskType::Quiz, "rust"))
        .await;
    store
        .insert_task(task("t-hard", Difficulty::Hard, TaskType::Quiz, "rust"))
        .await;

    let ids: Vec<String> = service(&store)
        .recommend("u-1")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.task.id)
        .collect();

    assert_eq!(ids, ["t-hard", "t-medium", "t-easy"]);
}

#[tokio::test]
async fn ties_are_ordered_by_task_id() {
    let store = MemoryStore::new();
    seed_user(&store, "u-1").await;
    for id in ["t-c", "t-a", "t-b"] {
        store
            .insert_task(task(id, Difficulty::Medium, TaskType::Quiz, "rust"))
            .await;
    }

    let first: Vec<String> = service(&store)
        .recommend("u-1")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.task.id)
        .collect();
    let second: Vec<String> = service(&store)
        .recommend("u-1")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.task.id)
        .collect();

    assert_eq!(first, ["t-a", "t-b", "t-c"]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let store = MemoryStore::new();
    store
        .insert_task(task("t-1", Difficulty::Easy, TaskType::Quiz, "rust"))
        .await;

    let err = service(&store).recommend("ghost").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn no_candidates_yields_empty_list() {
    let store = MemoryStore::new();
    seed_user(&store, "u-1").await;
    assert!(service(&store).recommend("u-1").await.unwrap().is_empty());
}
