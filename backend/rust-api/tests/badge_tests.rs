mod common;

use codequest_api::{
    models::UserTaskProgress,
    services::{
        badge_seed,
        badge_service::{BadgeEvaluator, BadgeRule, BadgeRules},
    },
    store::{MemoryStore, ProgressStore},
};
use std::sync::Arc;

async fn complete_tasks(store: &MemoryStore, user_id: &str, count: usize) {
    for n in 0..count {
        let mut progress = UserTaskProgress::new(user_id, &format!("t-{}", n));
        progress.is_completed = true;
        progress.progress = 100.0;
        progress.completed_at = Some(chrono::Utc::now());
        store.insert_progress(progress).await;
    }
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    badge_seed::bootstrap(&store, &BadgeRules::default())
        .await
        .unwrap();
    store
}

fn evaluator(store: &MemoryStore) -> BadgeEvaluator {
    BadgeEvaluator::new(Arc::new(store.clone()), BadgeRules::default())
}

#[tokio::test]
async fn no_completions_no_badges() {
    let store = seeded_store().await;
    let granted = evaluator(&store).evaluate_and_grant("u-1").await.unwrap();
    assert!(granted.is_empty());
    assert!(store.user_badges("u-1").await.is_empty());
}

#[tokio::test]
async fn grants_every_satisfied_rule() {
    let store = seeded_store().await;
    complete_tasks(&store, "u-1", 5).await;

    let mut granted = evaluator(&store).evaluate_and_grant("u-1").await.unwrap();
    granted.sort();
    assert_eq!(granted, ["Apprentice", "Novice"]);
    assert_eq!(store.user_badges("u-1").await.len(), 2);
}

#[tokio::test]
async fn repeated_evaluation_is_idempotent() {
    let store = seeded_store().await;
    complete_tasks(&store, "u-1", 1).await;
    let evaluator = evaluator(&store);

    assert_eq!(evaluator.evaluate_and_grant("u-1").await.unwrap(), ["Novice"]);
    assert!(evaluator.evaluate_and_grant("u-1").await.unwrap().is_empty());
    assert_eq!(store.user_badges("u-1").await.len(), 1);

    complete_tasks(&store, "u-2", 0).await;
    assert!(evaluator.evaluate_and_grant("u-2").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_grant_once() {
    let store = seeded_store().await;
    complete_tasks(&store, "u-1", 5).await;
    let evaluator = Arc::new(evaluator(&store));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let evaluator = evaluator.clone();
            tokio::spawn(async move { evaluator.evaluate_and_grant("u-1").await })
        })
        .collect();

    let mut total_granted = 0;
    for handle in handles {
        total_granted += handle.await.unwrap().unwrap().len();
    }

    assert_eq!(total_granted, 2);
    assert_eq!(store.user_badges("u-1").await.len(), 2);
}

#[tokio::test]
async fn badges_without_rules_never_qualify() {
    let store = seeded_store().await;
    store.ensure_badge("Collector", "No rule configured").await.unwrap();
    complete_tasks(&store, "u-1", 50).await;

    let granted = evaluator(&store).evaluate_and_grant("u-1").await.unwrap();
    assert!(!granted.contains(&"Collector".to_string()));
    assert_eq!(granted.len(), 2);
}

#[tokio::test]
async fn custom_rules_are_honoured() {
    let store = MemoryStore::new();
    let rules = BadgeRules::new(vec![BadgeRule {
        name: "Trio".to_string(),
        description: "Three tasks".to_string(),
        min_completed_tasks: 3,
    }]);
    badge_seed::bootstrap(&store, &rules).await.unwrap();
    let evaluator = BadgeEvaluator::new(Arc::new(store.clone()), rules);

    complete_tasks(&store, "u-1", 2).await;
    assert!(evaluator.evaluate_and_grant("u-1").await.unwrap().is_empty());

    complete_tasks(&store, "u-1", 3).await;
    assert_eq!(evaluator.evaluate_and_grant("u-1").await.unwrap(), ["Trio"]);
}

#[tokio::test]
async fn failed_grants_are_logged_not_propagated() {
    common::init_tracing();
    let store = seeded_store().await;
    complete_tasks(&store, "u-1", 5).await;
    store.set_fail_badge_grants(true);

    let granted = evaluator(&store).evaluate_and_grant("u-1").await.unwrap();
    assert!(granted.is_empty());
    assert!(store.user_badges("u-1").await.is_empty());
}
