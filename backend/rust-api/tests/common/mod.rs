#![allow(dead_code)]

use axum::Router;
use codequest_api::{
    config::{Config, StoreBackend},
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{Difficulty, Task, TaskQuestion, TaskType, User},
    services::{
        progress_engine::{AnswerSubmission, ProgressEngine},
        rewards::RewardPolicy,
        AppState,
    },
    store::MemoryStore,
};
use std::sync::Arc;

pub const JWT_SECRET: &str = "test-secret";
pub const METRICS_AUTH: &str = "metrics:secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: JWT_SECRET.to_string(),
        metrics_auth: METRICS_AUTH.to_string(),
        store_backend: StoreBackend::Memory,
        badge_workers: 1,
        badge_queue_capacity: 64,
        ..Config::default()
    }
}

pub fn task(id: &str, difficulty: Difficulty, task_type: TaskType, language: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("Task {}", id),
        description: String::new(),
        task_type,
        language: language.to_string(),
        difficulty,
        points: 10,
        xp: 20,
        is_active: true,
    }
}

/// Question `{task_id}-q{n}` with canonical answer `answer-{n}`.
pub fn question_id(task_id: &str, n: usize) -> String {
    format!("{}-q{}", task_id, n)
}

pub fn answer_for(n: usize) -> String {
    format!("answer-{}", n)
}

/// Seeds an easy quiz task with `questions` questions and the given XP reward.
pub async fn seed_task(store: &MemoryStore, task_id: &str, questions: usize, xp: u32) -> Task {
    let mut task = task(task_id, Difficulty::Easy, TaskType::Quiz, "rust");
    task.xp = xp;
    store.insert_task(task.clone()).await;
    for n in 1..=questions {
        store
            .insert_question(TaskQuestion {
                id: question_id(task_id, n),
                task_id: task_id.to_string(),
                question_text: format!("Question {}", n),
                correct_answer: answer_for(n),
            })
            .await;
    }
    task
}

pub async fn seed_user(store: &MemoryStore, user_id: &str) -> User {
    let user = User::new(user_id, format!("{}-name", user_id));
    store.insert_user(user.clone()).await;
    user
}

pub fn engine(store: &MemoryStore) -> ProgressEngine {
    ProgressEngine::new(Arc::new(store.clone()), RewardPolicy::default())
}

pub fn submission(user_id: &str, task_id: &str, question: usize, answer: &str) -> AnswerSubmission {
    AnswerSubmission {
        user_id: user_id.to_string(),
        task_id: task_id.to_string(),
        question_id: question_id(task_id, question),
        answer: answer.to_string(),
    }
}

pub fn create_test_app(store: &MemoryStore) -> (Router, Arc<AppState>) {
    init_tracing();
    let state = Arc::new(AppState::new(test_config(), Arc::new(store.clone())));
    (create_router(state.clone()), state)
}

pub fn bearer(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        role: "student".to_string(),
        exp: (now + 3600) as usize,
        iat: now as usize,
    };
    let token = JwtService::new(JWT_SECRET)
        .generate_token(&claims)
        .expect("token generation");
    format!("Bearer {}", token)
}
