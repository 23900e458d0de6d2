use std::sync::Arc;

use crate::config::Config;
use crate::middlewares::auth::JwtService;
use crate::store::ProgressStore;

use self::badge_service::BadgeEvaluator;
use self::badge_worker::{BadgeQueue, BadgeWorkers};
use self::progress_engine::ProgressEngine;
use self::recommendation_service::RecommendationService;
use self::rewards::RewardPolicy;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ProgressStore>,
    pub engine: Arc<ProgressEngine>,
    pub recommender: Arc<RecommendationService>,
    pub badge_workers: BadgeWorkers,
    pub jwt: Arc<JwtService>,
}

impl AppState {
    /// Wires the services around `store` and starts the badge workers, so it
    /// must be called inside a tokio runtime.
    pub fn new(config: Config, store: Arc<dyn ProgressStore>) -> Self {
        let gamification = &config.gamification;

        let badges = Arc::new(BadgeEvaluator::new(
            store.clone(),
            gamification.badge_rules.clone(),
        ));
        let (queue, badge_workers) = BadgeQueue::spawn(
            badges,
            config.badge_workers,
            config.badge_queue_capacity,
        );

        let engine = ProgressEngine::new(
            store.clone(),
            RewardPolicy::new(gamification.level_thresholds.clone()),
        )
        .with_badge_queue(queue);

        let recommender = RecommendationService::new(
            store.clone(),
            gamification.weights.clone(),
            gamification.default_affinity,
        );

        tracing::info!(
            "Services initialized: store={}, badge_workers={}, level_cap={}",
            store.name(),
            config.badge_workers,
            gamification.level_thresholds.max_level()
        );

        Self {
            jwt: Arc::new(JwtService::new(&config.jwt_secret)),
            engine: Arc::new(engine),
            recommender: Arc::new(recommender),
            badge_workers,
            store,
            config,
        }
    }
}

pub mod answer_evaluator;
pub mod badge_seed;
pub mod badge_service;
pub mod badge_worker;
pub mod progress_engine;
pub mod recommendation_service;
pub mod rewards;
