//! Re-runs badge evaluation for every user. Useful after adding a badge rule,
//! or when badge jobs were dropped under load.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::fmt::init;

use codequest_api::{
    config::Config,
    services::{badge_seed, badge_service::BadgeEvaluator},
    store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;
    let store = store::open(&config)
        .await
        .context("Failed to open progress store")?;

    let rules = config.gamification.badge_rules.clone();
    badge_seed::bootstrap(store.as_ref(), &rules).await?;
    let evaluator = BadgeEvaluator::new(Arc::clone(&store), rules);

    let user_ids = store.user_ids().await.context("Failed to list users")?;
    tracing::info!("Backfilling badges for {} users", user_ids.len());

    let mut granted = 0usize;
    let mut failed = 0usize;
    for user_id in &user_ids {
        match evaluator.evaluate_and_grant(user_id).await {
            Ok(names) => {
                if !names.is_empty() {
                    tracing::info!("Granted {:?} to user {}", names, user_id);
                }
                granted += names.len();
            }
            Err(e) => {
                failed += 1;
                tracing::error!("Badge evaluation failed for user {}: {}", user_id, e);
            }
        }
    }

    tracing::info!(
        "Badge backfill finished: users={}, badges_granted={}, failures={}",
        user_ids.len(),
        granted,
        failed
    );
    Ok(())
}
