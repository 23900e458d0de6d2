use anyhow::{Context, Result};

use super::badge_service::BadgeRules;
use crate::store::ProgressStore;

/// Makes sure every configured badge exists in the catalog. Runs at startup;
/// existing badges keep their ids.
pub async fn bootstrap(store: &dyn ProgressStore, rules: &BadgeRules) -> Result<()> {
    let mut seeded = 0usize;
    for rule in rules.iter() {
        let badge = store
            .ensure_badge(&rule.name, &rule.description)
            .await
            .with_context(|| format!("Failed to seed badge '{}'", rule.name))?;
        tracing::debug!(
            "Badge ready: name={}, id={}, min_completed_tasks={}",
            badge.name,
            badge.id,
            rule.min_completed_tasks
        );
        seeded += 1;
    }

    tracing::info!("Badge catalog bootstrap complete ({} rules)", seeded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = MemoryStore::new();
        let rules = BadgeRules::default();

        bootstrap(&store, &rules).await.unwrap();
        let first = store.list_badges().await.unwrap();
        bootstrap(&store, &rules).await.unwrap();
        let second = store.list_badges().await.unwrap();

        assert_eq!(first.len(), 2);
        let mut first_ids: Vec<_> = first.into_iter().map(|b| b.id).collect();
        let mut second_ids: Vec<_> = second.into_iter().map(|b| b.id).collect();
        first_ids.sort();
        second_ids.sort();
        assert_eq!(first_ids, second_ids);
    }
}
