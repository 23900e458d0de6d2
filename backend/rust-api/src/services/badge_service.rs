use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::metrics::{BADGES_GRANTED_TOTAL, BADGE_EVALUATIONS_TOTAL};
use crate::store::ProgressStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub min_completed_tasks: u64,
}

/// Badge name -> minimum number of completed tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BadgeRules {
    rules: Vec<BadgeRule>,
}

impl Default for BadgeRules {
    fn default() -> Self {
        Self {
            rules: vec![
                BadgeRule {
                    name: "Novice".to_string(),
                    description: "Completed your first task".to_string(),
                    min_completed_tasks: 1,
                },
                BadgeRule {
                    name: "Apprentice".to_string(),
                    description: "Completed five tasks".to_string(),
                    min_completed_tasks: 5,
                },
            ],
        }
    }
}

impl BadgeRules {
    pub fn new(rules: Vec<BadgeRule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BadgeRule> {
        self.rules.iter()
    }

    /// Badges without a rule never qualify.
    pub fn qualifies(&self, badge_name: &str, completed_tasks: u64) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.name == badge_name)
            .is_some_and(|rule| completed_tasks >= rule.min_completed_tasks)
    }
}

pub struct BadgeEvaluator {
    store: Arc<dyn ProgressStore>,
    rules: BadgeRules,
}

impl BadgeEvaluator {
    pub fn new(store: Arc<dyn ProgressStore>, rules: BadgeRules) -> Self {
        Self { store, rules }
    }

    /// Grants every badge the user newly qualifies for and returns their names.
    ///
    /// Safe to run concurrently for the same user: each grant is a
    /// find-or-create, and losing a race to another evaluation is a no-op.
    /// A failed grant is logged and the remaining badges are still tried.
    pub async fn evaluate_and_grant(&self, user_id: &str) -> Result<Vec<String>, EngineError> {
        let result = self.evaluate_inner(user_id).await;
        let status = if result.is_ok() { "success" } else { "error" };
        BADGE_EVALUATIONS_TOTAL.with_label_values(&[status]).inc();
        result
    }

    async fn evaluate_inner(&self, user_id: &str) -> Result<Vec<String>, EngineError> {
        let completed = self.store.count_completed(user_id).await?;
        let granted: HashSet<String> = self
            .store
            .granted_badge_ids(user_id)
            .await?
            .into_iter()
            .collect();
        let badges = self.store.list_badges().await?;

        let mut newly_granted = Vec::new();
        for badge in badges.iter().filter(|b| !granted.contains(&b.id)) {
            if !self.rules.qualifies(&badge.name, completed) {
                continue;
            }

            match self.store.grant_badge(user_id, &badge.id, Utc::now()).await {
                Ok(true) => {
                    tracing::info!(
                        "Badge earned: user={}, badge={}, completed_tasks={}",
                        user_id,
                        badge.name,
                        completed
                    );
                    BADGES_GRANTED_TOTAL.with_label_values(&[&badge.name]).inc();
                    newly_granted.push(badge.name.clone());
                }
                Ok(false) => {
                    tracing::debug!(
                        "Badge {} already granted to user {} by a concurrent evaluation",
                        badge.name,
                        user_id
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to award badge: user={}, badge={}, error={}",
                        user_id,
                        badge.name,
                        e
                    );
                }
            }
        }

        Ok(newly_granted)
    }
}
