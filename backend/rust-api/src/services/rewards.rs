//! Completion rewards: XP/points, level thresholds and daily streaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Task, User};
use crate::utils::time::calendar_days_between;

/// XP needed to reach each level; index 0 is level 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u64>", into = "Vec<u64>")]
pub struct LevelTable {
    thresholds: Vec<u64>,
}

impl Default for LevelTable {
    fn default() -> Self {
        Self {
            thresholds: vec![0, 100, 250, 500, 1000],
        }
    }
}

impl From<Vec<u64>> for LevelTable {
    fn from(thresholds: Vec<u64>) -> Self {
        Self::new(thresholds)
    }
}

impl From<LevelTable> for Vec<u64> {
    fn from(table: LevelTable) -> Self {
        table.thresholds
    }
}

impl LevelTable {
    pub fn new(mut thresholds: Vec<u64>) -> Self {
        thresholds.sort_unstable();
        thresholds.dedup();
        if thresholds.first() != Some(&0) {
            thresholds.insert(0, 0);
        }
        Self { thresholds }
    }

    pub fn threshold(&self, level: u32) -> Option<u64> {
        let index = usize::try_from(level.checked_sub(1)?).ok()?;
        self.thresholds.get(index).copied()
    }

    pub fn max_level(&self) -> u32 {
        self.thresholds.len() as u32
    }

    /// Advances from `current_level` while the next threshold is covered by
    /// `xp`. Never returns less than `current_level`.
    pub fn level_for(&self, current_level: u32, xp: u64) -> u32 {
        let mut level = current_level.max(1);
        while let Some(needed) = self.threshold(level + 1) {
            if xp < needed {
                break;
            }
            level += 1;
        }
        level
    }

    pub fn progress(&self, level: u32, xp: u64) -> LevelProgress {
        let mut xp_for_current_level = self.threshold(level).unwrap_or(0);
        let (next_level, xp_for_next_level) = match self.threshold(level + 1) {
            Some(needed) => (Some(level + 1), needed),
            None => {
                xp_for_current_level = xp_for_current_level.min(xp);
                (None, xp)
            }
        };

        let xp_in_current_level = xp.saturating_sub(xp_for_current_level);
        let range = xp_for_next_level.saturating_sub(xp_for_current_level).max(1);
        let progress_percentage =
            ((xp_in_current_level as f64 / range as f64) * 100.0).clamp(0.0, 100.0);

        LevelProgress {
            xp_for_current_level,
            xp_for_next_level,
            xp_in_current_level,
            progress_percentage,
            next_level,
        }
    }
}

/// Position of a user's XP between the current and next level thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub xp_for_current_level: u64,
    pub xp_for_next_level: u64,
    pub xp_in_current_level: u64,
    pub progress_percentage: f64,
    pub next_level: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// First streak-affecting completion ever
    Started,
    Extended,
    /// Already active today
    Unchanged,
    /// Gap of more than one day
    Reset,
}

impl StreakChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakChange::Started => "started",
            StreakChange::Extended => "extended",
            StreakChange::Unchanged => "unchanged",
            StreakChange::Reset => "reset",
        }
    }
}

/// Applies one completion at `now` to the user's daily streak.
pub fn advance_streak(user: &mut User, now: DateTime<Utc>) -> StreakChange {
    let change = match user.last_active_date {
        None => StreakChange::Started,
        Some(last) => match calendar_days_between(last, now) {
            days if days <= 0 => StreakChange::Unchanged,
            1 => StreakChange::Extended,
            _ => StreakChange::Reset,
        },
    };

    match change {
        StreakChange::Unchanged => {}
        StreakChange::Extended => {
            user.streak_count += 1;
            user.last_active_date = Some(now);
        }
        StreakChange::Started | StreakChange::Reset => {
            user.streak_count = 1;
            user.last_active_date = Some(now);
        }
    }
    change
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardSummary {
    pub xp_gained: u32,
    pub points_gained: u32,
    pub previous_level: u32,
    pub new_level: u32,
    pub streak: StreakChange,
}

impl RewardSummary {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.previous_level
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewardPolicy {
    levels: LevelTable,
}

impl RewardPolicy {
    pub fn new(levels: LevelTable) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &LevelTable {
        &self.levels
    }

    pub fn apply_completion(
        &self,
        user: &mut User,
        task: &Task,
        now: DateTime<Utc>,
    ) -> RewardSummary {
        let streak = advance_streak(user, now);

        user.xp = user.xp.saturating_add(u64::from(task.xp));
        user.points = user.points.saturating_add(u64::from(task.points));

        let previous_level = user.level;
        user.level = self.levels.level_for(user.level, user.xp);

        RewardSummary {
            xp_gained: task.xp,
            points_gained: task.points,
            previous_level,
            new_level: user.level,
            streak,
        }
    }
}
