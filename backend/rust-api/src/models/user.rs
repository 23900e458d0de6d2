use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User document stored in MongoDB "users" collection.
///
/// Only the gamification fields are written by this service; profile fields
/// belong to the identity service and are left untouched on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub xp: u64,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub streak_count: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::bson_datetime_as_chrono_option"
    )]
    pub last_active_date: Option<DateTime<Utc>>,
}

fn default_level() -> u32 {
    1
}

impl User {
    /// Fresh account with starting gamification state
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            level: 1,
            xp: 0,
            points: 0,
            streak_count: 0,
            last_active_date: None,
        }
    }
}

/// API view of a user's gamification state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub id: String,
    pub username: String,
    pub level: u32,
    pub xp: u64,
    pub points: u64,
    pub streak_count: u32,
    pub last_active_date: Option<DateTime<Utc>>,
}

impl From<&User> for UserStats {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            level: user.level,
            xp: user.xp,
            points: user.points,
            streak_count: user.streak_count,
            last_active_date: user.last_active_date,
        }
    }
}
