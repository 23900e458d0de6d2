use serde::Deserialize;
use std::env;

use crate::services::badge_service::BadgeRules;
use crate::services::recommendation_service::{ScoringWeights, DEFAULT_AFFINITY};
use crate::services::rewards::LevelTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown store backend '{}', expected 'mongo' or 'memory'",
                other
            ))),
        }
    }
}

/// Tunables of the reward, badge and recommendation logic. Loaded once at
/// startup and shared read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GamificationSettings {
    pub level_thresholds: LevelTable,
    pub badge_rules: BadgeRules,
    pub weights: ScoringWeights,
    pub default_affinity: f64,
}

impl GamificationSettings {
    /// Scoring weights must be non-negative and sum to 1 so composite scores
    /// stay within [0, 1].
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let ScoringWeights {
            difficulty,
            affinity,
            streak,
            variety,
        } = self.weights;

        if [difficulty, affinity, streak, variety]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(config::ConfigError::Message(format!(
                "gamification.weights must be non-negative, got {:?}",
                self.weights
            )));
        }

        let sum = difficulty + affinity + streak + variety;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(config::ConfigError::Message(format!(
                "gamification.weights must sum to 1.0, got {}",
                sum
            )));
        }

        if !(0.0..=1.0).contains(&self.default_affinity) {
            return Err(config::ConfigError::Message(format!(
                "gamification.default_affinity must be within [0, 1], got {}",
                self.default_affinity
            )));
        }

        Ok(())
    }
}

impl Default for GamificationSettings {
    fn default() -> Self {
        Self {
            level_thresholds: LevelTable::default(),
            badge_rules: BadgeRules::default(),
            weights: ScoringWeights::default(),
            default_affinity: DEFAULT_AFFINITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    /// `user:password` expected on /metrics
    pub metrics_auth: String,
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    pub badge_workers: usize,
    pub badge_queue_capacity: usize,
    pub gamification: GamificationSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
            mongo_database: "codequest".to_string(),
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            metrics_auth: "admin:changeme".to_string(),
            bind_addr: "0.0.0.0:8081".to_string(),
            store_backend: StoreBackend::Mongo,
            badge_workers: 2,
            badge_queue_capacity: 1024,
            gamification: GamificationSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, local .env as a fallback
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret
            }
        };

        let metrics_auth = settings
            .get_string("auth.metrics_auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or(defaults.metrics_auth);

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let store_backend = match settings
            .get_string("database.store_backend")
            .or_else(|_| env::var("STORE_BACKEND"))
        {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.store_backend,
        };

        let badge_workers = optional(settings.get::<usize>("badges.workers"))?
            .unwrap_or(defaults.badge_workers);
        let badge_queue_capacity = optional(settings.get::<usize>("badges.queue_capacity"))?
            .unwrap_or(defaults.badge_queue_capacity);

        let gamification = optional(settings.get::<GamificationSettings>("gamification"))?
            .unwrap_or(defaults.gamification);
        gamification.validate()?;

        Ok(Config {
            mongo_uri,
            mongo_database,
            jwt_secret,
            metrics_auth,
            bind_addr,
            store_backend,
            badge_workers,
            badge_queue_capacity,
            gamification,
        })
    }
}

/// Missing keys fall back to defaults; malformed ones are errors.
fn optional<T>(value: Result<T, config::ConfigError>) -> Result<Option<T>, config::ConfigError> {
    match value {
        Ok(v) => Ok(Some(v)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parses_known_names() {
        assert_eq!("mongo".parse::<StoreBackend>().unwrap(), StoreBackend::Mongo);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn gamification_section_overrides_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [gamification]
                level_thresholds = [0, 50, 150]
                default_affinity = 0.1

                [gamification.weights]
                difficulty = 0.5
                variety = 0.0

                [[gamification.badge_rules]]
                name = "Starter"
                min_completed_tasks = 1
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let gamification: GamificationSettings = settings.get("gamification").unwrap();
        assert_eq!(gamification.level_thresholds.threshold(2), Some(50));
        assert_eq!(gamification.level_thresholds.max_level(), 3);
        assert_eq!(gamification.default_affinity, 0.1);
        assert_eq!(gamification.weights.difficulty, 0.5);
        assert_eq!(gamification.weights.affinity, 0.3);
        assert!(gamification.validate().is_ok());
        assert!(gamification.badge_rules.qualifies("Starter", 1));
        assert!(!gamification.badge_rules.qualifies("Novice", 1));
    }

    fn parse_gamification(toml: &str) -> GamificationSettings {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .get("gamification")
            .unwrap()
    }

    #[test]
    fn weights_not_summing_to_one_are_rejected() {
        let gamification = parse_gamification(
            r#"
            [gamification.weights]
            difficulty = 0.7
            "#,
        );
        let err = gamification.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn negative_weights_are_rejected() {
        let gamification = parse_gamification(
            r#"
            [gamification.weights]
            difficulty = 0.6
            variety = -0.1
            "#,
        );
        assert!(gamification.validate().is_err());
    }

    #[test]
    fn default_affinity_outside_unit_range_is_rejected() {
        let gamification = parse_gamification(
            r#"
            [gamification]
            default_affinity = 1.5
            "#,
        );
        let err = gamification.validate().unwrap_err();
        assert!(err.to_string().contains("default_affinity"));
    }

    #[test]
    fn missing_gamification_section_uses_defaults() {
        let settings = config::Config::builder().build().unwrap();
        let gamification = optional(settings.get::<GamificationSettings>("gamification"))
            .unwrap()
            .unwrap_or_default();
        assert_eq!(gamification.level_thresholds, LevelTable::default());
        assert_eq!(gamification.default_affinity, DEFAULT_AFFINITY);
        assert!(gamification.validate().is_ok());
    }
}
