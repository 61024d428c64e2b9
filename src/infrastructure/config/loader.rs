use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::Config;

/// Project configuration directory, relative to the working directory.
pub const CONFIG_DIR: &str = ".deepthink";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid lane '{lane}': {reason}")]
    InvalidLane { lane: String, reason: String },

    #[error("Default lane '{0}' is not defined")]
    UnknownDefaultLane(String),

    #[error("Invalid price for model '{0}': prices must be finite and non-negative")]
    InvalidPrice(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .deepthink/config.yaml (project config, created by init)
    /// 3. .deepthink/local.yaml (project local overrides, optional)
    /// 4. Environment variables (DEEPTHINK_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(Path::new(CONFIG_DIR))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(dir: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("DEEPTHINK_").split("__"))
    }

    /// Write the default configuration to `.deepthink/config.yaml`.
    ///
    /// Returns false without touching anything when the file already exists
    /// and `force` is not set.
    pub fn write_defaults(dir: impl AsRef<Path>, force: bool) -> Result<bool> {
        let dir = dir.as_ref();
        let path = dir.join("config.yaml");
        if path.exists() && !force {
            return Ok(false);
        }
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let yaml = serde_yaml::to_string(&Config::default()).context("Failed to serialize default config")?;
        std::fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.rate_limit.requests_per_second <= 0.0 || !config.rate_limit.requests_per_second.is_finite() {
            return Err(ConfigError::InvalidRateLimit(config.rate_limit.requests_per_second));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        // max_retries of 0 is allowed: transient errors then fail the pass at once.
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let mut seen = HashSet::new();
        for lane in &config.lanes {
            let invalid = |reason: &str| ConfigError::InvalidLane {
                lane: lane.id.clone(),
                reason: reason.to_string(),
            };
            if lane.id.trim().is_empty() {
                return Err(invalid("id cannot be empty"));
            }
            if !seen.insert(lane.id.as_str()) {
                return Err(invalid("defined more than once"));
            }
            if !(lane.budget_cap_usd.is_finite() && lane.budget_cap_usd > 0.0) {
                return Err(invalid("budget_cap_usd must be positive"));
            }
            if lane.planner_model.trim().is_empty() || lane.solver_model.trim().is_empty() {
                return Err(invalid("planner_model and solver_model are required"));
            }
            if lane.max_evidence == 0 {
                return Err(invalid("max_evidence must be at least 1"));
            }
            if lane.call_timeout_secs == 0 || lane.solver_timeout_secs == 0 {
                return Err(invalid("timeouts must be at least 1 second"));
            }
        }
        if config.lane(None).is_none() {
            return Err(ConfigError::UnknownDefaultLane(config.default_lane.clone()));
        }

        for (model, price) in &config.pricing.overrides {
            let valid = |p: f64| p.is_finite() && p >= 0.0;
            if !valid(price.input_per_million) || !valid(price.output_per_million) {
                return Err(ConfigError::InvalidPrice(model.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ModelPrice;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.default_lane, "standard");
        assert_eq!(config.database.path, ".deepthink/deepthink.db");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
rate_limit:
  requests_per_second: 15.0
  burst_size: 30
logging:
  level: debug
  format: json
default_lane: deep
lanes:
  - id: deep
    solver_model: claude-opus-4-1
    candidate_count: 5
    budget_cap_usd: 4.0
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert!((config.rate_limit.requests_per_second - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.format, "json");
        let lane = config.lane(None).expect("default lane");
        assert_eq!(lane.candidate_count, 5);
        assert_eq!(lane.planner_model, crate::domain::models::LaneConfig::new("x").planner_model);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30000, 10000)
        ));
    }

    #[test]
    fn test_validate_zero_rate_limit() {
        let mut config = Config::default();
        config.rate_limit.requests_per_second = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidRateLimit(_)
        ));
    }

    #[test]
    fn test_validate_lane_rules() {
        let mut config = Config::default();
        config.lanes[0].budget_cap_usd = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLane { .. }
        ));

        let mut config = Config::default();
        let duplicate = config.lanes[0].clone();
        config.lanes.push(duplicate);
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLane { .. }
        ));

        let mut config = Config::default();
        config.default_lane = "missing".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::UnknownDefaultLane(_)
        ));
    }

    #[test]
    fn test_validate_negative_price() {
        let mut config = Config::default();
        config.pricing.overrides.insert(
            "mock-model".to_string(),
            ModelPrice {
                input_per_million: -1.0,
                output_per_million: 1.0,
            },
        );
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidPrice(_)
        ));
    }

    #[test]
    fn test_hierarchical_merging_with_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "logging:\n  level: info\n  format: json\nrate_limit:\n  burst_size: 7\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("local.yaml"), "logging:\n  level: warn\n").unwrap();

        let config: Config = temp_env::with_var("DEEPTHINK_LOGGING__LEVEL", Some("debug"), || {
            ConfigLoader::figment(dir.path()).extract().unwrap()
        });

        assert_eq!(config.logging.level, "debug", "Env should win over files");
        assert_eq!(config.logging.format, "json", "Base value should persist");
        assert_eq!(config.rate_limit.burst_size, 7);
    }

    #[test]
    fn test_local_overrides_project_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "default_lane: standard\n").unwrap();
        std::fs::write(dir.path().join("local.yaml"), "default_lane: quick\n").unwrap();

        let config: Config = temp_env::with_var_unset("DEEPTHINK_DEFAULT_LANE", || {
            ConfigLoader::figment(dir.path()).extract().unwrap()
        });
        assert_eq!(config.default_lane, "quick");
    }

    #[test]
    fn test_load_from_file_validates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  format: xml").unwrap();
        file.flush().unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_write_defaults_does_not_clobber() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join(".deepthink");

        assert!(ConfigLoader::write_defaults(&target, false).unwrap());
        std::fs::write(target.join("config.yaml"), "default_lane: quick\n").unwrap();
        assert!(!ConfigLoader::write_defaults(&target, false).unwrap());

        let config = ConfigLoader::load_from_file(target.join("config.yaml")).unwrap();
        assert_eq!(config.default_lane, "quick");

        assert!(ConfigLoader::write_defaults(&target, true).unwrap());
        let config = ConfigLoader::load_from_file(target.join("config.yaml")).unwrap();
        assert_eq!(config.default_lane, "standard");
    }
}
