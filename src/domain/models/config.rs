use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::lane::LaneConfig;

/// Main configuration structure for DeepThink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry policy for transient provider errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Process-wide provider rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Pass cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background maintenance configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Model provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Evidence source configuration
    #[serde(default)]
    pub evidence: EvidenceConfig,

    /// Per-model price overrides
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Lane used when none is requested
    #[serde(default = "default_lane_id")]
    pub default_lane: String,

    /// Available lanes
    #[serde(default = "LaneConfig::builtin")]
    pub lanes: Vec<LaneConfig>,
}

fn default_lane_id() -> String {
    "standard".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            maintenance: MaintenanceConfig::default(),
            provider: ProviderConfig::default(),
            evidence: EvidenceConfig::default(),
            pricing: PricingConfig::default(),
            default_lane: default_lane_id(),
            lanes: LaneConfig::builtin(),
        }
    }
}

impl Config {
    /// Look up a lane by id, falling back to the default lane when `id` is `None`.
    pub fn lane(&self, id: Option<&str>) -> Option<&LaneConfig> {
        let wanted = id.unwrap_or(&self.default_lane);
        self.lanes.iter().find(|l| l.id == wanted)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".deepthink/deepthink.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> f64 {
    10.0
}

const fn default_burst_size() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Pass cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time-to-live for cached pass outputs in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_cache_ttl_secs() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MaintenanceConfig {
    /// Interval between maintenance cycles in seconds
    #[serde(default = "default_maintenance_interval_secs")]
    pub interval_secs: u64,

    /// How many months of cost partitions to create ahead of time
    #[serde(default = "default_partition_months_ahead")]
    pub partition_months_ahead: u32,
}

const fn default_maintenance_interval_secs() -> u64 {
    3600
}

const fn default_partition_months_ahead() -> u32 {
    2
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval_secs(),
            partition_months_ahead: default_partition_months_ahead(),
        }
    }
}

/// Which provider implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    /// Deterministic offline responses
    Scripted,
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    /// API key (can also be set via ANTHROPIC_API_KEY env var)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for API (for testing/proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// `anthropic-version` header value
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

const fn default_provider_kind() -> ProviderKind {
    ProviderKind::Anthropic
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            api_key: None,
            base_url: None,
            api_version: default_api_version(),
        }
    }
}

/// Evidence source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EvidenceConfig {
    /// Directory of text files served by the `corpus` source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_dir: Option<String>,
}

/// Price of one model in USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Per-model price overrides, matched by substring like the built-in table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PricingConfig {
    #[serde(default)]
    pub overrides: HashMap<String, ModelPrice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lane_lookup() {
        let config = Config::default();
        assert_eq!(config.lane(None).map(|l| l.id.as_str()), Some("standard"));
        assert_eq!(config.lane(Some("quick")).map(|l| l.candidate_count), Some(1));
        assert!(config.lane(Some("missing")).is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "cache:\n  ttl_secs: 60\nprovider:\n  kind: scripted\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert!(config.cache.enabled);
        assert_eq!(config.provider.kind, ProviderKind::Scripted);
        assert_eq!(config.lanes.len(), 2);
    }
}
