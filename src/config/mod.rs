use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub ens: EnsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection URL - overridden by env REDIS_URL
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key namespace shared by the queue, caches, and store
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceConfig {
    /// Price feed API root - overridden by env PRICE_FEED_URL
    #[serde(default = "default_price_feed_url")]
    pub feed_url: String,
    /// Spot price cache TTL in seconds
    #[serde(default = "default_price_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnsConfig {
    /// Ethereum JSON-RPC endpoint - overridden by env RPC_URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// TTL for successful lookups (name found or confirmed absent)
    #[serde(default = "default_positive_ttl")]
    pub positive_ttl_secs: u64,
    /// TTL for failed lookups, kept short to suppress retry storms
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Attempts before a job is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// How long a dequeued job may run before it is redelivered
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// How long completion markers are kept for duplicate suppression
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Idle poll interval for workers and the maintenance tick
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent job handlers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_prefix() -> String {
    "gavel".to_string()
}
fn default_price_feed_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_price_ttl() -> u64 {
    60
}
fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_positive_ttl() -> u64 {
    3600
}
fn default_negative_ttl() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_visibility_timeout() -> u64 {
    60
}
fn default_retention() -> u64 {
    86400
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_concurrency() -> usize {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            feed_url: default_price_feed_url(),
            cache_ttl_secs: default_price_ttl(),
        }
    }
}

impl Default for EnsConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            positive_ttl_secs: default_positive_ttl(),
            negative_ttl_secs: default_negative_ttl(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            visibility_timeout_secs: default_visibility_timeout(),
            retention_secs: default_retention(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Default config with env-only overrides (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(url) = std::env::var("RPC_URL") {
            self.ens.rpc_url = url;
        }
        if let Ok(url) = std::env::var("PRICE_FEED_URL") {
            self.price.feed_url = url;
        }
    }
}
