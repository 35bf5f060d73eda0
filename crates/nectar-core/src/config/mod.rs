//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `NECTAR_CONFIG` env var
//! 3. **Environment variables**: `NECTAR__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: bind address and request concurrency for the embedding HTTP layer
//! - [`NetworksConfig`]: allow-listed network identifiers
//! - [`OracleConfig`]: upstream market data sources, freshness window, retry and
//!   circuit breaker settings
//! - [`CacheConfig`]: default TTL for cached values
//! - [`QueueConfig`]: default concurrency ceiling for task queues
//! - [`ValidationConfig`]: request validation limits (amount ceiling)
//! - [`LoggingConfig`]: log level and format
//!
//! # Validation
//!
//! Configuration is validated at load time. Invalid configurations (empty
//! source list, zero TTLs, zero concurrency) return errors rather than
//! failing silently at first use.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 4020
//!
//! [[oracle.sources]]
//! name = "venus-lending"
//! kind = "lending"
//! url = "https://api.venus.example/pools"
//! timeout_seconds = 5
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// HTTP server settings consumed by the embedding API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address the API layer binds to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `4020`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrent requests the runtime is sized for. Defaults to `100`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    4020
}

fn default_max_concurrent_requests() -> usize {
    100
}

/// Allow-listed network identifiers accepted by validation and the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworksConfig {
    /// Network ids requests may reference. Cannot be empty.
    #[serde(default = "default_allowed_networks")]
    pub allowed: Vec<String>,
}

fn default_allowed_networks() -> Vec<String> {
    vec!["bsc".to_string(), "bscTestnet".to_string(), "opbnb".to_string()]
}

/// The category of data an upstream source provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Spot price feed (native token price in USD).
    Price,
    /// Lending protocol feed (pool APY / TVL / health).
    Lending,
    /// DEX liquidity feed (pool APY / TVL).
    Dex,
    /// Chain RPC endpoint (liveness and head data).
    Rpc,
}

impl SourceKind {
    /// Static label for logging and health reporting.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Price => "price",
            SourceKind::Lending => "lending",
            SourceKind::Dex => "dex",
            SourceKind::Rpc => "rpc",
        }
    }
}

/// Configuration for a single upstream market data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProvider {
    /// Human-readable identifier for this source (e.g., "venus-lending").
    pub name: String,

    /// What kind of data the source serves.
    pub kind: SourceKind,

    /// HTTPS endpoint URL. Must start with `http`.
    pub url: String,

    /// Per-attempt request timeout in seconds. Defaults to `5`.
    #[serde(default = "default_source_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Consecutive failures before the source's circuit opens. Defaults to `3`.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial call. Defaults to `30`.
    #[serde(default = "default_breaker_cooldown_seconds")]
    pub circuit_breaker_cooldown_seconds: u64,
}

fn default_source_timeout_seconds() -> u64 {
    5
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_seconds() -> u64 {
    30
}

/// Oracle aggregation settings: sources, freshness, retry and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Configured upstream sources. Cannot be empty.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceProvider>,

    /// Seconds a cached snapshot is considered fresh. Defaults to `300`.
    #[serde(default = "default_freshness_seconds")]
    pub freshness_seconds: u64,

    /// Upper bound in seconds for one whole snapshot fan-out. Defaults to `10`.
    #[serde(default = "default_overall_deadline_seconds")]
    pub overall_deadline_seconds: u64,

    /// Maximum attempts per source call (first try + retries). Defaults to `3`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds, doubled per retry. Defaults to `100`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Maximum age in seconds for an upstream observation to count as fresh.
    /// Defaults to `600`.
    #[serde(default = "default_max_observation_age_seconds")]
    pub max_observation_age_seconds: u64,
}

fn default_sources() -> Vec<SourceProvider> {
    vec![
        SourceProvider {
            name: "bnb-price".to_string(),
            kind: SourceKind::Price,
            url: "https://api.price.example/v1/bnb".to_string(),
            timeout_seconds: default_source_timeout_seconds(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_seconds: default_breaker_cooldown_seconds(),
        },
        SourceProvider {
            name: "venus-lending".to_string(),
            kind: SourceKind::Lending,
            url: "https://api.venus.example/pools".to_string(),
            timeout_seconds: default_source_timeout_seconds(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_seconds: default_breaker_cooldown_seconds(),
        },
        SourceProvider {
            name: "pancake-dex".to_string(),
            kind: SourceKind::Dex,
            url: "https://api.pancake.example/pairs".to_string(),
            timeout_seconds: default_source_timeout_seconds(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_seconds: default_breaker_cooldown_seconds(),
        },
    ]
}

fn default_freshness_seconds() -> u64 {
    300
}

fn default_overall_deadline_seconds() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_max_observation_age_seconds() -> u64 {
    600
}

/// Cache sizing and TTL settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default entry time-to-live in seconds. Must be greater than 0. Defaults to `300`.
    #[serde(default = "default_cache_ttl_seconds")]
    pub default_ttl_seconds: u64,

    /// Interval for the background expired-entry sweep in seconds. Defaults to `60`.
    #[serde(default = "default_janitor_interval_seconds")]
    pub janitor_interval_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_janitor_interval_seconds() -> u64 {
    60
}

/// Task queue defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrency ceiling applied when a queue is created without an explicit
    /// limit. Must be greater than 0. Defaults to `4`.
    #[serde(default = "default_queue_concurrency")]
    pub default_max_concurrency: usize,
}

fn default_queue_concurrency() -> usize {
    4
}

/// Request validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Sanity ceiling for amount fields (in whole tokens). Defaults to `1_000_000`.
    #[serde(default = "default_max_amount")]
    pub max_amount: f64,
}

fn default_max_amount() -> f64 {
    1_000_000.0
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration containing all subsystem settings.
///
/// Loaded once at startup and passed into the runtime; no component reads
/// configuration lazily from the environment afterwards.
///
/// Environment overrides use the `NECTAR` prefix with `__` as a separator
/// (e.g. `NECTAR__SERVER__BIND_PORT=8080` maps to `server.bind_port`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g., "development", "production"). Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HTTP server sizing for the embedding API layer.
    #[serde(default)]
    pub server: ServerConfig,

    /// Network allow-list.
    #[serde(default)]
    pub networks: NetworksConfig,

    /// Oracle aggregation settings.
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Cache TTL settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Task queue defaults.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Request validation limits.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self { allowed: default_allowed_networks() }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            freshness_seconds: default_freshness_seconds(),
            overall_deadline_seconds: default_overall_deadline_seconds(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_observation_age_seconds: default_max_observation_age_seconds(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_cache_ttl_seconds(),
            janitor_interval_seconds: default_janitor_interval_seconds(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { default_max_concurrency: default_queue_concurrency() }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { max_amount: default_max_amount() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            networks: NetworksConfig::default(),
            oracle: OracleConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            validation: ValidationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `NECTAR__` prefix can override any
    /// configuration value. Use `__` as a separator for nested fields
    /// (e.g., `NECTAR__SERVER__BIND_PORT=8080`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 4020)?
            .set_default("server.max_concurrent_requests", 100)?
            .set_default("cache.default_ttl_seconds", 300)?
            .set_default("cache.janitor_interval_seconds", 60)?
            .set_default("queue.default_max_concurrency", 4)?
            .set_default("oracle.freshness_seconds", 300)?
            .set_default("oracle.overall_deadline_seconds", 10)?
            .set_default("oracle.max_attempts", 3)?
            .set_default("oracle.backoff_base_ms", 100)?
            .set_default("oracle.max_observation_age_seconds", 600)?
            .set_default("validation.max_amount", 1_000_000.0)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("NECTAR").prefix_separator("__").separator("__"),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// Loads configuration from `config/nectar.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `NECTAR_CONFIG`
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("NECTAR_CONFIG").unwrap_or_else(|_| "config/nectar.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the snapshot freshness window as a [`Duration`].
    #[must_use]
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.oracle.freshness_seconds)
    }

    /// Returns the overall snapshot fan-out deadline as a [`Duration`].
    #[must_use]
    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.oracle.overall_deadline_seconds)
    }

    /// Returns the default cache TTL as a [`Duration`].
    #[must_use]
    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_seconds)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - At least one network and one oracle source configured
    /// - Source URLs are http(s)
    /// - All required numeric values are greater than zero
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.networks.allowed.is_empty() {
            return Err("No networks configured".to_string());
        }

        if self.oracle.sources.is_empty() {
            return Err("No oracle sources configured".to_string());
        }

        for source in &self.oracle.sources {
            if source.url.is_empty() {
                return Err(format!("Empty URL for oracle source: {}", source.name));
            }
            if !source.url.starts_with("http") {
                return Err(format!(
                    "Invalid URL for oracle source {}: {}",
                    source.name, source.url
                ));
            }
            if source.timeout_seconds == 0 {
                return Err(format!("Zero timeout for oracle source: {}", source.name));
            }
            if source.circuit_breaker_threshold == 0 {
                return Err(format!(
                    "Circuit breaker threshold must be greater than 0 for source: {}",
                    source.name
                ));
            }
        }

        if self.oracle.freshness_seconds == 0 {
            return Err("Oracle freshness window must be greater than 0".to_string());
        }

        if self.oracle.max_attempts == 0 {
            return Err("Oracle max attempts must be greater than 0".to_string());
        }

        if self.cache.default_ttl_seconds == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }

        if self.queue.default_max_concurrency == 0 {
            return Err("Queue concurrency must be greater than 0".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if !(self.validation.max_amount > 0.0) {
            return Err("Amount ceiling must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
