//! Configuration management for Cerberus services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration (shared context tier)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Context engine tuning
    #[serde(default)]
    pub context: ContextConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

/// Relative weights of the five relevance signals
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct WeightsConfig {
    pub semantic: f64,
    pub entity: f64,
    pub temporal: f64,
    pub type_match: f64,
    pub density: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            semantic: 0.40,
            entity: 0.25,
            temporal: 0.20,
            type_match: 0.10,
            density: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Token budget used when a caller does not supply one
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Scoring weights
    #[serde(default)]
    pub weights: WeightsConfig,

    /// Candidates fetched per discovery source
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Half-width of the temporal discovery window in days
    #[serde(default = "default_temporal_window")]
    pub temporal_window_days: i64,

    /// Whether assembled bundles are cached at all
    #[serde(default = "default_enabled")]
    pub enable_caching: bool,

    /// Shared (Redis) tier TTL in seconds
    #[serde(default = "default_shared_ttl")]
    pub shared_ttl_secs: u64,

    /// Durable tier TTL in seconds
    #[serde(default = "default_durable_ttl")]
    pub durable_ttl_secs: u64,

    /// Process-local tier TTL in seconds
    #[serde(default = "default_local_ttl")]
    pub local_ttl_secs: u64,

    /// Maximum entries held in the process-local tier (0 disables it)
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    /// Background worker count
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Bounded background queue capacity
    #[serde(default = "default_worker_queue")]
    pub worker_queue_capacity: usize,

    /// Interval between expired-entry sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Grace period for draining background work on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_prefix() -> String { "cerberus".to_string() }
fn default_token_budget() -> usize { 4000 }
fn default_candidate_limit() -> usize { 10 }
fn default_temporal_window() -> i64 { 90 }
fn default_enabled() -> bool { true }
fn default_shared_ttl() -> u64 { 86_400 }
fn default_durable_ttl() -> u64 { 7 * 86_400 }
fn default_local_ttl() -> u64 { 600 }
fn default_local_capacity() -> usize { 1024 }
fn default_worker_count() -> usize { 4 }
fn default_worker_queue() -> usize { 256 }
fn default_sweep_interval() -> u64 { 3600 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "cerberus-context".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__CONTEXT__TOKEN_BUDGET=6000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }
}

impl ContextConfig {
    pub fn shared_ttl(&self) -> Duration {
        Duration::from_secs(self.shared_ttl_secs)
    }

    pub fn durable_ttl(&self) -> Duration {
        Duration::from_secs(self.durable_ttl_secs)
    }

    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            weights: WeightsConfig::default(),
            candidate_limit: default_candidate_limit(),
            temporal_window_days: default_temporal_window(),
            enable_caching: default_enabled(),
            shared_ttl_secs: default_shared_ttl(),
            durable_ttl_secs: default_durable_ttl(),
            local_ttl_secs: default_local_ttl(),
            local_capacity: default_local_capacity(),
            worker_count: default_worker_count(),
            worker_queue_capacity: default_worker_queue(),
            sweep_interval_secs: default_sweep_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/cerberus".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            redis: None,
            context: ContextConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
