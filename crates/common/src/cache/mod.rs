//! Redis cache integration
//!
//! Provides:
//! - Multiplexed connection management
//! - String get/set operations with TTL
//! - The `SharedCache` seam used by the context cache's shared tier

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Redis cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "cerberus".to_string(),
        }
    }
}

impl From<&RedisConfig> for CacheConfig {
    fn from(config: &RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            key_prefix: config.key_prefix.clone(),
        }
    }
}

/// String-valued TTL cache shared between service instances.
///
/// Values are opaque strings; callers own serialization.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// The value with its remaining lifetime, when the backend tracks one
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>> {
        Ok(self.get_raw(key).await?.map(|value| (value, None)))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Returns whether a key was removed
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Redis cache client
pub struct Cache {
    connection: RwLock<MultiplexedConnection>,
    config: CacheConfig,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to create Redis client: {}", e),
            })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl SharedCache for Cache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        if value.is_some() {
            debug!(key = %full_key, "Cache hit");
        } else {
            debug!(key = %full_key, "Cache miss");
        }
        Ok(value)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&full_key)
            .cmd("PTTL")
            .arg(&full_key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, hit = value.is_some(), pttl, "Cache lookup");
        // PTTL is -1 without an expiry and -2 for a missing key
        let remaining = u64::try_from(pttl).ok().map(Duration::from_millis);
        Ok(value.map(|value| (value, remaining)))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.set_ex::<_, _, ()>(&full_key, value, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to delete key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }
}

/// Cache key builder helpers
pub mod keys {
    use uuid::Uuid;

    /// Namespace of assembled context bundles
    pub const ARTIFACT_CONTEXT: &str = "artifact:context";

    /// Build the shared-tier key of an artifact's context bundle
    pub fn artifact_context(artifact_id: Uuid) -> String {
        format!("{}:{}", ARTIFACT_CONTEXT, artifact_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        let artifact_id = uuid::Uuid::new_v4();
        let key = keys::artifact_context(artifact_id);
        assert!(key.starts_with("artifact:context:"));
        assert!(key.ends_with(&artifact_id.to_string()));
    }

    #[test]
    fn test_cache_config_from_redis_config() {
        let redis = RedisConfig {
            url: "redis://cache:6379".into(),
            key_prefix: "ctx".into(),
        };
        let config = CacheConfig::from(&redis);
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.key_prefix, "ctx");
    }
}
