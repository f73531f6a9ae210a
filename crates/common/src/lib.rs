//! Cerberus Common Library
//!
//! Shared code for the Cerberus context services including:
//! - Database models and connection management
//! - Error types and handling
//! - Configuration management
//! - Shared (Redis) cache client
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use cache::{Cache, SharedCache};
pub use config::AppConfig;
pub use errors::{AppError, ErrorCode, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
