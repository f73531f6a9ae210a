//! Cerberus Context Engine
//!
//! Cross-document context for artifact analysis:
//! - Relevance scoring and budget-constrained selection of related artifacts
//! - Co-occurrence graph of the people mentioned across a program
//! - Timelines and recurring document sequences
//! - Fact aggregation with conflict detection
//! - A three-tier cache of assembled bundles
//!
//! `ContextOrchestrator` composes the services into one `EnrichedContext`
//! per artifact; `render` turns a bundle into prompt sections.

pub mod cache;
pub mod entity_graph;
pub mod facts;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod scoring;
pub mod store;
pub mod timeline;
pub mod worker;

pub use cache::{CacheStats, CacheWriteReport, ContextCache, ContextCacheConfig, LifecycleEvent, TierWrite};
pub use entity_graph::EntityGraphService;
pub use facts::FactAggregationService;
pub use model::EnrichedContext;
pub use orchestrator::{BudgetAllocation, ContextOrchestrator};
pub use render::{render, RenderedContext};
pub use scoring::{ScoringEngine, ScoringWeights};
pub use store::{ContextStores, PgContextStore};
pub use timeline::TimelineService;
pub use worker::{BackgroundWorker, TaskFailure, WorkerStats};
