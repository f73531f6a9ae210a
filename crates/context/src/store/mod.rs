//! Data access seams of the context engine
//!
//! Each service depends only on the capability it needs:
//! - `ArtifactCatalog`: artifact metadata and program membership
//! - `SimilaritySearch`: embedding neighbours of an artifact
//! - `EntityStore`: people and the co-occurrence graph
//! - `TemporalStore`: time-ordered artifacts and detected sequences
//! - `FactStore`: extracted facts
//! - `ContextCacheStore`: durable tier of the context cache

#[cfg(test)]
mod memory;
mod postgres;

#[cfg(test)]
pub(crate) use memory::{Capability, InMemoryStore, MemorySharedCache};
pub use postgres::PgContextStore;

use crate::model::{
    ArtifactCandidate, ArtifactRef, ArtifactSequence, CachedContext, Fact, PersonRecord,
    PersonRelationship,
};
use cerberus_common::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Minimum cosine similarity for a semantic neighbour
pub const MIN_SEMANTIC_SIMILARITY: f64 = 0.6;

#[async_trait::async_trait]
pub trait ArtifactCatalog: Send + Sync {
    async fn artifact(&self, artifact_id: Uuid) -> Result<Option<ArtifactRef>>;

    /// Live (non-deleted) artifacts of a program
    async fn artifact_ids_by_program(&self, program_id: Uuid) -> Result<Vec<Uuid>>;

    /// Most recent artifacts without an unexpired durable cache entry
    async fn recent_without_cache(&self, program_id: Uuid, limit: usize) -> Result<Vec<ArtifactRef>>;
}

#[async_trait::async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Completed artifacts in the target's program above
    /// `MIN_SEMANTIC_SIMILARITY`, most similar first, with `scores.semantic` set
    async fn semantically_related(&self, target: &ArtifactRef, limit: usize) -> Result<Vec<ArtifactCandidate>>;
}

#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// People of one artifact, most mentioned first
    async fn persons_by_artifact(&self, artifact_id: Uuid) -> Result<Vec<PersonRecord>>;

    /// Artifacts sharing at least two people with the target
    async fn artifacts_with_shared_people(
        &self,
        target: &ArtifactRef,
        person_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<ArtifactCandidate>>;

    /// Edges touching a person, highest co-occurrence first
    async fn relationships(&self, person_id: Uuid, program_id: Uuid) -> Result<Vec<PersonRelationship>>;

    /// All edges of a program with at least `min_co_occurrences`
    async fn program_relationships(&self, program_id: Uuid, min_co_occurrences: u32) -> Result<Vec<PersonRelationship>>;

    /// Record that the canonical pair (`person_a` < `person_b`) co-occurs in
    /// `artifact_id`; a pair already listing the artifact is left unchanged
    async fn upsert_edge(&self, program_id: Uuid, person_a: Uuid, person_b: Uuid, artifact_id: Uuid) -> Result<()>;

    /// Most mentioned people of a program, aggregated across artifacts
    async fn key_people(&self, program_id: Uuid, limit: usize) -> Result<Vec<PersonRecord>>;

    async fn count_unique_people(&self, program_id: Uuid) -> Result<usize>;
}

#[async_trait::async_trait]
pub trait TemporalStore: Send + Sync {
    /// Completed artifacts within `window_days` of the target, closest first
    async fn temporally_related(
        &self,
        target: &ArtifactRef,
        window_days: i64,
        limit: usize,
    ) -> Result<Vec<ArtifactCandidate>>;

    /// Program artifacts uploaded in `[start, end]`, oldest first
    async fn artifacts_in_range(
        &self,
        program_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRef>>;

    /// All live program artifacts, oldest first
    async fn artifacts_by_program(&self, program_id: Uuid) -> Result<Vec<ArtifactRef>>;

    /// Swap the program's persisted sequences for `sequences`
    async fn replace_sequences(&self, program_id: Uuid, sequences: &[ArtifactSequence]) -> Result<()>;

    /// Persisted sequences, latest start first
    async fn sequences_by_program(&self, program_id: Uuid) -> Result<Vec<ArtifactSequence>>;
}

#[async_trait::async_trait]
pub trait FactStore: Send + Sync {
    async fn facts_by_artifacts(&self, artifact_ids: &[Uuid]) -> Result<Vec<Fact>>;

    /// Facts with a given key across a program, most confident first
    async fn facts_by_key(&self, program_id: Uuid, key: &str) -> Result<Vec<Fact>>;

    async fn facts_by_program(&self, program_id: Uuid) -> Result<Vec<Fact>>;
}

/// Entry counts of the durable tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DurableCacheStats {
    pub active_entries: u64,
    pub expired_entries: u64,
    pub avg_token_count: f64,
}

#[async_trait::async_trait]
pub trait ContextCacheStore: Send + Sync {
    /// The stored entry, expired or not; callers check `expires_at`
    async fn get_entry(&self, artifact_id: Uuid) -> Result<Option<CachedContext>>;

    /// Insert or replace the entry of `entry.artifact_id`
    async fn upsert_entry(&self, entry: &CachedContext) -> Result<()>;

    async fn delete_entry(&self, artifact_id: Uuid) -> Result<bool>;

    /// Delete every entry past its expiry, returning how many went
    async fn delete_expired(&self) -> Result<u64>;

    async fn stats(&self) -> Result<DurableCacheStats>;
}

/// One handle per capability, shared by the services
#[derive(Clone)]
pub struct ContextStores {
    pub catalog: Arc<dyn ArtifactCatalog>,
    pub similarity: Arc<dyn SimilaritySearch>,
    pub entities: Arc<dyn EntityStore>,
    pub temporal: Arc<dyn TemporalStore>,
    pub facts: Arc<dyn FactStore>,
    pub cache: Arc<dyn ContextCacheStore>,
}

impl ContextStores {
    /// Every capability served by one backing store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ArtifactCatalog
            + SimilaritySearch
            + EntityStore
            + TemporalStore
            + FactStore
            + ContextCacheStore
            + 'static,
    {
        Self {
            catalog: store.clone(),
            similarity: store.clone(),
            entities: store.clone(),
            temporal: store.clone(),
            facts: store.clone(),
            cache: store,
        }
    }
}
