//! Three-tier cache of assembled context bundles
//!
//! Provides:
//! - A process-local tier with its own TTL and capacity
//! - The shared tier (Redis) behind `SharedCache`
//! - The durable tier behind `ContextCacheStore`
//! - Program-wide invalidation driven by lifecycle events
//!
//! Reads go local, shared, durable. A durable hit refills the local tier
//! inline and the shared tier through the background worker. Writes go to
//! every configured tier independently; a failing tier never fails the
//! others. An entry past its durable expiry is never served.

use crate::model::{CachedContext, EnrichedContext};
use crate::store::{ArtifactCatalog, ContextCacheStore, DurableCacheStats};
use crate::worker::BackgroundWorker;
use cerberus_common::cache::keys;
use cerberus_common::config::ContextConfig;
use cerberus_common::{metrics, AppError, Result, SharedCache};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Schema version written with durable entries
pub const CACHE_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCacheConfig {
    pub local_ttl: Duration,
    /// 0 disables the local tier
    pub local_capacity: usize,
    pub shared_ttl: Duration,
    pub durable_ttl: Duration,
}

impl From<&ContextConfig> for ContextCacheConfig {
    fn from(config: &ContextConfig) -> Self {
        Self {
            local_ttl: config.local_ttl(),
            local_capacity: config.local_capacity,
            shared_ttl: config.shared_ttl(),
            durable_ttl: config.durable_ttl(),
        }
    }
}

impl Default for ContextCacheConfig {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

/// Outcome of writing one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierWrite {
    /// Tier not configured
    Skipped,
    Written,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWriteReport {
    pub local: TierWrite,
    pub shared: TierWrite,
    pub durable: TierWrite,
}

impl CacheWriteReport {
    pub fn any_written(&self) -> bool {
        [self.local, self.shared, self.durable].contains(&TierWrite::Written)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub local_entries: usize,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    /// Absent when no durable tier is configured or it could not be read
    pub durable: Option<DurableCacheStats>,
}

/// Upstream events that make cached bundles of a program stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    ArtifactUploaded,
    ArtifactReprocessed,
    ArtifactDeleted,
    StakeholderMerged,
    ProgramConfigUpdated,
    ProgramTaxonomyUpdated,
    RiskCreated,
    RiskUpdated,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 8] = [
        LifecycleEvent::ArtifactUploaded,
        LifecycleEvent::ArtifactReprocessed,
        LifecycleEvent::ArtifactDeleted,
        LifecycleEvent::StakeholderMerged,
        LifecycleEvent::ProgramConfigUpdated,
        LifecycleEvent::ProgramTaxonomyUpdated,
        LifecycleEvent::RiskCreated,
        LifecycleEvent::RiskUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::ArtifactUploaded => "artifact.uploaded",
            LifecycleEvent::ArtifactReprocessed => "artifact.reprocessed",
            LifecycleEvent::ArtifactDeleted => "artifact.deleted",
            LifecycleEvent::StakeholderMerged => "stakeholder.merged",
            LifecycleEvent::ProgramConfigUpdated => "program.config.updated",
            LifecycleEvent::ProgramTaxonomyUpdated => "program.taxonomy.updated",
            LifecycleEvent::RiskCreated => "risk.created",
            LifecycleEvent::RiskUpdated => "risk.updated",
        }
    }
}

impl FromStr for LifecycleEvent {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| AppError::InvalidFormat {
                message: format!("unknown lifecycle event '{}'", s),
            })
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct LocalEntry {
    context: EnrichedContext,
    inserted_at: Instant,
    expires_at: Instant,
}

#[derive(Default)]
struct HitCounters {
    local: AtomicU64,
    shared: AtomicU64,
    durable: AtomicU64,
    misses: AtomicU64,
}

pub struct ContextCache {
    local: DashMap<Uuid, LocalEntry>,
    shared: Option<Arc<dyn SharedCache>>,
    durable: Option<Arc<dyn ContextCacheStore>>,
    catalog: Arc<dyn ArtifactCatalog>,
    worker: Option<Arc<BackgroundWorker>>,
    config: ContextCacheConfig,
    counters: HitCounters,
}

impl ContextCache {
    /// A cache with only the local tier; add the others with the `with_*` builders
    pub fn new(catalog: Arc<dyn ArtifactCatalog>, config: ContextCacheConfig) -> Self {
        Self {
            local: DashMap::new(),
            shared: None,
            durable: None,
            catalog,
            worker: None,
            config,
            counters: HitCounters::default(),
        }
    }

    pub fn with_shared(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn with_durable(mut self, durable: Arc<dyn ContextCacheStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Worker used to refill the shared tier after a durable hit
    pub fn with_worker(mut self, worker: Arc<BackgroundWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    fn local_enabled(&self) -> bool {
        self.config.local_capacity > 0
    }

    /// Shared TTL capped by the durable tier, so no copy outlives the
    /// authoritative entry
    fn shared_ttl(&self) -> Duration {
        match self.durable {
            Some(_) => self.config.shared_ttl.min(self.config.durable_ttl),
            None => self.config.shared_ttl,
        }
    }

    /// Local TTL capped by every configured tier above it
    fn local_ttl(&self) -> Duration {
        let mut ttl = self.config.local_ttl;
        if self.shared.is_some() {
            ttl = ttl.min(self.shared_ttl());
        }
        if self.durable.is_some() {
            ttl = ttl.min(self.config.durable_ttl);
        }
        ttl
    }

    /// Look up a bundle across the tiers; tier errors count as misses.
    /// Entries are keyed by artifact alone, so the bundle may have been
    /// built for a different `token_budget` than the caller wants.
    pub async fn get(&self, artifact_id: Uuid) -> Option<EnrichedContext> {
        if let Some(context) = self.get_local(artifact_id) {
            self.counters.local.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache(true, "local");
            return Some(context);
        }
        if self.local_enabled() {
            metrics::record_cache(false, "local");
        }

        if let Some((context, remaining)) = self.get_shared(artifact_id).await {
            self.counters.shared.fetch_add(1, Ordering::Relaxed);
            let ttl = remaining.map_or(self.local_ttl(), |remaining| self.local_ttl().min(remaining));
            self.put_local(artifact_id, &context, ttl);
            return Some(context);
        }

        if let Some(entry) = self.get_durable(artifact_id).await {
            self.counters.durable.fetch_add(1, Ordering::Relaxed);
            let remaining = (entry.expires_at - Utc::now()).to_std().unwrap_or_default();
            self.put_local(artifact_id, &entry.context, self.local_ttl().min(remaining));
            self.repopulate_shared(&entry, remaining).await;
            return Some(entry.context);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn get_local(&self, artifact_id: Uuid) -> Option<EnrichedContext> {
        if !self.local_enabled() {
            return None;
        }

        let expired = match self.local.get(&artifact_id) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.context.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.local.remove(&artifact_id);
        }
        None
    }

    async fn get_shared(&self, artifact_id: Uuid) -> Option<(EnrichedContext, Option<Duration>)> {
        let shared = self.shared.as_ref()?;
        let key = keys::artifact_context(artifact_id);

        let raw = match shared.get_with_ttl(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(artifact_id = %artifact_id, error = %e, "Shared cache read failed, treating as miss");
                metrics::record_cache(false, "shared");
                return None;
            }
        };

        let context = raw.and_then(|(raw, remaining)| match serde_json::from_str::<EnrichedContext>(&raw) {
            Ok(context) => Some((context, remaining)),
            Err(e) => {
                warn!(artifact_id = %artifact_id, error = %e, "Undecodable shared cache entry ignored");
                None
            }
        });
        metrics::record_cache(context.is_some(), "shared");
        context
    }

    async fn get_durable(&self, artifact_id: Uuid) -> Option<CachedContext> {
        let durable = self.durable.as_ref()?;

        let entry = match durable.get_entry(artifact_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(artifact_id = %artifact_id, error = %e, "Durable cache read failed, treating as miss");
                metrics::record_cache(false, "durable");
                return None;
            }
        };

        match entry {
            Some(entry) if entry.is_expired_at(Utc::now()) => {
                debug!(artifact_id = %artifact_id, expired_at = %entry.expires_at, "Expired durable entry");
                if let Err(e) = durable.delete_entry(artifact_id).await {
                    warn!(artifact_id = %artifact_id, error = %e, "Failed to delete expired durable entry");
                }
                metrics::record_cache(false, "durable");
                None
            }
            Some(entry) => {
                metrics::record_cache(true, "durable");
                Some(entry)
            }
            None => {
                metrics::record_cache(false, "durable");
                None
            }
        }
    }

    /// Refill the shared tier with at most the entry's remaining lifetime
    async fn repopulate_shared(&self, entry: &CachedContext, remaining: Duration) {
        let Some(shared) = self.shared.clone() else {
            return;
        };

        let ttl_secs = self.shared_ttl().min(remaining).as_secs();
        if ttl_secs == 0 {
            return;
        }

        let payload = match serde_json::to_string(&entry.context) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(artifact_id = %entry.artifact_id, error = %e, "Failed to encode bundle for shared cache");
                return;
            }
        };
        let key = keys::artifact_context(entry.artifact_id);

        let write = async move { shared.set_raw(&key, &payload, ttl_secs).await };

        match &self.worker {
            Some(worker) => {
                let name = format!("cache-repopulate-{}", entry.artifact_id);
                if let Err(e) = worker.submit(name, write) {
                    debug!(artifact_id = %entry.artifact_id, error = %e, "Shared cache refill not queued");
                }
            }
            None => {
                if let Err(e) = write.await {
                    warn!(artifact_id = %entry.artifact_id, error = %e, "Shared cache refill failed");
                    metrics::record_cache_write_failure("shared");
                }
            }
        }
    }

    fn put_local(&self, artifact_id: Uuid, context: &EnrichedContext, ttl: Duration) -> TierWrite {
        if !self.local_enabled() {
            return TierWrite::Skipped;
        }
        if ttl.is_zero() {
            return TierWrite::Skipped;
        }

        if !self.local.contains_key(&artifact_id) && self.local.len() >= self.config.local_capacity {
            self.evict_local();
        }

        let now = Instant::now();
        self.local.insert(
            artifact_id,
            LocalEntry {
                context: context.clone(),
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
        TierWrite::Written
    }

    /// Drop expired entries, then the oldest one if still at capacity
    fn evict_local(&self) {
        let now = Instant::now();
        self.local.retain(|_, entry| entry.expires_at > now);

        if self.local.len() < self.config.local_capacity {
            return;
        }
        let oldest = self
            .local
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| *entry.key());
        if let Some(artifact_id) = oldest {
            self.local.remove(&artifact_id);
        }
    }

    /// Write a bundle to every configured tier
    pub async fn put(&self, artifact_id: Uuid, context: &EnrichedContext) -> CacheWriteReport {
        let local = self.put_local(artifact_id, context, self.local_ttl());

        let shared_ttl_secs = self.shared_ttl().as_secs();
        let shared = match &self.shared {
            None => TierWrite::Skipped,
            // Sub-second lifetimes cannot be expressed to the shared tier
            Some(_) if shared_ttl_secs == 0 => TierWrite::Skipped,
            Some(shared) => {
                let written = match serde_json::to_string(context) {
                    Ok(payload) => shared
                        .set_raw(&keys::artifact_context(artifact_id), &payload, shared_ttl_secs)
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match written {
                    Ok(()) => TierWrite::Written,
                    Err(e) => {
                        warn!(artifact_id = %artifact_id, error = %e, "Shared cache write failed");
                        metrics::record_cache_write_failure("shared");
                        TierWrite::Failed
                    }
                }
            }
        };

        let durable = match &self.durable {
            None => TierWrite::Skipped,
            Some(durable) => {
                let entry = self.durable_entry(artifact_id, context);
                match durable.upsert_entry(&entry).await {
                    Ok(()) => TierWrite::Written,
                    Err(e) => {
                        warn!(artifact_id = %artifact_id, error = %e, "Durable cache write failed");
                        metrics::record_cache_write_failure("durable");
                        TierWrite::Failed
                    }
                }
            }
        };

        let report = CacheWriteReport { local, shared, durable };
        debug!(artifact_id = %artifact_id, ?report, "Context cached");
        report
    }

    fn durable_entry(&self, artifact_id: Uuid, context: &EnrichedContext) -> CachedContext {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.durable_ttl).unwrap_or_else(|_| chrono::Duration::days(7));
        CachedContext {
            artifact_id,
            program_id: context.program_id,
            context: context.clone(),
            token_count: context.estimated_tokens,
            artifacts_included: context.artifacts_included(),
            version: CACHE_VERSION,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Remove an artifact's bundle from every tier; true if any tier held it
    pub async fn invalidate(&self, artifact_id: Uuid) -> bool {
        let mut removed = self.local.remove(&artifact_id).is_some();

        if let Some(shared) = &self.shared {
            match shared.delete(&keys::artifact_context(artifact_id)).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => warn!(artifact_id = %artifact_id, error = %e, "Shared cache invalidation failed"),
            }
        }

        if let Some(durable) = &self.durable {
            match durable.delete_entry(artifact_id).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => warn!(artifact_id = %artifact_id, error = %e, "Durable cache invalidation failed"),
            }
        }

        removed
    }

    /// Invalidate every artifact of a program, returning how many were visited
    pub async fn invalidate_for_program(&self, program_id: Uuid) -> Result<usize> {
        let artifact_ids = self.catalog.artifact_ids_by_program(program_id).await?;

        for artifact_id in &artifact_ids {
            self.invalidate(*artifact_id).await;
        }

        info!(program_id = %program_id, artifacts = artifact_ids.len(), "Program context cache invalidated");
        Ok(artifact_ids.len())
    }

    /// React to a lifecycle event by name; unknown events are ignored
    pub async fn on_event(&self, event: &str, program_id: Uuid) -> Result<usize> {
        match event.parse::<LifecycleEvent>() {
            Ok(event) => {
                debug!(event = %event, program_id = %program_id, "Lifecycle event");
                self.invalidate_for_program(program_id).await
            }
            Err(_) => {
                debug!(event, program_id = %program_id, "Ignoring unrelated event");
                Ok(0)
            }
        }
    }

    /// Drop expired local entries and delete expired durable rows
    pub async fn sweep(&self) -> Result<u64> {
        let now = Instant::now();
        self.local.retain(|_, entry| entry.expires_at > now);

        let Some(durable) = &self.durable else {
            return Ok(0);
        };
        let deleted = durable.delete_expired().await?;
        metrics::record_cache_sweep(deleted);
        if deleted > 0 {
            info!(deleted, "Expired context cache entries swept");
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> CacheStats {
        let durable = match &self.durable {
            Some(durable) => match durable.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Failed to read durable cache stats");
                    None
                }
            },
            None => None,
        };

        CacheStats {
            local_entries: self.local.len(),
            local_hits: self.counters.local.load(Ordering::Relaxed),
            shared_hits: self.counters.shared.load(Ordering::Relaxed),
            durable_hits: self.counters.durable.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            durable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AggregatedFacts, ArtifactRef, EntityGraphContext, ProcessingStatus, Timeline, TokenBreakdown,
    };
    use crate::store::{Capability, InMemoryStore, MemorySharedCache};

    fn bundle(program_id: Uuid, artifact_id: Uuid) -> EnrichedContext {
        EnrichedContext {
            target_artifact_id: artifact_id,
            program_id,
            related_artifacts: Vec::new(),
            entity_graph: EntityGraphContext::default(),
            timeline: Timeline::default(),
            aggregated_facts: AggregatedFacts::default(),
            estimated_tokens: 120,
            token_budget: 4000,
            breakdown: TokenBreakdown {
                entity_graph: 120,
                ..Default::default()
            },
            was_truncated: false,
        }
    }

    fn artifact(program_id: Uuid) -> ArtifactRef {
        ArtifactRef {
            artifact_id: Uuid::new_v4(),
            program_id,
            filename: "status.pdf".into(),
            category: Some("report".into()),
            uploaded_at: Utc::now(),
            status: ProcessingStatus::Completed,
            summary: None,
        }
    }

    fn config() -> ContextCacheConfig {
        ContextCacheConfig {
            local_ttl: Duration::from_secs(60),
            local_capacity: 16,
            shared_ttl: Duration::from_secs(600),
            durable_ttl: Duration::from_secs(3600),
        }
    }

    fn stored_entry(context: &EnrichedContext, expires_in: chrono::Duration) -> CachedContext {
        let now = Utc::now();
        CachedContext {
            artifact_id: context.target_artifact_id,
            program_id: context.program_id,
            context: context.clone(),
            token_count: context.estimated_tokens,
            artifacts_included: context.artifacts_included(),
            version: CACHE_VERSION,
            created_at: now - chrono::Duration::hours(1),
            expires_at: now + expires_in,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_returns_equal_bundle() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let cache = ContextCache::new(store.clone(), config())
            .with_shared(shared.clone())
            .with_durable(store.clone());

        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);
        let report = cache.put(id, &context).await;
        assert_eq!(
            report,
            CacheWriteReport {
                local: TierWrite::Written,
                shared: TierWrite::Written,
                durable: TierWrite::Written,
            }
        );

        assert_eq!(cache.get(id).await, Some(context.clone()));
        assert!(shared.contains(&keys::artifact_context(id)).await);

        let entry = store.cache_entry(id).await.unwrap();
        assert_eq!(entry.version, CACHE_VERSION);
        assert_eq!(entry.token_count, 120);
        assert_eq!(entry.artifacts_included, vec![id]);
        assert_eq!(entry.expires_at - entry.created_at, chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_local_entry_expires() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ContextCache::new(
            store,
            ContextCacheConfig {
                local_ttl: Duration::from_millis(30),
                ..config()
            },
        );

        let id = Uuid::new_v4();
        cache.put(id, &bundle(Uuid::new_v4(), id)).await;
        assert!(cache.get(id).await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get(id).await.is_none());
        assert_eq!(cache.stats().await.local_entries, 0);
    }

    #[tokio::test]
    async fn test_local_capacity_evicts_oldest() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ContextCache::new(
            store,
            ContextCacheConfig {
                local_capacity: 2,
                ..config()
            },
        );
        let program_id = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        for id in &ids {
            cache.put(*id, &bundle(program_id, *id)).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(cache.stats().await.local_entries, 2);
        assert!(cache.get(ids[0]).await.is_none());
        assert!(cache.get(ids[2]).await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_local_tier_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ContextCache::new(
            store.clone(),
            ContextCacheConfig {
                local_capacity: 0,
                ..config()
            },
        )
        .with_durable(store);

        let id = Uuid::new_v4();
        let report = cache.put(id, &bundle(Uuid::new_v4(), id)).await;
        assert_eq!(report.local, TierWrite::Skipped);
        assert_eq!(report.shared, TierWrite::Skipped);
        assert_eq!(report.durable, TierWrite::Written);

        assert!(cache.get(id).await.is_some());
        let stats = cache.stats().await;
        assert_eq!(stats.local_entries, 0);
        assert_eq!(stats.durable_hits, 1);
    }

    #[tokio::test]
    async fn test_shared_hit_fills_local_tier() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);

        let writer = ContextCache::new(store.clone(), config()).with_shared(shared.clone());
        writer.put(id, &context).await;

        let reader = ContextCache::new(store, config()).with_shared(shared.clone());
        assert_eq!(reader.get(id).await, Some(context.clone()));

        shared.set_failing(true);
        assert_eq!(reader.get(id).await, Some(context));

        let stats = reader.stats().await;
        assert_eq!(stats.shared_hits, 1);
        assert_eq!(stats.local_hits, 1);
    }

    #[tokio::test]
    async fn test_durable_hit_refills_shared_through_worker() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let worker = Arc::new(BackgroundWorker::new(1, 8));
        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);
        store.insert_cache_entry(stored_entry(&context, chrono::Duration::hours(2))).await;

        let cache = ContextCache::new(store.clone(), config())
            .with_shared(shared.clone())
            .with_durable(store)
            .with_worker(worker.clone());

        assert_eq!(cache.get(id).await, Some(context));
        assert!(worker.shutdown(Duration::from_secs(5)).await);
        assert!(shared.contains(&keys::artifact_context(id)).await);
        assert_eq!(worker.stats().completed, 1);
        assert_eq!(cache.stats().await.durable_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_durable_entry_is_a_miss_and_deleted() {
        let store = Arc::new(InMemoryStore::new());
        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);
        store.insert_cache_entry(stored_entry(&context, -chrono::Duration::minutes(1))).await;

        let cache = ContextCache::new(store.clone(), config()).with_durable(store.clone());

        assert!(cache.get(id).await.is_none());
        assert!(store.cache_entry(id).await.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_failing_tiers_do_not_fail_each_other() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        shared.set_failing(true);
        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);

        let cache = ContextCache::new(store.clone(), config())
            .with_shared(shared.clone())
            .with_durable(store.clone());
        let report = cache.put(id, &context).await;
        assert_eq!(report.shared, TierWrite::Failed);
        assert_eq!(report.durable, TierWrite::Written);
        assert!(report.any_written());

        store.fail_on(Capability::CacheStore).await;
        let fresh = ContextCache::new(store.clone(), config())
            .with_shared(shared)
            .with_durable(store.clone());
        assert!(fresh.get(id).await.is_none());

        store.recover(Capability::CacheStore).await;
        assert_eq!(fresh.get(id).await, Some(context));
    }

    #[tokio::test]
    async fn test_program_invalidation_and_events() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let program_id = Uuid::new_v4();
        let first = artifact(program_id);
        let second = artifact(program_id);
        let other = artifact(Uuid::new_v4());
        for a in [&first, &second, &other] {
            store.insert_artifact(a.clone()).await;
        }

        let cache = ContextCache::new(store.clone(), config())
            .with_shared(shared.clone())
            .with_durable(store.clone());
        for a in [&first, &second, &other] {
            cache.put(a.artifact_id, &bundle(a.program_id, a.artifact_id)).await;
        }

        assert_eq!(cache.on_event("comment.added", program_id).await.unwrap(), 0);
        assert!(cache.get(first.artifact_id).await.is_some());

        assert_eq!(cache.on_event("risk.updated", program_id).await.unwrap(), 2);
        assert!(cache.get(first.artifact_id).await.is_none());
        assert!(cache.get(second.artifact_id).await.is_none());
        assert!(store.cache_entry(first.artifact_id).await.is_none());
        assert!(!shared.contains(&keys::artifact_context(second.artifact_id)).await);
        assert!(cache.get(other.artifact_id).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_durable_rows() {
        let store = Arc::new(InMemoryStore::new());
        let program_id = Uuid::new_v4();
        let stale = bundle(program_id, Uuid::new_v4());
        let fresh = bundle(program_id, Uuid::new_v4());
        store.insert_cache_entry(stored_entry(&stale, -chrono::Duration::hours(1))).await;
        store.insert_cache_entry(stored_entry(&fresh, chrono::Duration::hours(1))).await;

        let cache = ContextCache::new(store.clone(), config()).with_durable(store.clone());
        let before = cache.stats().await.durable.unwrap();
        assert_eq!(before.active_entries, 1);
        assert_eq!(before.expired_entries, 1);

        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert!(store.cache_entry(stale.target_artifact_id).await.is_none());
        assert!(store.cache_entry(fresh.target_artifact_id).await.is_some());
    }

    #[tokio::test]
    async fn test_local_tier_never_outlives_durable_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let cache = ContextCache::new(
            store.clone(),
            ContextCacheConfig {
                local_ttl: Duration::from_secs(600),
                durable_ttl: Duration::from_millis(200),
                ..config()
            },
        )
        .with_shared(shared.clone())
        .with_durable(store.clone());

        let id = Uuid::new_v4();
        let report = cache.put(id, &bundle(Uuid::new_v4(), id)).await;
        assert_eq!(report.local, TierWrite::Written);
        assert_eq!(report.shared, TierWrite::Skipped);
        assert_eq!(report.durable, TierWrite::Written);
        assert!(cache.get(id).await.is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.get(id).await.is_none());
        assert!(store.cache_entry(id).await.is_none());
        assert!(!shared.contains(&keys::artifact_context(id)).await);
    }

    #[tokio::test]
    async fn test_shared_hit_keeps_remaining_ttl_locally() {
        let store = Arc::new(InMemoryStore::new());
        let shared = Arc::new(MemorySharedCache::new());
        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);
        let payload = serde_json::to_string(&context).unwrap();
        shared.set_raw(&keys::artifact_context(id), &payload, 1).await.unwrap();

        let cache = ContextCache::new(
            store,
            ContextCacheConfig {
                local_ttl: Duration::from_secs(600),
                ..config()
            },
        )
        .with_shared(shared);

        assert_eq!(cache.get(id).await, Some(context.clone()));
        assert_eq!(cache.get(id).await, Some(context));
        assert_eq!(cache.stats().await.local_hits, 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(cache.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_durable_expiry_evicts_refilled_local_entry() {
        let store = Arc::new(InMemoryStore::new());
        let id = Uuid::new_v4();
        let context = bundle(Uuid::new_v4(), id);
        store.insert_cache_entry(stored_entry(&context, chrono::Duration::milliseconds(300))).await;

        let cache = ContextCache::new(
            store.clone(),
            ContextCacheConfig {
                local_ttl: Duration::from_secs(600),
                ..config()
            },
        )
        .with_durable(store.clone());

        assert_eq!(cache.get(id).await, Some(context.clone()));
        assert_eq!(cache.get(id).await, Some(context));
        let stats = cache.stats().await;
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.local_hits, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(cache.get(id).await.is_none());
        assert!(store.cache_entry(id).await.is_none());
    }

    #[test]
    fn test_lifecycle_event_names() {
        for event in LifecycleEvent::ALL {
            assert_eq!(event.as_str().parse::<LifecycleEvent>().unwrap(), event);
        }
        assert_eq!(
            "program.taxonomy.updated".parse::<LifecycleEvent>().unwrap(),
            LifecycleEvent::ProgramTaxonomyUpdated
        );
        assert!("artifact.viewed".parse::<LifecycleEvent>().is_err());
    }
}
