//! Assembly of the enriched context bundle
//!
//! Provides:
//! - Budget allocation across the four bundle components
//! - Concurrent sub-builds with per-component failure isolation
//! - Cache check and write-back around each build
//! - Background warm-up of a program's uncached artifacts

use crate::cache::ContextCache;
use crate::entity_graph::EntityGraphService;
use crate::facts::FactAggregationService;
use crate::model::{
    AggregatedFacts, ArtifactCandidate, ArtifactRef, EnrichedContext, EntityGraphContext, ProcessingStatus, Timeline,
    TokenBreakdown,
};
use crate::scoring::ScoringEngine;
use crate::store::{ArtifactCatalog, ContextStores, SimilaritySearch};
use crate::timeline::TimelineService;
use crate::worker::BackgroundWorker;
use cerberus_common::config::ContextConfig;
use cerberus_common::{metrics, AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Token shares of one build, floored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub related_artifacts: usize,
    pub entity_graph: usize,
    pub timeline: usize,
    pub facts: usize,
}

impl BudgetAllocation {
    /// 50% related artifacts, 25% entity graph, 15% timeline, 10% facts
    pub fn split(total: usize) -> Self {
        Self {
            related_artifacts: total * 50 / 100,
            entity_graph: total * 25 / 100,
            timeline: total * 15 / 100,
            facts: total * 10 / 100,
        }
    }
}

/// Await a sub-build unless the build is cancelled first. Failures and
/// cancellation both yield an empty contribution.
async fn guarded<T, F>(component: &'static str, artifact_id: Uuid, cancel: &CancellationToken, build: F) -> T
where
    T: Default,
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(component, artifact_id = %artifact_id, "Sub-build cancelled");
            T::default()
        }
        result = build => match result {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    component,
                    artifact_id = %artifact_id,
                    code = e.code().as_code(),
                    transient = e.is_transient(),
                    error = %e,
                    "Sub-build failed, continuing without it"
                );
                metrics::record_component_failure(component);
                T::default()
            }
        },
    }
}

pub struct ContextOrchestrator {
    catalog: Arc<dyn ArtifactCatalog>,
    similarity: Arc<dyn SimilaritySearch>,
    scoring: ScoringEngine,
    entity_graph: EntityGraphService,
    timeline: TimelineService,
    facts: FactAggregationService,
    cache: Option<Arc<ContextCache>>,
    worker: Option<Arc<BackgroundWorker>>,
    default_budget: usize,
    candidate_limit: usize,
    caching: bool,
}

impl ContextOrchestrator {
    /// Rejects invalid weights or a zero default budget
    pub fn new(
        stores: &ContextStores,
        config: &ContextConfig,
        cache: Option<Arc<ContextCache>>,
        worker: Option<Arc<BackgroundWorker>>,
    ) -> Result<Self> {
        if config.token_budget == 0 {
            return Err(AppError::Configuration {
                message: "context.token_budget must be positive".to_string(),
            });
        }
        let scoring = ScoringEngine::new(config.weights.into())?;

        Ok(Self {
            catalog: stores.catalog.clone(),
            similarity: stores.similarity.clone(),
            scoring,
            entity_graph: EntityGraphService::new(stores.entities.clone(), stores.catalog.clone()),
            timeline: TimelineService::new(stores.temporal.clone(), config.temporal_window_days),
            facts: FactAggregationService::new(stores.facts.clone()),
            cache,
            worker,
            default_budget: config.token_budget,
            candidate_limit: config.candidate_limit.max(1),
            caching: config.enable_caching,
        })
    }

    pub fn cache(&self) -> Option<&Arc<ContextCache>> {
        self.cache.as_ref()
    }

    pub fn entity_graph(&self) -> &EntityGraphService {
        &self.entity_graph
    }

    pub fn timeline(&self) -> &TimelineService {
        &self.timeline
    }

    pub fn facts(&self) -> &FactAggregationService {
        &self.facts
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    fn active_cache(&self) -> Option<&Arc<ContextCache>> {
        self.cache.as_ref().filter(|_| self.caching)
    }

    /// Look the artifact up, then build
    pub async fn build_for_id(
        &self,
        artifact_id: Uuid,
        token_budget: usize,
        cancel: &CancellationToken,
    ) -> Result<EnrichedContext> {
        let target = self
            .catalog
            .artifact(artifact_id)
            .await?
            .ok_or_else(|| AppError::ArtifactNotFound { id: artifact_id.to_string() })?;
        self.build(&target, token_budget, cancel).await
    }

    /// Build the bundle of `target` within `token_budget` (0 means the
    /// configured default). A cached bundle is only served when it was built
    /// for the same budget. A build cancelled midway is returned with the
    /// contributions finished so far and is not cached.
    pub async fn build(
        &self,
        target: &ArtifactRef,
        token_budget: usize,
        cancel: &CancellationToken,
    ) -> Result<EnrichedContext> {
        let started = Instant::now();
        let budget = if token_budget == 0 { self.default_budget } else { token_budget };
        let artifact_id = target.artifact_id;

        if let Some(cache) = self.active_cache() {
            match cache.get(artifact_id).await {
                Some(context) if context.token_budget == budget => {
                    debug!(artifact_id = %artifact_id, "Context served from cache");
                    metrics::record_context_build(
                        started.elapsed().as_secs_f64(),
                        "cache_hit",
                        context.estimated_tokens,
                        context.was_truncated,
                    );
                    return Ok(context);
                }
                Some(context) => {
                    debug!(
                        artifact_id = %artifact_id,
                        cached_budget = context.token_budget,
                        budget,
                        "Cached context built for another budget, rebuilding"
                    );
                }
                None => {}
            }
        }

        let allocation = BudgetAllocation::split(budget);

        let ((related_artifacts, aggregated_facts), entity_graph, timeline) = tokio::join!(
            self.related_with_facts(target, allocation.related_artifacts, cancel),
            guarded::<EntityGraphContext, _>(
                "entity_graph",
                artifact_id,
                cancel,
                self.entity_graph.context_for(target, allocation.entity_graph),
            ),
            guarded::<Timeline, _>("timeline", artifact_id, cancel, self.timeline.build_timeline(target)),
        );

        let breakdown = TokenBreakdown {
            related_artifacts: related_artifacts.iter().map(|c| c.estimated_tokens).sum(),
            entity_graph: entity_graph.estimated_tokens,
            timeline: timeline.estimated_tokens,
            facts: aggregated_facts.estimated_tokens,
        };
        let estimated_tokens = breakdown.total();
        let was_truncated = estimated_tokens > budget;
        if was_truncated {
            warn!(artifact_id = %artifact_id, estimated_tokens, budget, "Context exceeded token budget");
        }

        let context = EnrichedContext {
            target_artifact_id: artifact_id,
            program_id: target.program_id,
            related_artifacts,
            entity_graph,
            timeline,
            aggregated_facts,
            estimated_tokens,
            token_budget: budget,
            breakdown,
            was_truncated,
        };

        let cancelled = cancel.is_cancelled();
        if cancelled {
            info!(artifact_id = %artifact_id, "Context build cancelled, result not cached");
        } else if let Some(cache) = self.active_cache() {
            cache.put(artifact_id, &context).await;
        }

        let duration = started.elapsed().as_secs_f64();
        metrics::record_context_build(
            duration,
            if cancelled { "cancelled" } else { "built" },
            estimated_tokens,
            was_truncated,
        );
        info!(
            artifact_id = %artifact_id,
            related = context.related_artifacts.len(),
            people = context.entity_graph.key_people.len(),
            timeline_entries = context.timeline.preceding.len() + context.timeline.following.len(),
            facts = context.aggregated_facts.fact_count(),
            conflicts = context.aggregated_facts.conflicts.len(),
            estimated_tokens,
            budget,
            duration_ms = duration * 1000.0,
            "Enriched context built"
        );

        Ok(context)
    }

    /// Related artifacts within their share, then facts over the selection
    async fn related_with_facts(
        &self,
        target: &ArtifactRef,
        budget: usize,
        cancel: &CancellationToken,
    ) -> (Vec<ArtifactCandidate>, AggregatedFacts) {
        let artifact_id = target.artifact_id;
        let people: Vec<Uuid> =
            guarded("target_people", artifact_id, cancel, self.entity_graph.people_of(artifact_id)).await;

        let semantic = async {
            if target.status != ProcessingStatus::Completed {
                return Ok(Vec::new());
            }
            self.similarity.semantically_related(target, self.candidate_limit).await
        };
        let shared = self
            .entity_graph
            .shared_entity_candidates(target, &people, self.candidate_limit);
        let temporal = self.timeline.temporal_candidates(target, self.candidate_limit);

        let (semantic, shared, temporal): (Vec<ArtifactCandidate>, Vec<ArtifactCandidate>, Vec<ArtifactCandidate>) = tokio::join!(
            guarded("semantic_search", artifact_id, cancel, semantic),
            guarded("shared_entities", artifact_id, cancel, shared),
            guarded("temporal_search", artifact_id, cancel, temporal),
        );

        let candidates = merge_candidates(artifact_id, [semantic, shared, temporal]);
        let discovered = candidates.len();
        let selected = self.scoring.score_and_select(candidates, target, &people, budget);
        debug!(artifact_id = %artifact_id, discovered, selected = selected.len(), budget, "Related artifacts selected");

        if selected.is_empty() {
            return (selected, AggregatedFacts::default());
        }

        let related_ids: Vec<Uuid> = selected.iter().map(|c| c.artifact_id).collect();
        let facts = guarded("facts", artifact_id, cancel, self.facts.aggregate(artifact_id, &related_ids)).await;
        (selected, facts)
    }

    /// Queue builds for the most recent artifacts of a program that have no
    /// live durable entry. Returns how many were queued.
    pub async fn warm(self: &Arc<Self>, program_id: Uuid, limit: usize) -> Result<usize> {
        let worker = self.worker.clone().ok_or_else(|| AppError::Configuration {
            message: "cache warm-up needs a background worker".to_string(),
        })?;

        let artifacts = self.catalog.recent_without_cache(program_id, limit).await?;
        let mut queued = 0;

        for artifact in artifacts {
            let orchestrator = Arc::clone(self);
            let name = format!("warm-{}", artifact.artifact_id);
            let cancel = worker.shutdown_token();
            let task = async move { orchestrator.build(&artifact, 0, &cancel).await.map(|_| ()) };
            match worker.submit(name, task) {
                Ok(()) => queued += 1,
                Err(e) => {
                    warn!(program_id = %program_id, error = %e, "Cache warm-up stopped early");
                    break;
                }
            }
        }

        info!(program_id = %program_id, queued, "Cache warm-up queued");
        Ok(queued)
    }
}

/// Concatenate discovery results in source order, keeping the first
/// occurrence of each artifact and dropping the target
fn merge_candidates<const N: usize>(target_id: Uuid, sources: [Vec<ArtifactCandidate>; N]) -> Vec<ArtifactCandidate> {
    let mut seen = HashSet::from([target_id]);
    sources
        .into_iter()
        .flatten()
        .filter(|candidate| seen.insert(candidate.artifact_id))
        .collect()
}
