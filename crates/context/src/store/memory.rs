//! In-process implementations of the store seams
//!
//! `InMemoryStore` serves every capability from one locked state and can be
//! told to fail a capability on demand. `MemorySharedCache` stands in for
//! Redis. Both exist only for the unit tests.

use super::{
    ArtifactCatalog, ContextCacheStore, DurableCacheStats, EntityStore, FactStore, SimilaritySearch, TemporalStore,
    MIN_SEMANTIC_SIMILARITY,
};
use crate::entity_graph::{edge_strength, INITIAL_EDGE_STRENGTH};
use crate::model::{
    ArtifactCandidate, ArtifactRef, ArtifactSequence, CachedContext, Fact, PersonRecord, PersonRelationship,
    ProcessingStatus,
};
use cerberus_common::{AppError, Result, SharedCache};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

const RELATIONSHIP_LIMIT: usize = 10;
const FACT_LIMIT: usize = 200;

/// A store capability that can be switched to failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Catalog,
    Similarity,
    SharedPeople,
    Persons,
    Relationships,
    Temporal,
    Timeline,
    Facts,
    CacheStore,
}

#[derive(Debug, Clone)]
struct StoredArtifact {
    artifact: ArtifactRef,
    subcategory: Option<String>,
    topics: Vec<String>,
    embedding: Option<Vec<f32>>,
    deleted: bool,
}

impl StoredArtifact {
    fn live(&self) -> bool {
        !self.deleted
    }

    fn completed(&self) -> bool {
        !self.deleted && self.artifact.status == ProcessingStatus::Completed
    }
}

#[derive(Debug, Clone)]
struct EdgeRow {
    program_id: Uuid,
    co_occurrence_count: u32,
    shared_artifact_ids: Vec<Uuid>,
    strength: f64,
}

#[derive(Default)]
struct State {
    artifacts: HashMap<Uuid, StoredArtifact>,
    persons: Vec<PersonRecord>,
    edges: HashMap<(Uuid, Uuid), EdgeRow>,
    facts: Vec<Fact>,
    sequences: Vec<ArtifactSequence>,
    cache: HashMap<Uuid, CachedContext>,
    failing: HashSet<Capability>,
}

impl State {
    fn check(&self, capability: Capability) -> Result<()> {
        if self.failing.contains(&capability) {
            return Err(AppError::DatabaseConnection {
                message: format!("{:?} store unavailable", capability),
            });
        }
        Ok(())
    }

    fn program_artifacts(&self, program_id: Uuid) -> impl Iterator<Item = &StoredArtifact> {
        self.artifacts
            .values()
            .filter(move |a| a.live() && a.artifact.program_id == program_id)
    }

    fn is_live_in(&self, artifact_id: Uuid, program_id: Uuid) -> bool {
        self.artifacts
            .get(&artifact_id)
            .map(|a| a.live() && a.artifact.program_id == program_id)
            .unwrap_or(false)
    }

    fn person_name(&self, person_id: Uuid) -> String {
        self.persons
            .iter()
            .find(|p| p.person_id == person_id)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    fn candidate(&self, stored: &StoredArtifact) -> ArtifactCandidate {
        let artifact_id = stored.artifact.artifact_id;
        let mut seen = HashSet::new();
        let (person_ids, mentioned_people): (Vec<Uuid>, Vec<String>) = self
            .persons
            .iter()
            .filter(|p| p.artifact_id == artifact_id && seen.insert(p.person_id))
            .map(|p| (p.person_id, p.name.clone()))
            .unzip();

        ArtifactCandidate {
            artifact_id,
            filename: stored.artifact.filename.clone(),
            category: stored.artifact.category.clone(),
            subcategory: stored.subcategory.clone(),
            uploaded_at: stored.artifact.uploaded_at,
            executive_summary: stored.artifact.summary.clone(),
            mentioned_people,
            person_ids,
            topics: stored.topics.clone(),
            fact_count: self.facts.iter().filter(|f| f.artifact_id == artifact_id).count() as u32,
            ..Default::default()
        }
    }

    fn relationship(&self, (a, b): (Uuid, Uuid), row: &EdgeRow) -> PersonRelationship {
        PersonRelationship {
            person_id_1: a,
            person_name_1: self.person_name(a),
            person_id_2: b,
            person_name_2: self.person_name(b),
            co_occurrence_count: row.co_occurrence_count,
            shared_artifact_ids: row.shared_artifact_ids.clone(),
            strength: row.strength,
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn confidence_desc(a: &Fact, b: &Fact) -> Ordering {
    b.confidence
        .unwrap_or(f64::NEG_INFINITY)
        .total_cmp(&a.confidence.unwrap_or(f64::NEG_INFINITY))
}

/// Every store capability over process memory
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_artifact(&self, artifact: ArtifactRef) {
        self.insert_artifact_with(artifact, None, Vec::new()).await;
    }

    pub async fn insert_artifact_with(&self, artifact: ArtifactRef, subcategory: Option<String>, topics: Vec<String>) {
        let mut state = self.state.write().await;
        state.artifacts.insert(
            artifact.artifact_id,
            StoredArtifact {
                artifact,
                subcategory,
                topics,
                embedding: None,
                deleted: false,
            },
        );
    }

    /// Soft delete, as the upstream schema does
    pub async fn delete_artifact(&self, artifact_id: Uuid) {
        if let Some(stored) = self.state.write().await.artifacts.get_mut(&artifact_id) {
            stored.deleted = true;
        }
    }

    pub async fn set_embedding(&self, artifact_id: Uuid, embedding: Vec<f32>) {
        if let Some(stored) = self.state.write().await.artifacts.get_mut(&artifact_id) {
            stored.embedding = Some(embedding);
        }
    }

    pub async fn insert_person(&self, person: PersonRecord) {
        self.state.write().await.persons.push(person);
    }

    pub async fn insert_fact(&self, fact: Fact) {
        self.state.write().await.facts.push(fact);
    }

    pub async fn insert_cache_entry(&self, entry: CachedContext) {
        self.state.write().await.cache.insert(entry.artifact_id, entry);
    }

    /// Durable cache row, bypassing failure injection
    pub async fn cache_entry(&self, artifact_id: Uuid) -> Option<CachedContext> {
        self.state.read().await.cache.get(&artifact_id).cloned()
    }

    /// Stored edge between two people, in either order
    pub async fn edge(&self, a: Uuid, b: Uuid) -> Option<PersonRelationship> {
        let key = if a <= b { (a, b) } else { (b, a) };
        let state = self.state.read().await;
        state.edges.get(&key).map(|row| state.relationship(key, row))
    }

    pub async fn fail_on(&self, capability: Capability) {
        self.state.write().await.failing.insert(capability);
    }

    pub async fn recover(&self, capability: Capability) {
        self.state.write().await.failing.remove(&capability);
    }
}

#[async_trait::async_trait]
impl ArtifactCatalog for InMemoryStore {
    async fn artifact(&self, artifact_id: Uuid) -> Result<Option<ArtifactRef>> {
        let state = self.state.read().await;
        state.check(Capability::Catalog)?;
        Ok(state
            .artifacts
            .get(&artifact_id)
            .filter(|a| a.live())
            .map(|a| a.artifact.clone()))
    }

    async fn artifact_ids_by_program(&self, program_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        state.check(Capability::Catalog)?;
        let mut artifacts: Vec<&ArtifactRef> = state.program_artifacts(program_id).map(|a| &a.artifact).collect();
        artifacts.sort_by_key(|a| a.uploaded_at);
        Ok(artifacts.into_iter().map(|a| a.artifact_id).collect())
    }

    async fn recent_without_cache(&self, program_id: Uuid, limit: usize) -> Result<Vec<ArtifactRef>> {
        let state = self.state.read().await;
        state.check(Capability::Catalog)?;
        let now = Utc::now();
        let mut artifacts: Vec<ArtifactRef> = state
            .program_artifacts(program_id)
            .filter(|a| a.completed())
            .filter(|a| {
                state
                    .cache
                    .get(&a.artifact.artifact_id)
                    .map(|entry| entry.is_expired_at(now))
                    .unwrap_or(true)
            })
            .map(|a| a.artifact.clone())
            .collect();
        artifacts.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        artifacts.truncate(limit);
        Ok(artifacts)
    }
}

#[async_trait::async_trait]
impl SimilaritySearch for InMemoryStore {
    async fn semantically_related(&self, target: &ArtifactRef, limit: usize) -> Result<Vec<ArtifactCandidate>> {
        let state = self.state.read().await;
        state.check(Capability::Similarity)?;

        let Some(target_embedding) = state
            .artifacts
            .get(&target.artifact_id)
            .and_then(|a| a.embedding.as_deref())
        else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f64, &StoredArtifact)> = state
            .program_artifacts(target.program_id)
            .filter(|a| a.completed() && a.artifact.artifact_id != target.artifact_id)
            .filter_map(|a| {
                let embedding = a.embedding.as_deref()?;
                let similarity = cosine_similarity(target_embedding, embedding);
                (similarity > MIN_SEMANTIC_SIMILARITY).then_some((similarity, a))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(similarity, stored)| {
                let mut candidate = state.candidate(stored);
                candidate.scores.semantic = similarity;
                candidate
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
    async fn persons_by_artifact(&self, artifact_id: Uuid) -> Result<Vec<PersonRecord>> {
        let state = self.state.read().await;
        state.check(Capability::Persons)?;
        let mut persons: Vec<PersonRecord> = state
            .persons
            .iter()
            .filter(|p| p.artifact_id == artifact_id)
            .cloned()
            .collect();
        persons.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
        Ok(persons)
    }

    async fn artifacts_with_shared_people(
        &self,
        target: &ArtifactRef,
        person_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<ArtifactCandidate>> {
        let state = self.state.read().await;
        state.check(Capability::SharedPeople)?;
        let wanted: HashSet<Uuid> = person_ids.iter().copied().collect();

        let mut matches: Vec<(usize, ArtifactCandidate)> = state
            .program_artifacts(target.program_id)
            .filter(|a| a.completed() && a.artifact.artifact_id != target.artifact_id)
            .filter_map(|stored| {
                let mut candidate = state.candidate(stored);
                let shared: Vec<String> = candidate
                    .person_ids
                    .iter()
                    .zip(&candidate.mentioned_people)
                    .filter(|(id, _)| wanted.contains(id))
                    .map(|(_, name)| name.clone())
                    .collect();
                if shared.len() < 2 {
                    return None;
                }
                let count = shared.len();
                candidate.mentioned_people = shared;
                Some((count, candidate))
            })
            .collect();

        matches.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.artifact_id.cmp(&b.1.artifact_id)));
        Ok(matches.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn relationships(&self, person_id: Uuid, program_id: Uuid) -> Result<Vec<PersonRelationship>> {
        let state = self.state.read().await;
        state.check(Capability::Relationships)?;
        let mut relationships: Vec<PersonRelationship> = state
            .edges
            .iter()
            .filter(|((a, b), row)| row.program_id == program_id && (*a == person_id || *b == person_id))
            .map(|(key, row)| state.relationship(*key, row))
            .collect();
        relationships.sort_by(|a, b| b.co_occurrence_count.cmp(&a.co_occurrence_count));
        relationships.truncate(RELATIONSHIP_LIMIT);
        Ok(relationships)
    }

    async fn program_relationships(&self, program_id: Uuid, min_co_occurrences: u32) -> Result<Vec<PersonRelationship>> {
        let state = self.state.read().await;
        state.check(Capability::Relationships)?;
        let mut relationships: Vec<PersonRelationship> = state
            .edges
            .iter()
            .filter(|(_, row)| row.program_id == program_id && row.co_occurrence_count >= min_co_occurrences)
            .map(|(key, row)| state.relationship(*key, row))
            .collect();
        relationships.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        Ok(relationships)
    }

    async fn upsert_edge(&self, program_id: Uuid, person_a: Uuid, person_b: Uuid, artifact_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(Capability::Relationships)?;

        match state.edges.get_mut(&(person_a, person_b)) {
            Some(row) if row.shared_artifact_ids.contains(&artifact_id) => {}
            Some(row) => {
                row.co_occurrence_count += 1;
                row.shared_artifact_ids.push(artifact_id);
                row.strength = edge_strength(row.co_occurrence_count);
            }
            None => {
                state.edges.insert(
                    (person_a, person_b),
                    EdgeRow {
                        program_id,
                        co_occurrence_count: 1,
                        shared_artifact_ids: vec![artifact_id],
                        strength: INITIAL_EDGE_STRENGTH,
                    },
                );
            }
        }
        Ok(())
    }

    async fn key_people(&self, program_id: Uuid, limit: usize) -> Result<Vec<PersonRecord>> {
        let state = self.state.read().await;
        state.check(Capability::Persons)?;

        let mut order: Vec<Uuid> = Vec::new();
        let mut people: HashMap<Uuid, (PersonRecord, HashSet<Uuid>)> = HashMap::new();
        for person in state.persons.iter().filter(|p| state.is_live_in(p.artifact_id, program_id)) {
            match people.get_mut(&person.person_id) {
                Some((total, artifacts)) => {
                    total.mention_count += person.mention_count;
                    artifacts.insert(person.artifact_id);
                }
                None => {
                    order.push(person.person_id);
                    people.insert(person.person_id, (person.clone(), HashSet::from([person.artifact_id])));
                }
            }
        }

        let mut ranked: Vec<PersonRecord> = order
            .into_iter()
            .filter_map(|id| people.remove(&id))
            .map(|(mut record, artifacts)| {
                record.artifact_count = artifacts.len() as u32;
                record
            })
            .collect();
        ranked.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn count_unique_people(&self, program_id: Uuid) -> Result<usize> {
        let state = self.state.read().await;
        state.check(Capability::Persons)?;
        Ok(state
            .persons
            .iter()
            .filter(|p| state.is_live_in(p.artifact_id, program_id))
            .map(|p| p.person_id)
            .collect::<HashSet<_>>()
            .len())
    }
}

#[async_trait::async_trait]
impl TemporalStore for InMemoryStore {
    async fn temporally_related(
        &self,
        target: &ArtifactRef,
        window_days: i64,
        limit: usize,
    ) -> Result<Vec<ArtifactCandidate>> {
        let state = self.state.read().await;
        state.check(Capability::Temporal)?;
        let window = Duration::days(window_days);

        let mut nearby: Vec<(Duration, &StoredArtifact)> = state
            .program_artifacts(target.program_id)
            .filter(|a| a.completed() && a.artifact.artifact_id != target.artifact_id)
            .map(|a| ((a.artifact.uploaded_at - target.uploaded_at).abs(), a))
            .filter(|(gap, _)| *gap <= window)
            .collect();
        nearby.sort_by_key(|(gap, _)| *gap);

        Ok(nearby
            .into_iter()
            .take(limit)
            .map(|(_, stored)| state.candidate(stored))
            .collect())
    }

    async fn artifacts_in_range(
        &self,
        program_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRef>> {
        let state = self.state.read().await;
        state.check(Capability::Timeline)?;
        let mut artifacts: Vec<ArtifactRef> = state
            .program_artifacts(program_id)
            .filter(|a| a.artifact.uploaded_at >= start && a.artifact.uploaded_at <= end)
            .map(|a| a.artifact.clone())
            .collect();
        artifacts.sort_by_key(|a| a.uploaded_at);
        Ok(artifacts)
    }

    async fn artifacts_by_program(&self, program_id: Uuid) -> Result<Vec<ArtifactRef>> {
        let state = self.state.read().await;
        state.check(Capability::Timeline)?;
        let mut artifacts: Vec<ArtifactRef> = state.program_artifacts(program_id).map(|a| a.artifact.clone()).collect();
        artifacts.sort_by_key(|a| a.uploaded_at);
        Ok(artifacts)
    }

    async fn replace_sequences(&self, program_id: Uuid, sequences: &[ArtifactSequence]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(Capability::Timeline)?;
        state.sequences.retain(|s| s.program_id != program_id);
        state
            .sequences
            .extend(sequences.iter().filter(|s| s.program_id == program_id).cloned());
        Ok(())
    }

    async fn sequences_by_program(&self, program_id: Uuid) -> Result<Vec<ArtifactSequence>> {
        let state = self.state.read().await;
        state.check(Capability::Timeline)?;
        let mut sequences: Vec<ArtifactSequence> = state
            .sequences
            .iter()
            .filter(|s| s.program_id == program_id)
            .cloned()
            .collect();
        sequences.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(sequences)
    }
}

#[async_trait::async_trait]
impl FactStore for InMemoryStore {
    async fn facts_by_artifacts(&self, artifact_ids: &[Uuid]) -> Result<Vec<Fact>> {
        let state = self.state.read().await;
        state.check(Capability::Facts)?;
        let wanted: HashSet<&Uuid> = artifact_ids.iter().collect();
        let mut facts: Vec<Fact> = state
            .facts
            .iter()
            .filter(|f| wanted.contains(&f.artifact_id))
            .cloned()
            .collect();
        facts.sort_by(|a, b| {
            a.fact_type
                .cmp(&b.fact_type)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| confidence_desc(a, b))
        });
        facts.truncate(FACT_LIMIT);
        Ok(facts)
    }

    async fn facts_by_key(&self, program_id: Uuid, key: &str) -> Result<Vec<Fact>> {
        let state = self.state.read().await;
        state.check(Capability::Facts)?;
        let needle = key.to_lowercase();
        let mut facts: Vec<Fact> = state
            .facts
            .iter()
            .filter(|f| state.is_live_in(f.artifact_id, program_id))
            .filter(|f| f.key.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        facts.sort_by(confidence_desc);
        Ok(facts)
    }

    async fn facts_by_program(&self, program_id: Uuid) -> Result<Vec<Fact>> {
        let state = self.state.read().await;
        state.check(Capability::Facts)?;
        Ok(state
            .facts
            .iter()
            .filter(|f| state.is_live_in(f.artifact_id, program_id))
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ContextCacheStore for InMemoryStore {
    async fn get_entry(&self, artifact_id: Uuid) -> Result<Option<CachedContext>> {
        let state = self.state.read().await;
        state.check(Capability::CacheStore)?;
        Ok(state.cache.get(&artifact_id).cloned())
    }

    async fn upsert_entry(&self, entry: &CachedContext) -> Result<()> {
        let mut state = self.state.write().await;
        state.check(Capability::CacheStore)?;
        state.cache.insert(entry.artifact_id, entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, artifact_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check(Capability::CacheStore)?;
        Ok(state.cache.remove(&artifact_id).is_some())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        state.check(Capability::CacheStore)?;
        let now = Utc::now();
        let before = state.cache.len();
        state.cache.retain(|_, entry| !entry.is_expired_at(now));
        Ok((before - state.cache.len()) as u64)
    }

    async fn stats(&self) -> Result<DurableCacheStats> {
        let state = self.state.read().await;
        state.check(Capability::CacheStore)?;
        let now = Utc::now();
        let (active, expired): (Vec<&CachedContext>, Vec<&CachedContext>) =
            state.cache.values().partition(|entry| !entry.is_expired_at(now));

        let avg_token_count = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|e| e.token_count as f64).sum::<f64>() / active.len() as f64
        };

        Ok(DurableCacheStats {
            active_entries: active.len() as u64,
            expired_entries: expired.len() as u64,
            avg_token_count,
        })
    }
}

/// TTL map standing in for the Redis tier
#[derive(Default)]
pub struct MemorySharedCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    failing: AtomicBool,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, AtomicOrdering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .await
            .get(key)
            .map(|(_, expires)| *expires > Instant::now())
            .unwrap_or(false)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(AtomicOrdering::SeqCst) {
            return Err(AppError::CacheError {
                message: "shared cache unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SharedCache for MemorySharedCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<std::time::Duration>)>> {
        self.check()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(value, expires)| (value.clone(), Some(*expires - now))))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check()?;
        let expires = Instant::now() + std::time::Duration::from_secs(ttl_secs);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn artifact(program_id: Uuid, days: i64) -> ArtifactRef {
        ArtifactRef {
            artifact_id: Uuid::new_v4(),
            program_id,
            filename: format!("doc-{}.pdf", days),
            category: Some("report".into()),
            uploaded_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(days),
            status: ProcessingStatus::Completed,
            summary: None,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_semantic_neighbours_above_threshold() {
        let store = InMemoryStore::new();
        let program = Uuid::new_v4();
        let target = artifact(program, 0);
        let close = artifact(program, 1);
        let far = artifact(program, 2);
        for a in [&target, &close, &far] {
            store.insert_artifact(a.clone()).await;
        }
        store.set_embedding(target.artifact_id, vec![1.0, 0.0]).await;
        store.set_embedding(close.artifact_id, vec![0.9, 0.1]).await;
        store.set_embedding(far.artifact_id, vec![0.0, 1.0]).await;

        let found = store.semantically_related(&target, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].artifact_id, close.artifact_id);
        assert!(found[0].scores.semantic > MIN_SEMANTIC_SIMILARITY);
    }

    #[tokio::test]
    async fn test_temporal_window_and_deleted_artifacts() {
        let store = InMemoryStore::new();
        let program = Uuid::new_v4();
        let target = artifact(program, 100);
        let near = artifact(program, 103);
        let nearer = artifact(program, 99);
        let outside = artifact(program, 300);
        let deleted = artifact(program, 101);
        for a in [&target, &near, &nearer, &outside, &deleted] {
            store.insert_artifact(a.clone()).await;
        }
        store.delete_artifact(deleted.artifact_id).await;

        let found = store.temporally_related(&target, 90, 10).await.unwrap();
        let ids: Vec<Uuid> = found.iter().map(|c| c.artifact_id).collect();
        assert_eq!(ids, vec![nearer.artifact_id, near.artifact_id]);
        assert!(store.artifact(deleted.artifact_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shared_people_needs_two_matches() {
        let store = InMemoryStore::new();
        let program = Uuid::new_v4();
        let target = artifact(program, 0);
        let two = artifact(program, 1);
        let one = artifact(program, 2);
        for a in [&target, &two, &one] {
            store.insert_artifact(a.clone()).await;
        }
        let (ada, grace, alan) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let record = |artifact_id, person_id, name: &str| PersonRecord {
            person_id,
            artifact_id,
            name: name.to_string(),
            role: None,
            organization: None,
            mention_count: 1,
            artifact_count: 1,
            classification: None,
            snippets: vec![],
        };
        store.insert_person(record(two.artifact_id, ada, "Ada")).await;
        store.insert_person(record(two.artifact_id, grace, "Grace")).await;
        store.insert_person(record(two.artifact_id, alan, "Alan")).await;
        store.insert_person(record(one.artifact_id, ada, "Ada")).await;

        let found = store
            .artifacts_with_shared_people(&target, &[ada, grace], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].artifact_id, two.artifact_id);
        assert_eq!(found[0].mentioned_people, vec!["Ada".to_string(), "Grace".to_string()]);
        assert_eq!(found[0].person_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection_and_recovery() {
        let store = InMemoryStore::new();
        store.fail_on(Capability::CacheStore).await;
        assert!(store.get_entry(Uuid::new_v4()).await.is_err());
        store.recover(Capability::CacheStore).await;
        assert!(store.get_entry(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_shared_cache_ttl() {
        let cache = MemorySharedCache::new();
        cache.set_raw("k", "v", 60).await.unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap().as_deref(), Some("v"));

        cache.set_raw("gone", "v", 0).await.unwrap();
        assert!(cache.get_raw("gone").await.unwrap().is_none());

        cache.set_failing(true);
        assert!(cache.get_raw("k").await.is_err());
        cache.set_failing(false);
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.contains("k").await);
    }
}
