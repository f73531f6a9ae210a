//! People co-occurrence graph
//!
//! Provides:
//! - Ranked co-occurrence lookups per person
//! - Jaccard overlap between person sets
//! - Incremental, idempotent graph updates per artifact
//! - The entity section of a context bundle

use crate::model::{ArtifactCandidate, ArtifactRef, EntityGraphContext, PersonContext, PersonRecord, PersonRelationship};
use crate::render::truncate_chars;
use crate::store::{ArtifactCatalog, EntityStore};
use cerberus_common::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Token estimate of one person in the entity section
pub const TOKENS_PER_PERSON: usize = 50;

/// Strength given to an edge on its first co-occurrence
pub const INITIAL_EDGE_STRENGTH: f64 = 0.5;

const CO_OCCURRENCE_NAMES: usize = 3;
const RECENT_CONTEXT_CHARS: usize = 150;
const STRENGTH_SATURATION: f64 = 10.0;

/// Strength of an edge seen `co_occurrences` times
pub fn edge_strength(co_occurrences: u32) -> f64 {
    (co_occurrences as f64 / STRENGTH_SATURATION).min(1.0)
}

/// Lower identifier first
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Jaccard similarity of two person sets; 0 when both are empty
pub fn overlap_score(a: &[Uuid], b: &[Uuid]) -> f64 {
    let a: HashSet<&Uuid> = a.iter().collect();
    let b: HashSet<&Uuid> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPerson {
    pub person_id: Uuid,
    pub name: String,
    pub relationship_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityGraphStats {
    pub total_people: usize,
    pub total_edges: usize,
    pub avg_co_occurrences: f64,
    pub most_connected: Option<ConnectedPerson>,
}

pub struct EntityGraphService {
    store: Arc<dyn EntityStore>,
    catalog: Arc<dyn ArtifactCatalog>,
}

impl EntityGraphService {
    pub fn new(store: Arc<dyn EntityStore>, catalog: Arc<dyn ArtifactCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Relationships of a person, highest co-occurrence count first
    pub async fn co_occurrences(&self, person_id: Uuid, program_id: Uuid) -> Result<Vec<PersonRelationship>> {
        let mut relationships = self.store.relationships(person_id, program_id).await?;
        relationships.sort_by(|a, b| b.co_occurrence_count.cmp(&a.co_occurrence_count));
        Ok(relationships)
    }

    /// De-duplicated person identifiers of an artifact, in mention order
    pub async fn people_of(&self, artifact_id: Uuid) -> Result<Vec<Uuid>> {
        let persons = self.store.persons_by_artifact(artifact_id).await?;
        let mut seen = HashSet::new();
        Ok(persons
            .into_iter()
            .map(|p| p.person_id)
            .filter(|id| seen.insert(*id))
            .collect())
    }

    pub async fn shared_entity_candidates(
        &self,
        target: &ArtifactRef,
        person_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<ArtifactCandidate>> {
        if person_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.store.artifacts_with_shared_people(target, person_ids, limit).await
    }

    /// Add the artifact's co-occurrences to the graph, returning the number
    /// of pairs recorded. Reprocessing an artifact does not double count.
    pub async fn update_graph(&self, artifact_id: Uuid) -> Result<usize> {
        let artifact = self
            .catalog
            .artifact(artifact_id)
            .await?
            .ok_or_else(|| AppError::ArtifactNotFound { id: artifact_id.to_string() })?;

        let people = self.people_of(artifact_id).await?;
        if people.len() < 2 {
            debug!(%artifact_id, people = people.len(), "Too few people for co-occurrence edges");
            return Ok(0);
        }

        let mut pairs = 0;
        for (i, first) in people.iter().enumerate() {
            for second in &people[i + 1..] {
                let (a, b) = canonical_pair(*first, *second);
                self.store.upsert_edge(artifact.program_id, a, b, artifact_id).await?;
                pairs += 1;
            }
        }

        info!(%artifact_id, program_id = %artifact.program_id, pairs, "Entity graph updated");
        Ok(pairs)
    }

    /// People of the target ranked by mentions, as many as fit `token_budget`
    pub async fn context_for(&self, target: &ArtifactRef, token_budget: usize) -> Result<EntityGraphContext> {
        let mut persons = self.store.persons_by_artifact(target.artifact_id).await?;
        persons.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));

        let mut seen = HashSet::new();
        let mut edges = HashSet::new();
        let mut key_people = Vec::new();
        let mut tokens = 0;

        for person in persons {
            if !seen.insert(person.person_id) {
                continue;
            }
            if tokens + TOKENS_PER_PERSON > token_budget {
                break;
            }

            let relationships = match self.co_occurrences(person.person_id, target.program_id).await {
                Ok(relationships) => relationships,
                Err(e) => {
                    debug!(person_id = %person.person_id, error = %e, "Co-occurrence lookup failed");
                    Vec::new()
                }
            };

            for rel in &relationships {
                edges.insert((rel.person_id_1, rel.person_id_2));
            }

            let co_occurs_with = relationships
                .iter()
                .take(CO_OCCURRENCE_NAMES)
                .map(|rel| rel.other_name(person.person_id).to_string())
                .collect();

            key_people.push(person_context(person, co_occurs_with));
            tokens += TOKENS_PER_PERSON;
        }

        Ok(EntityGraphContext {
            key_people,
            total_relationships: edges.len(),
            estimated_tokens: tokens,
        })
    }

    /// Most mentioned people across a program
    pub async fn key_people(&self, program_id: Uuid, limit: usize) -> Result<Vec<PersonContext>> {
        let people = self.store.key_people(program_id, limit).await?;
        Ok(people.into_iter().map(|p| person_context(p, Vec::new())).collect())
    }

    /// Edges of a program seen at least `min_co_occurrences` times
    pub async fn program_graph(&self, program_id: Uuid, min_co_occurrences: u32) -> Result<Vec<PersonRelationship>> {
        let mut edges = self.store.program_relationships(program_id, min_co_occurrences).await?;
        edges.sort_by(|a, b| b.co_occurrence_count.cmp(&a.co_occurrence_count));
        Ok(edges)
    }

    pub async fn stats(&self, program_id: Uuid) -> Result<EntityGraphStats> {
        let (total_people, edges) = tokio::try_join!(
            self.store.count_unique_people(program_id),
            self.store.program_relationships(program_id, 1),
        )?;

        let avg_co_occurrences = if edges.is_empty() {
            0.0
        } else {
            edges.iter().map(|e| e.co_occurrence_count as f64).sum::<f64>() / edges.len() as f64
        };

        Ok(EntityGraphStats {
            total_people,
            total_edges: edges.len(),
            avg_co_occurrences,
            most_connected: most_connected(&edges),
        })
    }
}

fn person_context(person: PersonRecord, co_occurs_with: Vec<String>) -> PersonContext {
    let recent_context = person
        .snippets
        .first()
        .map(|s| truncate_chars(s, RECENT_CONTEXT_CHARS));

    PersonContext {
        person_id: person.person_id,
        name: person.name,
        role: person.role,
        organization: person.organization,
        classification: person.classification,
        mention_count: person.mention_count,
        artifact_count: person.artifact_count,
        co_occurs_with,
        recent_context,
    }
}

fn most_connected(edges: &[PersonRelationship]) -> Option<ConnectedPerson> {
    let mut degree: HashMap<Uuid, (usize, &str)> = HashMap::new();
    for edge in edges {
        degree.entry(edge.person_id_1).or_insert((0, edge.person_name_1.as_str())).0 += 1;
        degree.entry(edge.person_id_2).or_insert((0, edge.person_name_2.as_str())).0 += 1;
    }

    degree
        .into_iter()
        .max_by(|(id_a, (count_a, _)), (id_b, (count_b, _))| {
            count_a.cmp(count_b).then_with(|| id_b.cmp(id_a))
        })
        .map(|(person_id, (relationship_count, name))| ConnectedPerson {
            person_id,
            name: name.to_string(),
            relationship_count,
        })
}
