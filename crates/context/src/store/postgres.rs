//! PostgreSQL implementation of every store seam
//!
//! Rows the context engine owns (cache entries, entity edges, sequences) go
//! through SeaORM entities. Artifact, person, topic and fact tables belong
//! to the ingestion pipeline and are read with raw statements, as are the
//! pgvector search and the idempotent edge upsert.

use super::{
    ArtifactCatalog, ContextCacheStore, DurableCacheStats, EntityStore, FactStore, SimilaritySearch, TemporalStore,
    MIN_SEMANTIC_SIMILARITY,
};
use crate::entity_graph::INITIAL_EDGE_STRENGTH;
use crate::model::{
    ArtifactCandidate, ArtifactRef, ArtifactSequence, CachedContext, Classification, EnrichedContext, Fact,
    PersonRecord, PersonRelationship,
};
use cerberus_common::db::models::{
    ContextCacheActiveModel, ContextCacheColumn, ContextCacheEntity, ContextCacheRow, EntityEdgeColumn,
    EntityEdgeEntity, TemporalSequenceActiveModel, TemporalSequenceColumn, TemporalSequenceEntity,
    TemporalSequenceRow,
};
use cerberus_common::db::DbPool;
use cerberus_common::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, QueryOrder, QueryResult,
    Statement, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

const RELATIONSHIP_LIMIT: i64 = 10;
const FACT_LIMIT: i64 = 200;

/// Columns shared by every candidate query; expects `a` (artifacts) and
/// `s` (artifact_summaries) in scope
const CANDIDATE_COLUMNS: &str = r#"
    a.artifact_id,
    a.filename,
    a.artifact_category,
    a.artifact_subcategory,
    a.uploaded_at,
    s.executive_summary,
    COALESCE((SELECT array_agg(p.person_id ORDER BY p.mention_count DESC)
              FROM artifact_persons p WHERE p.artifact_id = a.artifact_id), '{}'::uuid[]) AS person_ids,
    COALESCE((SELECT array_agg(t.topic_name ORDER BY t.confidence_score DESC)
              FROM artifact_topics t WHERE t.artifact_id = a.artifact_id), '{}'::text[]) AS topics,
    (SELECT COUNT(*) FROM artifact_facts f WHERE f.artifact_id = a.artifact_id) AS fact_count
"#;

const ARTIFACT_COLUMNS: &str = r#"
    a.artifact_id, a.program_id, a.filename, a.artifact_category, a.uploaded_at,
    a.processing_status, s.executive_summary
"#;

const PERSON_COLUMNS: &str = r#"
    ap.person_id, ap.artifact_id, ap.person_name, ap.person_role, ap.person_organization,
    ap.mention_count, ap.context_snippets, st.is_internal
"#;

const FACT_COLUMNS: &str = r#"
    f.fact_id, f.artifact_id, a.filename, f.fact_type, f.fact_key, f.fact_value,
    f.normalized_value_numeric::float8 AS normalized_value, f.confidence_score::float8 AS confidence
"#;

/// Every store capability over the program database
#[cfg_attr(not(feature = "mock"), derive(Clone))]
pub struct PgContextStore {
    db: DbPool,
}

impl PgContextStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn query(&self, sql: &str, values: Vec<sea_orm::Value>) -> Result<Vec<QueryResult>> {
        Ok(self
            .db
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .await?)
    }

    async fn execute(&self, sql: &str, values: Vec<sea_orm::Value>) -> Result<u64> {
        let result = self
            .db
            .write()
            .execute(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .await?;
        Ok(result.rows_affected())
    }

    async fn person_names(&self, person_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        let sql = r#"
            SELECT DISTINCT ON (person_id) person_id, person_name
            FROM artifact_persons
            WHERE person_id = ANY($1)
            ORDER BY person_id, mention_count DESC
        "#;
        let rows = self.query(sql, vec![person_ids.to_vec().into()]).await?;
        rows.iter()
            .map(|row| -> Result<(Uuid, String)> { Ok((row.try_get("", "person_id")?, row.try_get("", "person_name")?)) })
            .collect()
    }

    /// People of each candidate, restricted to `names_column` when given
    fn candidates(rows: &[QueryResult], names_column: Option<&str>) -> Result<Vec<ArtifactCandidate>> {
        rows.iter().map(|row| candidate_from_row(row, names_column)).collect()
    }
}

fn candidate_from_row(row: &QueryResult, names_column: Option<&str>) -> Result<ArtifactCandidate> {
    let person_ids: Vec<Uuid> = row.try_get("", "person_ids")?;
    let mentioned_people: Vec<String> = match names_column {
        Some(column) => row.try_get("", column)?,
        None => row.try_get("", "person_names")?,
    };

    Ok(ArtifactCandidate {
        artifact_id: row.try_get("", "artifact_id")?,
        filename: row.try_get("", "filename")?,
        category: row.try_get("", "artifact_category")?,
        subcategory: row.try_get("", "artifact_subcategory")?,
        uploaded_at: row.try_get::<DateTime<Utc>>("", "uploaded_at")?,
        executive_summary: row.try_get("", "executive_summary")?,
        mentioned_people,
        person_ids,
        topics: row.try_get("", "topics")?,
        fact_count: row.try_get::<i64>("", "fact_count")?.max(0) as u32,
        ..Default::default()
    })
}

fn artifact_from_row(row: &QueryResult) -> Result<ArtifactRef> {
    let status: String = row.try_get("", "processing_status")?;
    Ok(ArtifactRef {
        artifact_id: row.try_get("", "artifact_id")?,
        program_id: row.try_get("", "program_id")?,
        filename: row.try_get("", "filename")?,
        category: row.try_get("", "artifact_category")?,
        uploaded_at: row.try_get::<DateTime<Utc>>("", "uploaded_at")?,
        status: status.parse()?,
        summary: row.try_get("", "executive_summary")?,
    })
}

fn person_from_row(row: &QueryResult) -> Result<PersonRecord> {
    let snippets = row
        .try_get::<Option<serde_json::Value>>("", "context_snippets")?
        .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
        .unwrap_or_default();
    let classification = row
        .try_get::<Option<bool>>("", "is_internal")?
        .map(|internal| if internal { Classification::Internal } else { Classification::External });

    Ok(PersonRecord {
        person_id: row.try_get("", "person_id")?,
        artifact_id: row.try_get("", "artifact_id")?,
        name: row.try_get("", "person_name")?,
        role: row.try_get("", "person_role")?,
        organization: row.try_get("", "person_organization")?,
        mention_count: row.try_get::<i32>("", "mention_count")?.max(0) as u32,
        artifact_count: 1,
        classification,
        snippets,
    })
}

fn relationship_from_row(row: &QueryResult) -> Result<PersonRelationship> {
    Ok(PersonRelationship {
        person_id_1: row.try_get("", "person_id_1")?,
        person_name_1: row.try_get::<Option<String>>("", "person_name_1")?.unwrap_or_default(),
        person_id_2: row.try_get("", "person_id_2")?,
        person_name_2: row.try_get::<Option<String>>("", "person_name_2")?.unwrap_or_default(),
        co_occurrence_count: row.try_get::<i32>("", "co_occurrence_count")?.max(0) as u32,
        shared_artifact_ids: row.try_get("", "shared_artifact_ids")?,
        strength: row.try_get("", "relationship_strength")?,
    })
}

fn fact_from_row(row: &QueryResult) -> Result<Fact> {
    Ok(Fact {
        fact_id: row.try_get("", "fact_id")?,
        artifact_id: row.try_get("", "artifact_id")?,
        source_filename: row.try_get("", "filename")?,
        fact_type: row.try_get("", "fact_type")?,
        key: row.try_get("", "fact_key")?,
        value: row.try_get("", "fact_value")?,
        normalized_value: row.try_get("", "normalized_value")?,
        confidence: row.try_get("", "confidence")?,
    })
}

fn limit(value: usize) -> sea_orm::Value {
    (value.min(i64::MAX as usize) as i64).into()
}

#[async_trait::async_trait]
impl ArtifactCatalog for PgContextStore {
    async fn artifact(&self, artifact_id: Uuid) -> Result<Option<ArtifactRef>> {
        let sql = format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM artifacts a
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            WHERE a.artifact_id = $1 AND a.deleted_at IS NULL
            "#
        );
        let rows = self.query(&sql, vec![artifact_id.into()]).await?;
        rows.first().map(artifact_from_row).transpose()
    }

    async fn artifact_ids_by_program(&self, program_id: Uuid) -> Result<Vec<Uuid>> {
        let sql = r#"
            SELECT artifact_id
            FROM artifacts
            WHERE program_id = $1 AND deleted_at IS NULL
            ORDER BY uploaded_at ASC
        "#;
        let rows = self.query(sql, vec![program_id.into()]).await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid>("", "artifact_id").map_err(AppError::from))
            .collect()
    }

    async fn recent_without_cache(&self, program_id: Uuid, limit_to: usize) -> Result<Vec<ArtifactRef>> {
        let sql = format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM artifacts a
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            LEFT JOIN artifact_context_cache c ON a.artifact_id = c.artifact_id AND c.expires_at > NOW()
            WHERE a.program_id = $1
              AND a.deleted_at IS NULL
              AND a.processing_status = 'completed'
              AND c.artifact_id IS NULL
            ORDER BY a.uploaded_at DESC
            LIMIT $2
            "#
        );
        let rows = self.query(&sql, vec![program_id.into(), limit(limit_to)]).await?;
        rows.iter().map(artifact_from_row).collect()
    }
}

#[async_trait::async_trait]
impl SimilaritySearch for PgContextStore {
    async fn semantically_related(&self, target: &ArtifactRef, limit_to: usize) -> Result<Vec<ArtifactCandidate>> {
        let sql = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS},
                COALESCE((SELECT array_agg(p.person_name ORDER BY p.mention_count DESC)
                          FROM artifact_persons p WHERE p.artifact_id = a.artifact_id), '{{}}'::text[]) AS person_names,
                1 - (ae1.embedding <=> ae2.embedding) AS similarity
            FROM artifact_embeddings ae1
            CROSS JOIN artifact_embeddings ae2
            JOIN artifacts a ON ae2.artifact_id = a.artifact_id
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            WHERE ae1.artifact_id = $1
              AND ae2.artifact_id <> $1
              AND a.program_id = $2
              AND a.deleted_at IS NULL
              AND a.processing_status = 'completed'
              AND 1 - (ae1.embedding <=> ae2.embedding) > $3
            ORDER BY similarity DESC
            LIMIT $4
            "#
        );
        let rows = self
            .query(
                &sql,
                vec![
                    target.artifact_id.into(),
                    target.program_id.into(),
                    MIN_SEMANTIC_SIMILARITY.into(),
                    limit(limit_to),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let mut candidate = candidate_from_row(row, None)?;
                candidate.scores.semantic = row.try_get("", "similarity")?;
                Ok(candidate)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl EntityStore for PgContextStore {
    async fn persons_by_artifact(&self, artifact_id: Uuid) -> Result<Vec<PersonRecord>> {
        let sql = format!(
            r#"
            SELECT {PERSON_COLUMNS}
            FROM artifact_persons ap
            LEFT JOIN stakeholders st ON st.stakeholder_id = ap.stakeholder_id
            WHERE ap.artifact_id = $1
            ORDER BY ap.mention_count DESC
            "#
        );
        let rows = self.query(&sql, vec![artifact_id.into()]).await?;
        rows.iter().map(person_from_row).collect()
    }

    async fn artifacts_with_shared_people(
        &self,
        target: &ArtifactRef,
        person_ids: &[Uuid],
        limit_to: usize,
    ) -> Result<Vec<ArtifactCandidate>> {
        let sql = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS},
                array_agg(DISTINCT ap.person_name) AS shared_people
            FROM artifacts a
            JOIN artifact_persons ap ON ap.artifact_id = a.artifact_id AND ap.person_id = ANY($3)
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            WHERE a.artifact_id <> $1
              AND a.program_id = $2
              AND a.deleted_at IS NULL
              AND a.processing_status = 'completed'
            GROUP BY a.artifact_id, a.filename, a.artifact_category, a.artifact_subcategory,
                     a.uploaded_at, s.executive_summary
            HAVING COUNT(DISTINCT ap.person_id) >= 2
            ORDER BY COUNT(DISTINCT ap.person_id) DESC, a.artifact_id
            LIMIT $4
            "#
        );
        let rows = self
            .query(
                &sql,
                vec![
                    target.artifact_id.into(),
                    target.program_id.into(),
                    person_ids.to_vec().into(),
                    limit(limit_to),
                ],
            )
            .await?;
        Self::candidates(&rows, Some("shared_people"))
    }

    async fn relationships(&self, person_id: Uuid, program_id: Uuid) -> Result<Vec<PersonRelationship>> {
        let sql = r#"
            SELECT eg.person_id_1,
                   (SELECT person_name FROM artifact_persons WHERE person_id = eg.person_id_1 LIMIT 1) AS person_name_1,
                   eg.person_id_2,
                   (SELECT person_name FROM artifact_persons WHERE person_id = eg.person_id_2 LIMIT 1) AS person_name_2,
                   eg.co_occurrence_count, eg.shared_artifact_ids, eg.relationship_strength
            FROM artifact_entity_graph eg
            WHERE eg.program_id = $1
              AND (eg.person_id_1 = $2 OR eg.person_id_2 = $2)
            ORDER BY eg.co_occurrence_count DESC
            LIMIT $3
        "#;
        let rows = self
            .query(sql, vec![program_id.into(), person_id.into(), RELATIONSHIP_LIMIT.into()])
            .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    async fn program_relationships(&self, program_id: Uuid, min_co_occurrences: u32) -> Result<Vec<PersonRelationship>> {
        let edges = EntityEdgeEntity::find()
            .filter(EntityEdgeColumn::ProgramId.eq(program_id))
            .filter(EntityEdgeColumn::CoOccurrenceCount.gte(min_co_occurrences as i32))
            .order_by_desc(EntityEdgeColumn::RelationshipStrength)
            .all(self.db.read())
            .await?;
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let person_ids: Vec<Uuid> = edges
            .iter()
            .flat_map(|edge| [edge.person_id_1, edge.person_id_2])
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let names = self.person_names(&person_ids).await?;
        let name_of = |id: &Uuid| names.get(id).cloned().unwrap_or_default();

        Ok(edges
            .into_iter()
            .map(|edge| PersonRelationship {
                person_name_1: name_of(&edge.person_id_1),
                person_name_2: name_of(&edge.person_id_2),
                person_id_1: edge.person_id_1,
                person_id_2: edge.person_id_2,
                co_occurrence_count: edge.co_occurrence_count.max(0) as u32,
                shared_artifact_ids: edge.shared_artifact_ids,
                strength: edge.relationship_strength,
            })
            .collect())
    }

    async fn upsert_edge(&self, program_id: Uuid, person_a: Uuid, person_b: Uuid, artifact_id: Uuid) -> Result<()> {
        // The WHERE clause skips pairs that already list the artifact
        let sql = r#"
            INSERT INTO artifact_entity_graph (
                edge_id, program_id, person_id_1, person_id_2,
                co_occurrence_count, shared_artifact_ids, relationship_strength,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 1, ARRAY[$5::uuid], $6, NOW(), NOW())
            ON CONFLICT (person_id_1, person_id_2) DO UPDATE
            SET co_occurrence_count = artifact_entity_graph.co_occurrence_count + 1,
                shared_artifact_ids = array_append(artifact_entity_graph.shared_artifact_ids, $5::uuid),
                relationship_strength = LEAST(1.0, (artifact_entity_graph.co_occurrence_count + 1)::float8 / 10),
                updated_at = NOW()
            WHERE NOT ($5::uuid = ANY(artifact_entity_graph.shared_artifact_ids))
        "#;
        let affected = self
            .execute(
                sql,
                vec![
                    Uuid::new_v4().into(),
                    program_id.into(),
                    person_a.into(),
                    person_b.into(),
                    artifact_id.into(),
                    INITIAL_EDGE_STRENGTH.into(),
                ],
            )
            .await?;
        debug!(%person_a, %person_b, %artifact_id, recorded = affected > 0, "Entity edge upserted");
        Ok(())
    }

    async fn key_people(&self, program_id: Uuid, limit_to: usize) -> Result<Vec<PersonRecord>> {
        let sql = r#"
            SELECT ap.person_id,
                   (array_agg(ap.artifact_id ORDER BY a.uploaded_at DESC))[1] AS artifact_id,
                   ap.person_name, ap.person_role, ap.person_organization,
                   SUM(ap.mention_count)::bigint AS total_mentions,
                   COUNT(DISTINCT ap.artifact_id) AS artifact_count,
                   bool_or(st.is_internal) AS is_internal
            FROM artifact_persons ap
            JOIN artifacts a ON ap.artifact_id = a.artifact_id
            LEFT JOIN stakeholders st ON st.stakeholder_id = ap.stakeholder_id
            WHERE a.program_id = $1 AND a.deleted_at IS NULL
            GROUP BY ap.person_id, ap.person_name, ap.person_role, ap.person_organization
            ORDER BY total_mentions DESC
            LIMIT $2
        "#;
        let rows = self.query(sql, vec![program_id.into(), limit(limit_to)]).await?;

        rows.iter()
            .map(|row| {
                Ok(PersonRecord {
                    person_id: row.try_get("", "person_id")?,
                    artifact_id: row.try_get("", "artifact_id")?,
                    name: row.try_get("", "person_name")?,
                    role: row.try_get("", "person_role")?,
                    organization: row.try_get("", "person_organization")?,
                    mention_count: row.try_get::<i64>("", "total_mentions")?.max(0) as u32,
                    artifact_count: row.try_get::<i64>("", "artifact_count")?.max(0) as u32,
                    classification: row
                        .try_get::<Option<bool>>("", "is_internal")?
                        .map(|internal| if internal { Classification::Internal } else { Classification::External }),
                    snippets: Vec::new(),
                })
            })
            .collect()
    }

    async fn count_unique_people(&self, program_id: Uuid) -> Result<usize> {
        let sql = r#"
            SELECT COUNT(DISTINCT ap.person_id) AS people
            FROM artifact_persons ap
            JOIN artifacts a ON ap.artifact_id = a.artifact_id
            WHERE a.program_id = $1 AND a.deleted_at IS NULL
        "#;
        let rows = self.query(sql, vec![program_id.into()]).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<i64>("", "people")?.max(0) as usize),
            None => Ok(0),
        }
    }
}

#[async_trait::async_trait]
impl TemporalStore for PgContextStore {
    async fn temporally_related(
        &self,
        target: &ArtifactRef,
        window_days: i64,
        limit_to: usize,
    ) -> Result<Vec<ArtifactCandidate>> {
        let sql = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS},
                COALESCE((SELECT array_agg(p.person_name ORDER BY p.mention_count DESC)
                          FROM artifact_persons p WHERE p.artifact_id = a.artifact_id), '{{}}'::text[]) AS person_names
            FROM artifacts a
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            WHERE a.artifact_id <> $1
              AND a.program_id = $2
              AND a.deleted_at IS NULL
              AND a.processing_status = 'completed'
              AND ABS(EXTRACT(EPOCH FROM (a.uploaded_at - $3)) / 86400) <= $4
            ORDER BY ABS(EXTRACT(EPOCH FROM (a.uploaded_at - $3)))
            LIMIT $5
            "#
        );
        let rows = self
            .query(
                &sql,
                vec![
                    target.artifact_id.into(),
                    target.program_id.into(),
                    target.uploaded_at.into(),
                    (window_days as f64).into(),
                    limit(limit_to),
                ],
            )
            .await?;
        Self::candidates(&rows, None)
    }

    async fn artifacts_in_range(
        &self,
        program_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRef>> {
        let sql = format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM artifacts a
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            WHERE a.program_id = $1
              AND a.deleted_at IS NULL
              AND a.uploaded_at BETWEEN $2 AND $3
            ORDER BY a.uploaded_at ASC
            "#
        );
        let rows = self.query(&sql, vec![program_id.into(), start.into(), end.into()]).await?;
        rows.iter().map(artifact_from_row).collect()
    }

    async fn artifacts_by_program(&self, program_id: Uuid) -> Result<Vec<ArtifactRef>> {
        let sql = format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM artifacts a
            LEFT JOIN artifact_summaries s ON a.artifact_id = s.artifact_id
            WHERE a.program_id = $1 AND a.deleted_at IS NULL
            ORDER BY a.uploaded_at ASC
            "#
        );
        let rows = self.query(&sql, vec![program_id.into()]).await?;
        rows.iter().map(artifact_from_row).collect()
    }

    async fn replace_sequences(&self, program_id: Uuid, sequences: &[ArtifactSequence]) -> Result<()> {
        let txn = self.db.write().begin().await?;

        let removed = TemporalSequenceEntity::delete_many()
            .filter(TemporalSequenceColumn::ProgramId.eq(program_id))
            .exec(&txn)
            .await?;

        let created_at = Utc::now().fixed_offset();
        let rows: Vec<TemporalSequenceActiveModel> = sequences
            .iter()
            .filter(|sequence| sequence.program_id == program_id)
            .map(|sequence| TemporalSequenceActiveModel {
                sequence_id: Set(sequence.sequence_id),
                program_id: Set(sequence.program_id),
                sequence_name: Set(sequence.name.clone()),
                sequence_type: Set(sequence.sequence_type.as_str().to_string()),
                artifact_ids: Set(sequence.artifact_ids.clone()),
                start_date: Set(sequence.start_date.fixed_offset()),
                end_date: Set(sequence.end_date.fixed_offset()),
                detection_method: Set(sequence.detection_method.as_str().to_string()),
                confidence_score: Set(sequence.confidence),
                created_at: Set(created_at),
            })
            .collect();

        let inserted = rows.len();
        if !rows.is_empty() {
            TemporalSequenceEntity::insert_many(rows).exec(&txn).await?;
        }
        txn.commit().await?;

        debug!(
            program_id = %program_id,
            removed = removed.rows_affected,
            inserted,
            "Replaced temporal sequences"
        );
        Ok(())
    }

    async fn sequences_by_program(&self, program_id: Uuid) -> Result<Vec<ArtifactSequence>> {
        let rows = TemporalSequenceEntity::find()
            .filter(TemporalSequenceColumn::ProgramId.eq(program_id))
            .order_by_desc(TemporalSequenceColumn::StartDate)
            .all(self.db.read())
            .await?;
        rows.into_iter().map(sequence_from_row).collect()
    }
}

fn sequence_from_row(row: TemporalSequenceRow) -> Result<ArtifactSequence> {
    Ok(ArtifactSequence {
        sequence_id: row.sequence_id,
        program_id: row.program_id,
        name: row.sequence_name,
        sequence_type: row.sequence_type.parse()?,
        artifact_ids: row.artifact_ids,
        start_date: row.start_date.with_timezone(&Utc),
        end_date: row.end_date.with_timezone(&Utc),
        detection_method: row.detection_method.parse()?,
        confidence: row.confidence_score,
    })
}

#[async_trait::async_trait]
impl FactStore for PgContextStore {
    async fn facts_by_artifacts(&self, artifact_ids: &[Uuid]) -> Result<Vec<Fact>> {
        if artifact_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {FACT_COLUMNS}
            FROM artifact_facts f
            JOIN artifacts a ON f.artifact_id = a.artifact_id
            WHERE f.artifact_id = ANY($1)
            ORDER BY f.fact_type, f.fact_key, f.confidence_score DESC NULLS LAST
            LIMIT $2
            "#
        );
        let rows = self
            .query(&sql, vec![artifact_ids.to_vec().into(), FACT_LIMIT.into()])
            .await?;
        rows.iter().map(fact_from_row).collect()
    }

    async fn facts_by_key(&self, program_id: Uuid, key: &str) -> Result<Vec<Fact>> {
        let sql = format!(
            r#"
            SELECT {FACT_COLUMNS}
            FROM artifact_facts f
            JOIN artifacts a ON f.artifact_id = a.artifact_id
            WHERE a.program_id = $1
              AND a.deleted_at IS NULL
              AND f.fact_key ILIKE $2
            ORDER BY f.confidence_score DESC NULLS LAST
            "#
        );
        let pattern = format!("%{}%", key);
        let rows = self.query(&sql, vec![program_id.into(), pattern.into()]).await?;
        rows.iter().map(fact_from_row).collect()
    }

    async fn facts_by_program(&self, program_id: Uuid) -> Result<Vec<Fact>> {
        let sql = format!(
            r#"
            SELECT {FACT_COLUMNS}
            FROM artifact_facts f
            JOIN artifacts a ON f.artifact_id = a.artifact_id
            WHERE a.program_id = $1 AND a.deleted_at IS NULL
            ORDER BY f.extracted_at DESC
            "#
        );
        let rows = self.query(&sql, vec![program_id.into()]).await?;
        rows.iter().map(fact_from_row).collect()
    }
}

fn cache_entry_from_row(row: ContextCacheRow) -> Result<CachedContext> {
    let context: EnrichedContext = serde_json::from_value(row.context_data)?;
    Ok(CachedContext {
        artifact_id: row.artifact_id,
        program_id: row.program_id,
        context,
        token_count: row.token_count.max(0) as usize,
        artifacts_included: row.artifacts_included,
        version: row.cache_version,
        created_at: row.created_at.with_timezone(&Utc),
        expires_at: row.expires_at.with_timezone(&Utc),
    })
}

#[async_trait::async_trait]
impl ContextCacheStore for PgContextStore {
    /// Reads the primary: a replica may not yet hold an entry just written
    async fn get_entry(&self, artifact_id: Uuid) -> Result<Option<CachedContext>> {
        let row = ContextCacheEntity::find()
            .filter(ContextCacheColumn::ArtifactId.eq(artifact_id))
            .one(self.db.write())
            .await?;

        match row {
            None => Ok(None),
            Some(row) => match cache_entry_from_row(row) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    // Rows written by an older bundle layout read as misses
                    warn!(%artifact_id, error = %e, "Undecodable durable cache row ignored");
                    Ok(None)
                }
            },
        }
    }

    async fn upsert_entry(&self, entry: &CachedContext) -> Result<()> {
        let row = ContextCacheActiveModel {
            cache_id: Set(Uuid::new_v4()),
            artifact_id: Set(entry.artifact_id),
            program_id: Set(entry.program_id),
            context_data: Set(serde_json::to_value(&entry.context)?),
            token_count: Set(i32::try_from(entry.token_count).unwrap_or(i32::MAX)),
            artifacts_included: Set(entry.artifacts_included.clone()),
            cache_version: Set(entry.version),
            created_at: Set(entry.created_at.fixed_offset()),
            expires_at: Set(entry.expires_at.fixed_offset()),
        };

        ContextCacheEntity::insert(row)
            .on_conflict(
                OnConflict::column(ContextCacheColumn::ArtifactId)
                    .update_columns([
                        ContextCacheColumn::ProgramId,
                        ContextCacheColumn::ContextData,
                        ContextCacheColumn::TokenCount,
                        ContextCacheColumn::ArtifactsIncluded,
                        ContextCacheColumn::CacheVersion,
                        ContextCacheColumn::CreatedAt,
                        ContextCacheColumn::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.write())
            .await?;
        Ok(())
    }

    async fn delete_entry(&self, artifact_id: Uuid) -> Result<bool> {
        let result = ContextCacheEntity::delete_many()
            .filter(ContextCacheColumn::ArtifactId.eq(artifact_id))
            .exec(self.db.write())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = ContextCacheEntity::delete_many()
            .filter(ContextCacheColumn::ExpiresAt.lt(Utc::now().fixed_offset()))
            .exec(self.db.write())
            .await?;
        Ok(result.rows_affected)
    }

    async fn stats(&self) -> Result<DurableCacheStats> {
        let sql = r#"
            SELECT COUNT(*) FILTER (WHERE expires_at > NOW()) AS active_entries,
                   COUNT(*) FILTER (WHERE expires_at <= NOW()) AS expired_entries,
                   COALESCE(AVG(token_count) FILTER (WHERE expires_at > NOW()), 0)::float8 AS avg_token_count
            FROM artifact_context_cache
        "#;
        let rows = self.query(sql, Vec::new()).await?;
        let Some(row) = rows.first() else {
            return Ok(DurableCacheStats::default());
        };

        Ok(DurableCacheStats {
            active_entries: row.try_get::<i64>("", "active_entries")?.max(0) as u64,
            expired_entries: row.try_get::<i64>("", "expired_entries")?.max(0) as u64,
            avg_token_count: row.try_get("", "avg_token_count")?,
        })
    }
}
