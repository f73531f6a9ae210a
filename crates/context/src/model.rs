//! Domain types shared by the context services
//!
//! Provides:
//! - Artifact, person and fact records read from the stores
//! - Scored candidates and the assembled `EnrichedContext` bundle
//! - Closed enumerations for statuses, relations and severities

use cerberus_common::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Processing state of an ingested artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown processing status '{}'", other),
            }),
        }
    }
}

/// Metadata of an artifact as seen by the context engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: Uuid,
    pub program_id: Uuid,
    pub filename: String,
    pub category: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub status: ProcessingStatus,
    pub summary: Option<String>,
}

/// Per-signal relevance sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub semantic: f64,
    pub entity: f64,
    pub temporal: f64,
    pub type_match: f64,
    pub density: f64,
}

/// An artifact considered for inclusion in a context bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactCandidate {
    pub artifact_id: Uuid,
    pub filename: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub executive_summary: Option<String>,

    pub mentioned_people: Vec<String>,
    pub person_ids: Vec<Uuid>,
    /// Intersection with the target's people, filled during scoring
    pub shared_person_ids: Vec<Uuid>,

    pub topics: Vec<String>,
    pub fact_count: u32,

    pub scores: ComponentScores,
    pub total_score: f64,
    pub estimated_tokens: usize,
}

/// Internal/external classification of a person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Internal,
    External,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Internal => f.write_str("INTERNAL"),
            Classification::External => f.write_str("EXTERNAL"),
        }
    }
}

/// A person mentioned in one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_id: Uuid,
    pub artifact_id: Uuid,
    pub name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub mention_count: u32,
    /// Artifacts in the program mentioning the same name
    pub artifact_count: u32,
    /// Known only once linked to a stakeholder
    pub classification: Option<Classification>,
    pub snippets: Vec<String>,
}

/// A stored co-occurrence edge with both names resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRelationship {
    pub person_id_1: Uuid,
    pub person_name_1: String,
    pub person_id_2: Uuid,
    pub person_name_2: String,
    pub co_occurrence_count: u32,
    pub shared_artifact_ids: Vec<Uuid>,
    pub strength: f64,
}

impl PersonRelationship {
    /// Name of the side that is not `person_id`
    pub fn other_name(&self, person_id: Uuid) -> &str {
        if self.person_id_2 == person_id {
            &self.person_name_1
        } else {
            &self.person_name_2
        }
    }

    pub fn involves(&self, person_id: Uuid) -> bool {
        self.person_id_1 == person_id || self.person_id_2 == person_id
    }
}

/// A person as presented in a context bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonContext {
    pub person_id: Uuid,
    pub name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub classification: Option<Classification>,
    pub mention_count: u32,
    pub artifact_count: u32,
    pub co_occurs_with: Vec<String>,
    pub recent_context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityGraphContext {
    pub key_people: Vec<PersonContext>,
    pub total_relationships: usize,
    pub estimated_tokens: usize,
}

/// Position of a timeline entry relative to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRelation {
    Before,
    After,
    SameDay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub artifact_id: Uuid,
    pub filename: String,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub relative_time: String,
    pub relation: TemporalRelation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Most recent first
    pub preceding: Vec<TimelineEntry>,
    /// Soonest first
    pub following: Vec<TimelineEntry>,
    pub estimated_tokens: usize,
}

/// A structured fact extracted from one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: Uuid,
    pub artifact_id: Uuid,
    pub source_filename: String,
    pub fact_type: String,
    pub key: String,
    pub value: String,
    pub normalized_value: Option<f64>,
    pub confidence: Option<f64>,
}

impl Fact {
    pub fn category(&self) -> FactCategory {
        FactCategory::of(&self.fact_type)
    }
}

/// Bucket a fact type aggregates into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Financial,
    Date,
    Metric,
    Other,
}

impl FactCategory {
    pub fn of(fact_type: &str) -> Self {
        match fact_type {
            "amount" | "currency" | "financial" => FactCategory::Financial,
            "date" | "deadline" | "milestone" => FactCategory::Date,
            "metric" | "count" | "percentage" => FactCategory::Metric,
            _ => FactCategory::Other,
        }
    }
}

/// A fact key whose value agrees across every source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFact {
    pub key: String,
    pub value: String,
    pub fact_type: String,
    /// Source filenames in first-seen order
    pub sources: Vec<String>,
    pub occurrences: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingValue {
    pub value: String,
    pub artifact_id: Uuid,
    pub source_filename: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactConflict {
    pub key: String,
    pub values: Vec<ConflictingValue>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFacts {
    pub financial: Vec<AggregatedFact>,
    pub dates: Vec<AggregatedFact>,
    pub metrics: Vec<AggregatedFact>,
    pub conflicts: Vec<FactConflict>,
    pub estimated_tokens: usize,
}

impl AggregatedFacts {
    pub fn fact_count(&self) -> usize {
        self.financial.len() + self.dates.len() + self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fact_count() == 0 && self.conflicts.is_empty()
    }
}

/// Estimated tokens per bundle component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub related_artifacts: usize,
    pub entity_graph: usize,
    pub timeline: usize,
    pub facts: usize,
}

impl TokenBreakdown {
    pub fn total(&self) -> usize {
        self.related_artifacts + self.entity_graph + self.timeline + self.facts
    }
}

/// The assembled cross-document context of one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedContext {
    pub target_artifact_id: Uuid,
    pub program_id: Uuid,
    pub related_artifacts: Vec<ArtifactCandidate>,
    pub entity_graph: EntityGraphContext,
    pub timeline: Timeline,
    pub aggregated_facts: AggregatedFacts,
    pub estimated_tokens: usize,
    pub token_budget: usize,
    pub breakdown: TokenBreakdown,
    pub was_truncated: bool,
}

impl EnrichedContext {
    /// Target first, then the selected related artifacts
    pub fn artifacts_included(&self) -> Vec<Uuid> {
        std::iter::once(self.target_artifact_id)
            .chain(self.related_artifacts.iter().map(|a| a.artifact_id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceType {
    DocumentTypeSeries,
    WeeklySeries,
    MonthlySeries,
    QuarterlySeries,
}

impl SequenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceType::DocumentTypeSeries => "document_type_series",
            SequenceType::WeeklySeries => "weekly_series",
            SequenceType::MonthlySeries => "monthly_series",
            SequenceType::QuarterlySeries => "quarterly_series",
        }
    }
}

impl FromStr for SequenceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_type_series" => Ok(SequenceType::DocumentTypeSeries),
            "weekly_series" => Ok(SequenceType::WeeklySeries),
            "monthly_series" => Ok(SequenceType::MonthlySeries),
            "quarterly_series" => Ok(SequenceType::QuarterlySeries),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown sequence type '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    CategoryGrouping,
    IntervalAnalysis,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::CategoryGrouping => "category_grouping",
            DetectionMethod::IntervalAnalysis => "interval_analysis",
        }
    }
}

impl FromStr for DetectionMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category_grouping" => Ok(DetectionMethod::CategoryGrouping),
            "interval_analysis" => Ok(DetectionMethod::IntervalAnalysis),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown detection method '{}'", other),
            }),
        }
    }
}

/// A recurring pattern among a program's artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSequence {
    pub sequence_id: Uuid,
    pub program_id: Uuid,
    pub name: String,
    pub sequence_type: SequenceType,
    /// Upload order
    pub artifact_ids: Vec<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub detection_method: DetectionMethod,
    pub confidence: f64,
}

/// Durable-tier record of an assembled bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedContext {
    pub artifact_id: Uuid,
    pub program_id: Uuid,
    pub context: EnrichedContext,
    pub token_count: usize,
    pub artifacts_included: Vec<Uuid>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedContext {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
