//! Cross-document fact aggregation
//!
//! Provides:
//! - Consensus facts per bucket (financial, date, metric)
//! - Conflict detection with severity grading
//! - Numeric statistics with outlier flagging
//! - Program-wide fact lookups and counts

use crate::model::{
    AggregatedFact, AggregatedFacts, ConflictingValue, Fact, FactCategory, FactConflict, Severity,
};
use crate::store::FactStore;
use cerberus_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const TOKENS_PER_FACT: usize = 30;
pub const TOKENS_PER_CONFLICT: usize = 50;

/// Consensus facts kept per bucket
const MAX_FACTS_PER_BUCKET: usize = 20;
/// Outliers lie further than this many deviations from the other values
const OUTLIER_SIGMAS: f64 = 2.0;
const MIN_OUTLIER_SAMPLE: usize = 4;

/// Summary of numeric fact values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: usize,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// In input order
    pub outliers: Vec<f64>,
}

impl NumericStats {
    /// Population statistics over `values`; `None` when empty.
    ///
    /// A value is an outlier when it is more than two standard deviations
    /// (sample) from the mean of the remaining values.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let (mean, variance) = mean_and_variance(values);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let outliers = if values.len() < MIN_OUTLIER_SAMPLE {
            Vec::new()
        } else {
            values
                .iter()
                .enumerate()
                .filter(|(i, v)| {
                    let others: Vec<f64> = values
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| j != i)
                        .map(|(_, x)| *x)
                        .collect();
                    let (others_mean, others_var) = mean_and_variance(&others);
                    let n = others.len() as f64;
                    let sample_std = (others_var * n / (n - 1.0)).sqrt();
                    (**v - others_mean).abs() > OUTLIER_SIGMAS * sample_std
                })
                .map(|(_, v)| *v)
                .collect()
        };

        Some(Self {
            count: values.len(),
            mean,
            variance,
            std_dev: variance.sqrt(),
            min,
            max,
            outliers,
        })
    }
}

/// Fact counts of a whole program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactStats {
    pub total_facts: usize,
    pub facts_by_type: BTreeMap<String, usize>,
    pub total_conflicts: usize,
    pub major_conflicts: usize,
}

pub struct FactAggregationService {
    store: Arc<dyn FactStore>,
}

impl FactAggregationService {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }

    /// Aggregate the facts of the target and its related artifacts
    pub async fn aggregate(&self, target_id: Uuid, related_ids: &[Uuid]) -> Result<AggregatedFacts> {
        let mut ids = Vec::with_capacity(related_ids.len() + 1);
        ids.push(target_id);
        ids.extend(related_ids.iter().filter(|id| **id != target_id));

        let facts = self.store.facts_by_artifacts(&ids).await?;
        let aggregated = aggregate_facts(&facts);

        debug!(
            target_id = %target_id,
            facts = facts.len(),
            consensus = aggregated.fact_count(),
            conflicts = aggregated.conflicts.len(),
            "Facts aggregated"
        );
        Ok(aggregated)
    }

    pub async fn find_related_facts(&self, program_id: Uuid, key: &str) -> Result<Vec<Fact>> {
        self.store.facts_by_key(program_id, key).await
    }

    pub async fn fact_stats(&self, program_id: Uuid) -> Result<FactStats> {
        let facts = self.store.facts_by_program(program_id).await?;

        let mut facts_by_type = BTreeMap::new();
        for fact in &facts {
            *facts_by_type.entry(fact.fact_type.clone()).or_insert(0) += 1;
        }

        let conflicts = detect_conflicts(&facts);
        let major_conflicts = conflicts.iter().filter(|c| c.severity == Severity::Major).count();

        Ok(FactStats {
            total_facts: facts.len(),
            facts_by_type,
            total_conflicts: conflicts.len(),
            major_conflicts,
        })
    }
}

/// Bucket, merge and cross-check a set of facts
pub fn aggregate_facts(facts: &[Fact]) -> AggregatedFacts {
    let mut financial = Vec::new();
    let mut dates = Vec::new();
    let mut metrics = Vec::new();

    for fact in facts {
        match fact.category() {
            FactCategory::Financial => financial.push(fact),
            FactCategory::Date => dates.push(fact),
            FactCategory::Metric => metrics.push(fact),
            FactCategory::Other => {}
        }
    }

    let financial = consensus_facts(&financial);
    let dates = consensus_facts(&dates);
    let metrics = consensus_facts(&metrics);
    let conflicts = detect_conflicts(facts);

    let estimated_tokens =
        (financial.len() + dates.len() + metrics.len()) * TOKENS_PER_FACT + conflicts.len() * TOKENS_PER_CONFLICT;

    AggregatedFacts {
        financial,
        dates,
        metrics,
        conflicts,
        estimated_tokens,
    }
}

fn group_by_key<'a>(facts: impl IntoIterator<Item = &'a Fact>) -> BTreeMap<&'a str, Vec<&'a Fact>> {
    let mut groups: BTreeMap<&str, Vec<&Fact>> = BTreeMap::new();
    for fact in facts {
        groups.entry(fact.key.as_str()).or_default().push(fact);
    }
    groups
}

fn distinct_values(group: &[&Fact]) -> usize {
    group.iter().map(|f| f.value.as_str()).collect::<HashSet<_>>().len()
}

fn mean_confidence(group: &[&Fact]) -> f64 {
    let present: Vec<f64> = group.iter().filter_map(|f| f.confidence).collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    }
}

/// Keys whose value agrees across every fact of the bucket
fn consensus_facts(bucket: &[&Fact]) -> Vec<AggregatedFact> {
    let mut aggregated: Vec<AggregatedFact> = group_by_key(bucket.iter().copied())
        .into_iter()
        .filter(|(_, group)| distinct_values(group) == 1)
        .map(|(key, group)| {
            let mut seen = HashSet::new();
            let sources = group
                .iter()
                .filter(|f| seen.insert(f.source_filename.as_str()))
                .map(|f| f.source_filename.clone())
                .collect();

            AggregatedFact {
                key: key.to_string(),
                value: group[0].value.clone(),
                fact_type: group[0].fact_type.clone(),
                sources,
                occurrences: group.len(),
                confidence: mean_confidence(&group),
            }
        })
        .collect();

    // Stable sort keeps key order among equal counts
    aggregated.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    aggregated.truncate(MAX_FACTS_PER_BUCKET);
    aggregated
}

/// One conflict per key carrying two or more distinct values, in key order
pub fn detect_conflicts(facts: &[Fact]) -> Vec<FactConflict> {
    group_by_key(facts)
        .into_iter()
        .filter(|(_, group)| distinct_values(group) >= 2)
        .map(|(key, group)| {
            let mut seen: HashSet<(&str, Uuid)> = HashSet::new();
            let values = group
                .iter()
                .filter(|f| seen.insert((f.value.as_str(), f.artifact_id)))
                .map(|f| ConflictingValue {
                    value: f.value.clone(),
                    artifact_id: f.artifact_id,
                    source_filename: f.source_filename.clone(),
                    confidence: f.confidence.unwrap_or(0.0),
                })
                .collect();

            FactConflict {
                key: key.to_string(),
                values,
                severity: severity(&group),
            }
        })
        .collect()
}

/// Grade a conflicting key group
pub fn severity(group: &[&Fact]) -> Severity {
    let distinct = distinct_values(group);
    if distinct > 3 {
        return Severity::Major;
    }
    if mean_confidence(group) > 0.8 && distinct > 2 {
        return Severity::Major;
    }
    match group.first() {
        Some(fact) if fact.category() == FactCategory::Financial => Severity::Major,
        _ => Severity::Minor,
    }
}

/// Statistics over the facts carrying a normalized numeric value
pub fn numeric_stats(facts: &[Fact]) -> Option<NumericStats> {
    let values: Vec<f64> = facts
        .iter()
        .filter_map(|f| f.normalized_value)
        .filter(|v| v.is_finite())
        .collect();
    NumericStats::from_values(&values)
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}
