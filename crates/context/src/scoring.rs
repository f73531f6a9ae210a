//! Relevance scoring and budget-constrained selection
//!
//! Provides:
//! - Five-signal weighted scoring of candidate artifacts
//! - Token cost estimation per candidate
//! - Deterministic first-fit selection within a token budget

use crate::model::{ArtifactCandidate, ArtifactRef};
use cerberus_common::config::WeightsConfig;
use cerberus_common::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Decay constant of the temporal signal, in days
pub const TEMPORAL_DECAY_DAYS: f64 = 90.0;

/// Fact count at which the density signal saturates
pub const DENSITY_CAP: u32 = 20;

const WEIGHT_TOLERANCE: f64 = 0.01;

const BASE_TOKENS: usize = 20;
const FILENAME_TOKENS: usize = 10;
const METADATA_TOKENS: usize = 15;
const TOKENS_PER_PERSON: usize = 8;
const TOKENS_PER_TOPIC: usize = 3;

/// Category pairs that earn partial type credit, keyed by target category
const RELATED_CATEGORIES: &[(&str, &[&str])] = &[
    ("contract", &["invoice", "change_order", "amendment"]),
    ("invoice", &["contract", "purchase_order"]),
    ("report", &["meeting_notes", "status_report"]),
    ("email", &["meeting_notes", "memo"]),
    ("amendment", &["contract", "change_order"]),
];

/// Weights of the five relevance signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub semantic: f64,
    pub entity: f64,
    pub temporal: f64,
    pub type_match: f64,
    pub density: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.40,
            entity: 0.25,
            temporal: 0.20,
            type_match: 0.10,
            density: 0.05,
        }
    }
}

impl From<WeightsConfig> for ScoringWeights {
    fn from(w: WeightsConfig) -> Self {
        Self {
            semantic: w.semantic,
            entity: w.entity,
            temporal: w.temporal,
            type_match: w.type_match,
            density: w.density,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.entity + self.temporal + self.type_match + self.density
    }

    /// Reject weights outside [0, 1] or not summing to 1.0 within tolerance
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("semantic", self.semantic),
            ("entity", self.entity),
            ("temporal", self.temporal),
            ("type_match", self.type_match),
            ("density", self.density),
        ];

        for (name, value) in named {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::validation(
                    format!("weight {} must be between 0 and 1 (got {:.4})", name, value),
                    Some(name),
                ));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(AppError::validation(
                format!("scoring weights must sum to 1.0 (got {:.4})", sum),
                Some("weights"),
            ));
        }

        Ok(())
    }
}

/// Score, weight and weighted contribution of one signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentContribution {
    pub score: f64,
    pub weight: f64,
    pub contribution: f64,
}

impl ComponentContribution {
    fn new(score: f64, weight: f64) -> Self {
        Self { score, weight, contribution: score * weight }
    }
}

/// Debug view of how a candidate's total was reached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total_score: f64,
    pub semantic: ComponentContribution,
    pub entity: ComponentContribution,
    pub temporal: ComponentContribution,
    pub type_match: ComponentContribution,
    pub density: ComponentContribution,
    pub estimated_tokens: usize,
}

/// Pure scoring over candidates; holds only validated weights
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Fill the candidate's sub-scores, shared people, token estimate and total.
    ///
    /// The semantic sub-score is expected to be set by similarity search
    /// beforehand; it is clamped into [0, 1].
    pub fn score(&self, candidate: &mut ArtifactCandidate, target: &ArtifactRef, target_people: &[Uuid]) -> f64 {
        let target_set: HashSet<Uuid> = target_people.iter().copied().collect();
        let candidate_set: HashSet<Uuid> = candidate.person_ids.iter().copied().collect();

        let mut shared: Vec<Uuid> = candidate_set.intersection(&target_set).copied().collect();
        shared.sort_unstable();

        let scores = &mut candidate.scores;
        scores.semantic = clamp_unit(scores.semantic);
        scores.entity = entity_overlap(&candidate_set, &target_set);
        scores.temporal = temporal_proximity(candidate.uploaded_at, target.uploaded_at);
        scores.type_match = type_match(candidate.category.as_deref(), target.category.as_deref());
        scores.density = fact_density(candidate.fact_count);

        candidate.shared_person_ids = shared;
        candidate.estimated_tokens = estimate_tokens(candidate);
        candidate.total_score = self.weighted_total(candidate);
        candidate.total_score
    }

    fn weighted_total(&self, candidate: &ArtifactCandidate) -> f64 {
        let s = &candidate.scores;
        let w = &self.weights;
        w.semantic * s.semantic
            + w.entity * s.entity
            + w.temporal * s.temporal
            + w.type_match * s.type_match
            + w.density * s.density
    }

    /// Highest scores first; accept while the running total stays within
    /// budget and stop at the first candidate that would exceed it.
    pub fn select_top_n(&self, mut candidates: Vec<ArtifactCandidate>, token_budget: usize) -> Vec<ArtifactCandidate> {
        candidates.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then_with(|| a.artifact_id.cmp(&b.artifact_id))
        });

        let mut selected = Vec::new();
        let mut used = 0usize;

        for mut candidate in candidates {
            let tokens = estimate_tokens(&candidate);
            if used + tokens > token_budget {
                break;
            }
            candidate.estimated_tokens = tokens;
            used += tokens;
            selected.push(candidate);
        }

        selected
    }

    pub fn score_and_select(
        &self,
        mut candidates: Vec<ArtifactCandidate>,
        target: &ArtifactRef,
        target_people: &[Uuid],
        token_budget: usize,
    ) -> Vec<ArtifactCandidate> {
        for candidate in candidates.iter_mut() {
            self.score(candidate, target, target_people);
        }
        self.select_top_n(candidates, token_budget)
    }

    pub fn score_breakdown(&self, candidate: &ArtifactCandidate) -> ScoreBreakdown {
        let s = &candidate.scores;
        let w = &self.weights;
        ScoreBreakdown {
            total_score: candidate.total_score,
            semantic: ComponentContribution::new(s.semantic, w.semantic),
            entity: ComponentContribution::new(s.entity, w.entity),
            temporal: ComponentContribution::new(s.temporal, w.temporal),
            type_match: ComponentContribution::new(s.type_match, w.type_match),
            density: ComponentContribution::new(s.density, w.density),
            estimated_tokens: candidate.estimated_tokens,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Shared people over the larger of the two de-duplicated sets
pub fn entity_overlap(candidate: &HashSet<Uuid>, target: &HashSet<Uuid>) -> f64 {
    if candidate.is_empty() || target.is_empty() {
        return 0.0;
    }
    let shared = candidate.intersection(target).count();
    shared as f64 / candidate.len().max(target.len()) as f64
}

/// `exp(-|days| / 90)`, symmetric in its arguments
pub fn temporal_proximity(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    let seconds = (a - b).num_milliseconds().abs() as f64 / 1000.0;
    let days = seconds / 86_400.0;
    (-days / TEMPORAL_DECAY_DAYS).exp()
}

/// 1.0 on an exact category match, 0.5 for a related category, else 0
pub fn type_match(candidate: Option<&str>, target: Option<&str>) -> f64 {
    let (candidate, target) = match (candidate, target) {
        (Some(c), Some(t)) if !c.is_empty() && !t.is_empty() => (c, t),
        _ => return 0.0,
    };

    if candidate == target {
        return 1.0;
    }

    let related = RELATED_CATEGORIES
        .iter()
        .find(|(category, _)| *category == target)
        .map(|(_, related)| related.contains(&candidate))
        .unwrap_or(false);

    if related { 0.5 } else { 0.0 }
}

pub fn fact_density(fact_count: u32) -> f64 {
    fact_count.min(DENSITY_CAP) as f64 / DENSITY_CAP as f64
}

/// Rough token cost of presenting the candidate (1 token per 4 summary chars)
pub fn estimate_tokens(candidate: &ArtifactCandidate) -> usize {
    let summary_chars = candidate
        .executive_summary
        .as_deref()
        .map(|s| s.chars().count())
        .unwrap_or(0);

    BASE_TOKENS
        + FILENAME_TOKENS
        + METADATA_TOKENS
        + summary_chars / 4
        + candidate.mentioned_people.len() * TOKENS_PER_PERSON
        + candidate.topics.len() * TOKENS_PER_TOPIC
}
