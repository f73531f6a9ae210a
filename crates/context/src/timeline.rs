//! Temporal organization of a program's artifacts
//!
//! Provides:
//! - A before/after timeline around a target artifact
//! - Human-readable relative time labels
//! - Detection and persistence of recurring document sequences

use crate::model::{
    ArtifactCandidate, ArtifactRef, ArtifactSequence, DetectionMethod, SequenceType, TemporalRelation,
    Timeline, TimelineEntry,
};
use crate::render::truncate_chars;
use crate::store::TemporalStore;
use cerberus_common::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Token estimate of one timeline entry
pub const TOKENS_PER_ENTRY: usize = 80;

const MAX_PRECEDING: usize = 5;
const MAX_FOLLOWING: usize = 3;
const SUMMARY_CHARS: usize = 150;

const MIN_SEQUENCE_LEN: usize = 3;
const CATEGORY_CONFIDENCE: f64 = 0.7;
const INTERVAL_CONFIDENCE: f64 = 0.85;
/// Interval std-dev must stay below this fraction of the mean
const REGULARITY_RATIO: f64 = 0.3;

pub struct TimelineService {
    store: Arc<dyn TemporalStore>,
    window_days: i64,
}

impl TimelineService {
    pub fn new(store: Arc<dyn TemporalStore>, window_days: i64) -> Self {
        Self { store, window_days }
    }

    /// Neighbours within the window: up to 5 before (most recent first) and
    /// up to 3 after (soonest first). Same-instant uploads count as before.
    pub async fn build_timeline(&self, target: &ArtifactRef) -> Result<Timeline> {
        let window = Duration::days(self.window_days);
        let artifacts = self
            .store
            .artifacts_in_range(target.program_id, target.uploaded_at - window, target.uploaded_at + window)
            .await?;

        let mut preceding = Vec::new();
        let mut following = Vec::new();

        for artifact in artifacts {
            if artifact.artifact_id == target.artifact_id {
                continue;
            }

            let relation = if artifact.uploaded_at < target.uploaded_at {
                TemporalRelation::Before
            } else if artifact.uploaded_at > target.uploaded_at {
                TemporalRelation::After
            } else {
                TemporalRelation::SameDay
            };

            let entry = TimelineEntry {
                artifact_id: artifact.artifact_id,
                relative_time: relative_label(artifact.uploaded_at, target.uploaded_at),
                summary: artifact
                    .summary
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(|s| truncate_chars(s, SUMMARY_CHARS)),
                filename: artifact.filename,
                category: artifact.category,
                uploaded_at: artifact.uploaded_at,
                relation,
            };

            match relation {
                TemporalRelation::After => following.push(entry),
                TemporalRelation::Before | TemporalRelation::SameDay => preceding.push(entry),
            }
        }

        preceding.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        following.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        preceding.truncate(MAX_PRECEDING);
        following.truncate(MAX_FOLLOWING);

        let estimated_tokens = (preceding.len() + following.len()) * TOKENS_PER_ENTRY;
        Ok(Timeline { preceding, following, estimated_tokens })
    }

    pub async fn temporal_candidates(&self, target: &ArtifactRef, limit: usize) -> Result<Vec<ArtifactCandidate>> {
        self.store.temporally_related(target, self.window_days, limit).await
    }

    pub async fn detect_sequences(&self, program_id: Uuid) -> Result<Vec<ArtifactSequence>> {
        let artifacts = self.store.artifacts_by_program(program_id).await?;
        Ok(detect_sequences(program_id, artifacts))
    }

    /// Detect and persist, returning what was saved. The stored set for the
    /// program is replaced, so sequences that no longer hold are dropped.
    pub async fn refresh_sequences(&self, program_id: Uuid) -> Result<Vec<ArtifactSequence>> {
        let sequences = self.detect_sequences(program_id).await?;
        self.store.replace_sequences(program_id, &sequences).await?;
        info!(%program_id, sequences = sequences.len(), "Temporal sequences refreshed");
        Ok(sequences)
    }

    pub async fn sequences_for_program(&self, program_id: Uuid) -> Result<Vec<ArtifactSequence>> {
        self.store.sequences_by_program(program_id).await
    }
}

/// Label the gap between two instants ("3 days", "1 week", ...)
pub fn relative_label(at: DateTime<Utc>, reference: DateTime<Utc>) -> String {
    let seconds = (at - reference).num_seconds().unsigned_abs();
    let minutes = seconds / 60;
    let hours = seconds / 3600;
    let days = seconds / 86_400;

    if seconds < 3600 {
        if minutes < 5 {
            "same time".to_string()
        } else {
            format!("{} minutes", minutes)
        }
    } else if days == 0 {
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{} hours", hours)
        }
    } else if days == 1 {
        "1 day".to_string()
    } else if days < 7 {
        format!("{} days", days)
    } else if days < 14 {
        "1 week".to_string()
    } else if days < 30 {
        format!("{} weeks", days / 7)
    } else if days < 60 {
        "1 month".to_string()
    } else {
        format!("{} months", days / 30)
    }
}

/// Category series (0.7) for every category with 3+ artifacts, then interval
/// series (0.85) for those whose gaps are regular.
pub fn detect_sequences(program_id: Uuid, mut artifacts: Vec<ArtifactRef>) -> Vec<ArtifactSequence> {
    if artifacts.len() < MIN_SEQUENCE_LEN {
        return Vec::new();
    }
    artifacts.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));

    let mut groups: BTreeMap<String, Vec<&ArtifactRef>> = BTreeMap::new();
    for artifact in &artifacts {
        if let Some(category) = artifact.category.as_deref().filter(|c| !c.is_empty()) {
            groups.entry(category.to_string()).or_default().push(artifact);
        }
    }
    groups.retain(|_, group| group.len() >= MIN_SEQUENCE_LEN);

    let mut sequences: Vec<ArtifactSequence> = groups
        .iter()
        .map(|(category, group)| {
            sequence(
                program_id,
                format!("{} Documents", category),
                SequenceType::DocumentTypeSeries,
                DetectionMethod::CategoryGrouping,
                CATEGORY_CONFIDENCE,
                group,
            )
        })
        .collect();

    for (category, group) in &groups {
        let intervals: Vec<f64> = group
            .windows(2)
            .map(|pair| (pair[1].uploaded_at - pair[0].uploaded_at).num_seconds() as f64 / 86_400.0)
            .collect();

        let (mean, std_dev) = mean_and_std(&intervals);
        if std_dev >= mean * REGULARITY_RATIO {
            debug!(category = %category, mean, std_dev, "Irregular upload intervals");
            continue;
        }

        let (sequence_type, cadence) = if mean < 8.0 {
            (SequenceType::WeeklySeries, "Weekly")
        } else if mean < 35.0 {
            (SequenceType::MonthlySeries, "Monthly")
        } else if mean < 100.0 {
            (SequenceType::QuarterlySeries, "Quarterly")
        } else {
            continue;
        };

        sequences.push(sequence(
            program_id,
            format!("{} {} Reports", cadence, category),
            sequence_type,
            DetectionMethod::IntervalAnalysis,
            INTERVAL_CONFIDENCE,
            group,
        ));
    }

    sequences
}

fn sequence(
    program_id: Uuid,
    name: String,
    sequence_type: SequenceType,
    detection_method: DetectionMethod,
    confidence: f64,
    group: &[&ArtifactRef],
) -> ArtifactSequence {
    let start_date = group.first().map(|a| a.uploaded_at).unwrap_or_default();
    let end_date = group.last().map(|a| a.uploaded_at).unwrap_or_default();
    let artifact_ids: Vec<Uuid> = group.iter().map(|a| a.artifact_id).collect();
    ArtifactSequence {
        sequence_id: sequence_id(program_id, sequence_type, &artifact_ids),
        program_id,
        name,
        sequence_type,
        artifact_ids,
        start_date,
        end_date,
        detection_method,
        confidence,
    }
}

/// Stable id for the same series over the same artifacts, namespaced by program
fn sequence_id(program_id: Uuid, sequence_type: SequenceType, artifact_ids: &[Uuid]) -> Uuid {
    let mut name = Vec::with_capacity(32 + artifact_ids.len() * 16);
    name.extend_from_slice(sequence_type.as_str().as_bytes());
    for id in artifact_ids {
        name.extend_from_slice(id.as_bytes());
    }
    Uuid::new_v5(&program_id, &name)
}

/// Population mean and standard deviation
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
