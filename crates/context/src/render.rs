//! Natural-language rendering of an enriched context bundle
//!
//! Provides the four prompt sections (related artifacts, key people,
//! timeline, aggregated facts) plus a one-line summary. Rendering never
//! fails; an empty component renders as an empty string.

use crate::model::{AggregatedFact, EnrichedContext, TimelineEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SUMMARY_CHARS: usize = 200;
const MAX_PEOPLE: usize = 3;
const MAX_TOPICS: usize = 4;
const MAX_SOURCES: usize = 3;

/// Every section of a bundle, rendered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContext {
    pub summary: String,
    pub related_artifacts: String,
    pub key_people: String,
    pub timeline: String,
    pub facts: String,
}

pub fn render(ctx: &EnrichedContext, now: DateTime<Utc>) -> RenderedContext {
    RenderedContext {
        summary: context_summary(ctx),
        related_artifacts: related_artifacts(ctx, now),
        key_people: key_people(ctx),
        timeline: timeline(ctx),
        facts: aggregated_facts(ctx),
    }
}

/// Cut `s` to at most `max` characters, ending in "..." when shortened
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// "today", "yesterday", "3 weeks ago", ...
pub fn relative_to_now(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - at).num_days();
    match days {
        d if d <= 0 => "today".to_string(),
        1 => "yesterday".to_string(),
        d if d < 7 => format!("{} days ago", d),
        d if d < 14 => "1 week ago".to_string(),
        d if d < 30 => format!("{} weeks ago", d / 7),
        d if d < 60 => "1 month ago".to_string(),
        d if d < 365 => format!("{} months ago", d / 30),
        d if d < 730 => "1 year ago".to_string(),
        d => format!("{} years ago", d / 365),
    }
}

/// Up to `max` items, then "+N more"
fn list_with_more(items: &[String], max: usize) -> String {
    let mut list = items.iter().take(max).cloned().collect::<Vec<_>>().join(", ");
    if items.len() > max {
        list.push_str(&format!(", +{} more", items.len() - max));
    }
    list
}

pub fn context_summary(ctx: &EnrichedContext) -> String {
    let mut summary = format!("Context includes: {} related artifacts", ctx.related_artifacts.len());

    if !ctx.entity_graph.key_people.is_empty() {
        summary.push_str(&format!(", {} key people", ctx.entity_graph.key_people.len()));
    }

    let timeline_docs = ctx.timeline.preceding.len() + ctx.timeline.following.len();
    if timeline_docs > 0 {
        summary.push_str(&format!(", timeline of {} documents", timeline_docs));
    }

    let facts = ctx.aggregated_facts.fact_count();
    if facts > 0 {
        summary.push_str(&format!(", {} aggregated facts", facts));
    }
    if !ctx.aggregated_facts.conflicts.is_empty() {
        summary.push_str(&format!(", {} fact conflicts", ctx.aggregated_facts.conflicts.len()));
    }

    summary
}

pub fn related_artifacts(ctx: &EnrichedContext, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    for (i, artifact) in ctx.related_artifacts.iter().enumerate() {
        out.push_str(&format!("[{}] \"{}\"", i + 1, artifact.filename));
        if let Some(category) = artifact.category.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!(" ({})", category));
        }
        out.push_str(&format!(", uploaded {}\n", relative_to_now(artifact.uploaded_at, now)));

        if let Some(summary) = artifact.executive_summary.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(&format!("    Summary: {}\n", truncate_chars(summary, SUMMARY_CHARS)));
        }

        if !artifact.shared_person_ids.is_empty() && !artifact.mentioned_people.is_empty() {
            out.push_str(&format!(
                "    Shared People: {}\n",
                list_with_more(&artifact.mentioned_people, MAX_PEOPLE)
            ));
        }

        if !artifact.topics.is_empty() {
            out.push_str(&format!("    Topics: {}\n", list_with_more(&artifact.topics, MAX_TOPICS)));
        }

        out.push_str(&format!("    Relevance Score: {:.2}\n\n", artifact.total_score));
    }

    out
}

pub fn key_people(ctx: &EnrichedContext) -> String {
    let people = &ctx.entity_graph.key_people;
    if people.is_empty() {
        return String::new();
    }

    let mut out = String::from("Key people across related documents:\n\n");

    for person in people {
        out.push_str(&format!("- {}", person.name));
        if let Some(role) = person.role.as_deref().filter(|r| !r.is_empty()) {
            match person.organization.as_deref().filter(|o| !o.is_empty()) {
                Some(org) => out.push_str(&format!(" ({}, {})", role, org)),
                None => out.push_str(&format!(" ({})", role)),
            }
        }
        if let Some(classification) = person.classification {
            out.push_str(&format!(" [{}]", classification));
        }
        out.push('\n');

        if person.mention_count > 0 {
            out.push_str(&format!("  → Mentioned {} times", person.mention_count));
            if person.artifact_count > 0 {
                out.push_str(&format!(" across {} documents", person.artifact_count));
            }
            out.push('\n');
        }

        if !person.co_occurs_with.is_empty() {
            out.push_str(&format!("  → Frequently appears with: {}\n", person.co_occurs_with.join(", ")));
        }

        if let Some(recent) = person.recent_context.as_deref().filter(|r| !r.is_empty()) {
            out.push_str(&format!("  → Recent context: {}\n", recent));
        }

        out.push('\n');
    }

    out
}

pub fn timeline(ctx: &EnrichedContext) -> String {
    let timeline = &ctx.timeline;
    if timeline.preceding.is_empty() && timeline.following.is_empty() {
        return String::new();
    }

    let section = |title: &str, entries: &[TimelineEntry]| {
        let mut out = format!("{}:\n", title);
        for entry in entries {
            out.push_str(&format!("  [{}] {}", entry.relative_time, entry.filename));
            if let Some(category) = entry.category.as_deref().filter(|c| !c.is_empty()) {
                out.push_str(&format!(" ({})", category));
            }
            out.push('\n');
            if let Some(summary) = entry.summary.as_deref().filter(|s| !s.is_empty()) {
                out.push_str(&format!("    {}\n", summary));
            }
        }
        out
    };

    let mut out = String::new();
    if !timeline.preceding.is_empty() {
        out.push_str(&section("Before Current Artifact", &timeline.preceding));
        out.push('\n');
    }

    out.push_str("Current Artifact:\n  [Today] [ANALYZING THIS DOCUMENT]\n\n");

    if !timeline.following.is_empty() {
        out.push_str(&section("After Current Artifact", &timeline.following));
    }

    out
}

fn sources(fact: &AggregatedFact) -> String {
    if fact.sources.len() > MAX_SOURCES {
        format!("{}, {}, +{} more", fact.sources[0], fact.sources[1], fact.sources.len() - 2)
    } else {
        fact.sources.join(", ")
    }
}

pub fn aggregated_facts(ctx: &EnrichedContext) -> String {
    let facts = &ctx.aggregated_facts;
    if facts.is_empty() {
        return String::new();
    }

    let mut out = String::new();

    if !facts.financial.is_empty() {
        out.push_str("Financial Facts:\n");
        for fact in &facts.financial {
            out.push_str(&format!(
                "- {}: {} (from {}, confidence: {:.2})\n",
                fact.key,
                fact.value,
                sources(fact),
                fact.confidence
            ));
        }
        out.push('\n');
    }

    if !facts.dates.is_empty() {
        out.push_str("Date Facts:\n");
        for fact in &facts.dates {
            out.push_str(&format!("- {}: {} (mentioned {} times)\n", fact.key, fact.value, fact.occurrences));
        }
        out.push('\n');
    }

    if !facts.metrics.is_empty() {
        out.push_str("Metric Facts:\n");
        for fact in &facts.metrics {
            out.push_str(&format!("- {}: {} (confidence: {:.2})\n", fact.key, fact.value, fact.confidence));
        }
        out.push('\n');
    }

    if !facts.conflicts.is_empty() {
        out.push_str("CONFLICTS DETECTED:\n");
        for conflict in &facts.conflicts {
            out.push_str(&format!(
                "- \"{}\" has {} conflicting values ({:?}):\n",
                conflict.key,
                conflict.values.len(),
                conflict.severity
            ));
            for value in &conflict.values {
                out.push_str(&format!(
                    "  • {} (from {}, confidence: {:.2})\n",
                    value.value, value.source_filename, value.confidence
                ));
            }
            out.push('\n');
        }
    }

    out
}
