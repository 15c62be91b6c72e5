use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RankingConfig;
use crate::index::lexical::LexicalMatch;
use crate::index::vector::VectorMatch;
use crate::models::{ContentItem, ContentStatus, Cursor, EngagementStats, RankedResult};

/// Monotonically decreasing recency signal: halves every `half_life_hours`.
pub fn recency_score(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f32) -> f32 {
    let age_hours = (now - created_at).num_seconds().max(0) as f32 / 3600.0;
    0.5f32.powf(age_hours / half_life_hours)
}

/// Monotonically increasing, saturating engagement signal: reaches 0.5 at
/// `midpoint` interactions and approaches 1.0 asymptotically.
pub fn engagement_score(stats: EngagementStats, midpoint: f32) -> f32 {
    let total = stats.total() as f32;
    total / (total + midpoint)
}

/// Fuse lexical and semantic candidate lists into one ranking.
///
/// Each candidate's fused score is the weighted sum of the normalized
/// lexical score, the semantic similarity, a recency signal, and a
/// saturating engagement signal. A candidate present in only one sub-search
/// scores zero for the missing component rather than being excluded, so a
/// document can rank purely lexically or purely semantically. Equal fused
/// scores order by id ascending for deterministic pagination.
pub fn fuse(
    lexical: &[LexicalMatch],
    semantic: &[VectorMatch],
    items: &HashMap<Uuid, ContentItem>,
    engagement: &HashMap<Uuid, EngagementStats>,
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> Vec<RankedResult> {
    // BM25 scores are unbounded; normalize each per-document with a
    // saturating transform rather than by the batch maximum, so a document's
    // fused score does not shift when other candidates enter the set (cursor
    // stability depends on this).
    let mut lexical_by_id: HashMap<Uuid, f32> = HashMap::new();
    for m in lexical {
        let normalized = m.score.max(0.0) / (m.score.max(0.0) + 1.0);
        let entry = lexical_by_id.entry(m.id).or_insert(0.0);
        *entry = entry.max(normalized);
    }

    let mut semantic_by_id: HashMap<Uuid, f32> = HashMap::new();
    for m in semantic {
        let entry = semantic_by_id.entry(m.id).or_insert(0.0);
        *entry = entry.max(m.similarity.clamp(0.0, 1.0));
    }

    let mut candidates: Vec<Uuid> = lexical_by_id.keys().copied().collect();
    for id in semantic_by_id.keys() {
        if !lexical_by_id.contains_key(id) {
            candidates.push(*id);
        }
    }

    let mut results: Vec<RankedResult> = candidates
        .into_iter()
        .filter_map(|id| {
            // Candidates without a live published item are dropped: the
            // indexes may briefly trail the store.
            let item = items.get(&id)?;
            if item.status != ContentStatus::Published {
                return None;
            }

            let lexical_score = lexical_by_id.get(&id).copied().unwrap_or(0.0);
            let semantic_score = semantic_by_id.get(&id).copied().unwrap_or(0.0);
            let recency = recency_score(item.created_at, now, config.recency_half_life_hours);
            let engagement = engagement_score(
                engagement.get(&id).copied().unwrap_or_default(),
                config.engagement_midpoint,
            );

            let fused = config.lexical_weight * lexical_score
                + config.semantic_weight * semantic_score
                + config.recency_weight * recency
                + config.engagement_weight * engagement;

            Some(RankedResult {
                id,
                fused_score: fused,
                lexical_score,
                semantic_score,
                recency_score: recency,
                engagement_score: engagement,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results
}

/// True when `result` comes strictly after `cursor` in the
/// `(score desc, id asc)` total order.
fn after_cursor(result: &RankedResult, cursor: &Cursor) -> bool {
    result.fused_score < cursor.score
        || (result.fused_score == cursor.score && result.id > cursor.id)
}

/// Cut one page out of a fused ranking. Entries at or before the cursor are
/// skipped, so already-delivered results are neither duplicated nor skipped
/// even when new items appear between page requests.
pub fn paginate(
    results: Vec<RankedResult>,
    cursor: Option<Cursor>,
    page_size: usize,
) -> (Vec<RankedResult>, Option<Cursor>) {
    let mut remaining: Vec<RankedResult> = match cursor {
        Some(c) => results.into_iter().filter(|r| after_cursor(r, &c)).collect(),
        None => results,
    };

    let has_more = remaining.len() > page_size;
    remaining.truncate(page_size);

    let next_cursor = if has_more {
        remaining.last().map(|last| Cursor {
            score: last.fused_score,
            id: last.id,
        })
    } else {
        None
    };
    (remaining, next_cursor)
}
