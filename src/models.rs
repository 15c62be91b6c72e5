use std::collections::BTreeSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A canonical content record. Owned by the content store; the pipeline and
/// search engine hold read-only projections of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic per-item version, bumped by the store on every mutation.
    pub version: u64,
    pub status: ContentStatus,
    pub thread_id: Option<Uuid>,
    pub thread_position: Option<u32>,
    #[serde(default)]
    pub hashtags: BTreeSet<String>,
    #[serde(default)]
    pub mentions: BTreeSet<String>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Published,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Followers,
    Private,
}

/// Change notification emitted by the content store and consumed by the
/// indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub id: Uuid,
    pub version: u64,
    pub op: ChangeOp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// Per-content engagement counters, supplied by a read-only collaborator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngagementStats {
    pub likes: u64,
    pub views: u64,
}

impl EngagementStats {
    pub fn total(&self) -> u64 {
        self.likes + self.views
    }
}

/// Structured filters shared by the lexical and semantic sub-queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub author_id: Option<Uuid>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub hashtag: Option<String>,
    pub visibility: Option<Visibility>,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_true")]
    pub semantic: bool,
    pub cursor: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// A fused search result with per-component scores kept for explainability.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub id: Uuid,
    pub fused_score: f32,
    pub lexical_score: f32,
    pub semantic_score: f32,
    pub recency_score: f32,
    pub engagement_score: f32,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub results: Vec<RankedResult>,
    /// Present when more results exist past this page.
    pub next_cursor: Option<String>,
    /// False when the semantic leg was disabled, timed out, or unavailable.
    pub semantic_applied: bool,
}

/// Pagination cursor encoding the last-seen `(fused_score, id)` pair. The
/// next page returns entries strictly after that pair in the
/// `(score desc, id asc)` total order, so pages stay stable under concurrent
/// inserts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub score: f32,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        // Serializing a two-field struct cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> anyhow::Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Operation carried by an embedding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOp {
    /// (Re-)embed the item's body and upsert the vector.
    Upsert,
    /// Remove the vector and lexical entries for a deleted item.
    Tombstone,
}

/// A unit of work for the indexing pipeline. At most one queued or in-flight
/// job exists per content id (lease by id).
#[derive(Debug, Clone)]
pub struct EmbeddingJob {
    pub content_id: Uuid,
    pub op: JobOp,
    /// Content version this job targets; advanced when a queued job coalesces
    /// with a newer update.
    pub version: u64,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    /// Earliest instant this job may run again after a retryable failure.
    pub not_before: Option<DateTime<Utc>>,
}

impl EmbeddingJob {
    pub fn new(content_id: Uuid, op: JobOp, version: u64) -> Self {
        Self {
            content_id,
            op,
            version,
            enqueued_at: Utc::now(),
            attempts: 0,
            not_before: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map(|t| t <= now).unwrap_or(true)
    }
}

/// Best-effort topic assignment for one content item. Absence is a valid
/// state and never blocks publication.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub content_id: Uuid,
    pub topic: String,
    pub confidence: f32,
    pub threshold: f32,
    pub classified_at: DateTime<Utc>,
}

/// One entry of the trending snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendingEntry {
    pub label: String,
    pub score: f64,
}
