use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DurationRound, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::RankingConfig;
use crate::embedding::Embedder;
use crate::index::lexical::{LexicalIndex, LexicalMatch};
use crate::index::vector::{VectorIndex, VectorMatch};
use crate::models::{Cursor, EngagementStats, SearchPage, SearchQuery};
use crate::search::fusion;
use crate::store::{ContentStore, EngagementProvider};
use crate::trends::TrendingEngine;

/// Hybrid search over the lexical and vector indexes.
///
/// Both legs run concurrently under a shared deadline. The lexical leg is
/// authoritative: if the semantic leg fails, times out, or is disabled, the
/// page is still served from lexical results alone with `semantic_applied`
/// set to false. Only a malformed cursor is a caller error.
pub struct HybridSearchEngine {
    store: Arc<dyn ContentStore>,
    engagement: Arc<dyn EngagementProvider>,
    embedder: Arc<Embedder>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    trends: Arc<TrendingEngine>,
    config: RankingConfig,
    /// Engagement counters frozen for one scoring window. Live counters move
    /// between the page fetches of a session, which would shift a fused
    /// score across the cursor boundary just like an unquantized clock.
    engagement_window: Mutex<EngagementWindow>,
}

#[derive(Default)]
struct EngagementWindow {
    window: i64,
    stats: HashMap<Uuid, EngagementStats>,
}

impl HybridSearchEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        engagement: Arc<dyn EngagementProvider>,
        embedder: Arc<Embedder>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        trends: Arc<TrendingEngine>,
        config: RankingConfig,
    ) -> Self {
        Self {
            store,
            engagement,
            embedder,
            vectors,
            lexical,
            trends,
            config,
            engagement_window: Mutex::new(EngagementWindow::default()),
        }
    }

    pub async fn search(&self, query: SearchQuery) -> anyhow::Result<SearchPage> {
        let cursor = match &query.cursor {
            Some(token) => Some(Cursor::decode(token).context("invalid cursor")?),
            None => None,
        };

        let deadline = Duration::from_millis(self.config.search_deadline_ms);
        let (lexical, (semantic, semantic_applied)) = tokio::join!(
            self.lexical_leg(&query, deadline),
            self.semantic_leg(&query, deadline),
        );

        let candidate_ids: Vec<Uuid> = lexical
            .iter()
            .map(|m| m.id)
            .chain(semantic.iter().map(|m| m.id))
            .collect();
        let items = self
            .store
            .get_many(&candidate_ids)
            .into_iter()
            .map(|item| (item.id, item))
            .collect::<HashMap<_, _>>();
        // Recency is computed against a quantized clock so a document's
        // fused score stays identical across the page fetches of one
        // session; otherwise the cursor boundary item would drift below its
        // own recorded score and be served twice.
        let now = Utc::now()
            .duration_trunc(chrono::Duration::minutes(5))
            .unwrap_or_else(|_| Utc::now());
        let engagement = self.snapshot_engagement(now.timestamp(), items.keys());

        let ranked = fusion::fuse(&lexical, &semantic, &items, &engagement, &self.config, now);
        let page_size = query.page_size.clamp(1, self.config.fetch_limit);
        let (results, next) = fusion::paginate(ranked, cursor, page_size);

        Ok(SearchPage {
            results,
            next_cursor: next.map(|c| c.encode()),
            semantic_applied,
        })
    }

    /// Read engagement through the per-window snapshot: the first score a
    /// document gets in a window is the score it keeps until the window
    /// rolls over.
    fn snapshot_engagement<'a>(
        &self,
        window: i64,
        ids: impl Iterator<Item = &'a Uuid>,
    ) -> HashMap<Uuid, EngagementStats> {
        let mut cache = self.engagement_window.lock();
        if cache.window != window {
            cache.window = window;
            cache.stats.clear();
        }
        ids.map(|id| {
            let stats = *cache
                .stats
                .entry(*id)
                .or_insert_with(|| self.engagement.stats(*id));
            (*id, stats)
        })
        .collect()
    }

    /// Label suggestions for a prefix, scored by the trending snapshot.
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.trends.suggest(prefix, limit)
    }

    /// BM25 leg on a blocking thread so tantivy's searcher never stalls the
    /// async runtime. Any failure degrades to an empty candidate list.
    async fn lexical_leg(&self, query: &SearchQuery, deadline: Duration) -> Vec<LexicalMatch> {
        let index = self.lexical.clone();
        let text = query.query.clone();
        let filters = query.filters.clone();
        let limit = self.config.fetch_limit;

        let task = tokio::task::spawn_blocking(move || index.query(&text, &filters, limit));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(matches))) => matches,
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "lexical query failed");
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "lexical query panicked");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(deadline_ms = deadline.as_millis() as u64, "lexical query timed out");
                Vec::new()
            }
        }
    }

    /// Embed the query text and probe the vector index. Returns the matches
    /// plus whether the leg actually contributed.
    async fn semantic_leg(
        &self,
        query: &SearchQuery,
        deadline: Duration,
    ) -> (Vec<VectorMatch>, bool) {
        if !query.semantic {
            return (Vec::new(), false);
        }

        let run = async {
            let vector = self.embedder.embed_single(&query.query).await?;
            self.vectors.query(
                &vector,
                &query.filters,
                self.config.fetch_limit,
                self.config.min_similarity,
            )
        };

        match tokio::time::timeout(deadline, run).await {
            Ok(Ok(matches)) => (matches, true),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "semantic leg unavailable, serving lexical-only");
                (Vec::new(), false)
            }
            Err(_) => {
                tracing::warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "semantic leg timed out, serving lexical-only"
                );
                (Vec::new(), false)
            }
        }
    }
}
