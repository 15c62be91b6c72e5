use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::lexical::{LexicalDoc, LexicalIndex, TantivyLexicalIndex};
use crate::index::vector::{InMemoryVectorIndex, VectorIndex};
use crate::models::{ChangeNotification, ContentItem};
use crate::pipeline::IndexingPipeline;
use crate::search::engine::HybridSearchEngine;
use crate::store::{ContentStore, EngagementProvider, InMemoryContentStore, InMemoryEngagement};
use crate::trends::TrendingEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<InMemoryContentStore>,
    pub engagement: Arc<InMemoryEngagement>,
    pub lexical: Arc<TantivyLexicalIndex>,
    pub vectors: Arc<InMemoryVectorIndex>,
    pub pipeline: Arc<IndexingPipeline>,
    pub trends: Arc<TrendingEngine>,
    pub search: Arc<HybridSearchEngine>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.lexical_dir())?;

        let store = Arc::new(InMemoryContentStore::new());
        let engagement = Arc::new(InMemoryEngagement::new());
        let embedder = Arc::new(Embedder::from_config(&config.embedding)?);
        let lexical = Arc::new(TantivyLexicalIndex::open_or_create(&config.lexical_dir())?);
        let vectors = Arc::new(InMemoryVectorIndex::new());

        let pipeline = Arc::new(IndexingPipeline::new(
            store.clone() as Arc<dyn ContentStore>,
            embedder.clone(),
            vectors.clone() as Arc<dyn VectorIndex>,
            lexical.clone() as Arc<dyn LexicalIndex>,
            config.pipeline.clone(),
        ));
        let trends = Arc::new(TrendingEngine::new(
            store.clone() as Arc<dyn ContentStore>,
            embedder.clone(),
            config.trends.clone(),
        ));
        let search = Arc::new(HybridSearchEngine::new(
            store.clone() as Arc<dyn ContentStore>,
            engagement.clone() as Arc<dyn EngagementProvider>,
            embedder,
            vectors.clone() as Arc<dyn VectorIndex>,
            lexical.clone() as Arc<dyn LexicalIndex>,
            trends.clone(),
            config.ranking.clone(),
        ));

        Ok(Self {
            config,
            store,
            engagement,
            lexical,
            vectors,
            pipeline,
            trends,
            search,
        })
    }

    /// Accept a create/update, index the lexical leg synchronously so the
    /// item is keyword-searchable on write acknowledgement, and hand the
    /// semantic leg to the pipeline.
    pub async fn submit_content(&self, item: ContentItem) -> anyhow::Result<ContentItem> {
        let notification = self.store.upsert(item);
        let stored = self
            .store
            .get(notification.id)
            .ok_or_else(|| anyhow::anyhow!("content vanished after upsert"))?;

        self.index_lexical(&stored).await?;
        self.trends.register_labels(&stored);
        self.pipeline.handle_change(&notification);
        Ok(stored)
    }

    /// Soft-delete. The lexical entry is removed synchronously; the vector
    /// entry goes through the pipeline as a tombstone.
    pub async fn remove_content(&self, id: Uuid) -> anyhow::Result<Option<ChangeNotification>> {
        let Some(notification) = self.store.remove(id) else {
            return Ok(None);
        };

        let lexical = self.lexical.clone();
        tokio::task::spawn_blocking(move || lexical.delete(id)).await??;
        self.pipeline.handle_change(&notification);
        Ok(Some(notification))
    }

    async fn index_lexical(&self, item: &ContentItem) -> anyhow::Result<()> {
        let lexical = self.lexical.clone();
        let doc = LexicalDoc {
            id: item.id,
            author_id: item.author_id,
            body: item.body.clone(),
            hashtags: item.hashtags.iter().cloned().collect(),
            visibility: item.visibility,
            created_at: item.created_at,
        };
        tokio::task::spawn_blocking(move || lexical.index_content(doc)).await??;
        Ok(())
    }

    /// Spawn the embedding worker, the reconciliation sweep, and the
    /// trending batch cycle.
    pub fn spawn_background(&self) {
        // take_batch hands out disjoint batches, so workers never collide on
        // the same job.
        for _ in 0..self.config.pipeline.workers {
            tokio::spawn(self.pipeline.clone().run());
        }
        tokio::spawn(Arc::clone(&self.trends).run());

        let pipeline = self.pipeline.clone();
        let interval_secs = self.config.pipeline.reconcile_interval_secs;
        tokio::spawn(async move {
            let mut last_sweep: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;
            let interval = std::time::Duration::from_secs(interval_secs);
            loop {
                tokio::time::sleep(interval).await;
                let sweep_started = Utc::now();
                let repaired = pipeline.reconcile(last_sweep);
                if repaired > 0 {
                    tracing::info!(repaired, "reconciliation re-enqueued drifted content");
                }
                last_sweep = sweep_started;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::models::{ContentStatus, SearchFilters, Visibility};

    use super::*;

    fn test_config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.data_dir = tmp.path().to_path_buf();
        config
    }

    fn draft(body: &str) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            body: body.to_string(),
            media: vec![],
            created_at: now,
            updated_at: now,
            version: 0,
            status: ContentStatus::Published,
            thread_id: None,
            thread_position: None,
            hashtags: Default::default(),
            mentions: Default::default(),
            visibility: Visibility::Public,
        }
    }

    #[tokio::test]
    async fn test_submit_is_lexically_searchable_before_pipeline_runs() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::new(test_config(&tmp)).unwrap();

        let stored = state
            .submit_content(draft("fresh election coverage"))
            .await
            .unwrap();

        // No pipeline drain has happened yet.
        assert_eq!(state.pipeline.pending_count(), 1);
        let hits = state
            .lexical
            .query("election", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, stored.id);
    }

    #[tokio::test]
    async fn test_remove_clears_lexical_and_enqueues_tombstone() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::new(test_config(&tmp)).unwrap();

        let stored = state.submit_content(draft("soon to be gone")).await.unwrap();
        state.pipeline.drain_once().await;

        let removed = state.remove_content(stored.id).await.unwrap();
        assert!(removed.is_some());
        assert!(state
            .lexical
            .query("gone", &SearchFilters::default(), 10)
            .unwrap()
            .is_empty());

        state.pipeline.drain_once().await;
        assert!(state.vectors.source_version(stored.id).is_none());

        // Unknown id is not an error.
        assert!(state.remove_content(Uuid::new_v4()).await.unwrap().is_none());
    }
}
