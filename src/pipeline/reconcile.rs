use chrono::{DateTime, Utc};

use crate::models::{ContentStatus, EmbeddingJob, JobOp};

use super::IndexingPipeline;

/// Staleness reconciliation: compare the content store's current versions
/// against the vector index's stamped `source_version`s and re-enqueue every
/// mismatch. Recovers from lost or duplicate queue deliveries and from
/// dead-lettered jobs, which get a fresh attempt budget here.
impl IndexingPipeline {
    /// Run one reconciliation pass over items changed since `since`.
    /// Returns the number of jobs re-enqueued.
    pub fn reconcile(&self, since: DateTime<Utc>) -> usize {
        let mut re_enqueued = 0;

        for item in self.store.changed_since(since) {
            match item.status {
                ContentStatus::Published => {
                    let indexed = self.vectors.source_version(item.id);
                    if indexed == Some(item.version) {
                        continue;
                    }
                    tracing::info!(
                        content_id = %item.id,
                        current = item.version,
                        indexed = ?indexed,
                        "stale vector entry, re-enqueueing"
                    );
                    self.reset_for_reconcile(item.id);
                    self.enqueue(EmbeddingJob::new(item.id, JobOp::Upsert, item.version));
                    re_enqueued += 1;
                }
                ContentStatus::Deleted => {
                    if self.vectors.source_version(item.id).is_some() {
                        self.enqueue(EmbeddingJob::new(item.id, JobOp::Tombstone, item.version));
                        re_enqueued += 1;
                    }
                }
                ContentStatus::Draft => {}
            }
        }

        if re_enqueued > 0 {
            tracing::info!(re_enqueued, "reconciliation pass enqueued stale items");
        }
        re_enqueued
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::config::{EmbeddingConfig, PipelineConfig};
    use crate::embedding::Embedder;
    use crate::index::lexical::TantivyLexicalIndex;
    use crate::index::vector::{InMemoryVectorIndex, VectorIndex};
    use crate::models::{ContentItem, Visibility};
    use crate::store::{ContentStore, InMemoryContentStore};

    use super::*;

    fn pipeline() -> (
        Arc<InMemoryContentStore>,
        Arc<InMemoryVectorIndex>,
        Arc<IndexingPipeline>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryContentStore::new());
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let lexical = Arc::new(TantivyLexicalIndex::open_or_create(dir.path()).unwrap());
        let embedder = Arc::new(Embedder::from_config(&EmbeddingConfig::default()).unwrap());
        let pipeline = Arc::new(IndexingPipeline::new(
            store.clone(),
            embedder,
            vectors.clone(),
            lexical,
            PipelineConfig::default(),
        ));
        (store, vectors, pipeline, dir)
    }

    fn item(body: &str) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            body: body.to_string(),
            media: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 0,
            status: ContentStatus::Published,
            thread_id: None,
            thread_position: None,
            hashtags: BTreeSet::new(),
            mentions: BTreeSet::new(),
            visibility: Visibility::Public,
        }
    }

    #[tokio::test]
    async fn test_reconcile_recovers_missing_vector() {
        let (store, vectors, pipeline, _dir) = pipeline();
        let epoch = DateTime::<Utc>::MIN_UTC;

        // Simulate a lost queue delivery: content exists, vector does not.
        let content = item("never made it to the index");
        store.upsert(content.clone());
        assert_eq!(pipeline.reconcile(epoch), 1);

        pipeline.drain_once().await;
        assert_eq!(vectors.source_version(content.id), Some(1));

        // A second pass finds the index fresh and enqueues nothing.
        assert_eq!(pipeline.reconcile(epoch), 0);
    }

    #[tokio::test]
    async fn test_reconcile_recovers_stale_version() {
        let (store, vectors, pipeline, _dir) = pipeline();
        let epoch = DateTime::<Utc>::MIN_UTC;

        let content = item("original");
        let change = store.upsert(content.clone());
        pipeline.handle_change(&change);
        pipeline.drain_once().await;

        // Update the store behind the pipeline's back.
        let mut updated = store.get(content.id).unwrap();
        updated.body = "edited".to_string();
        store.upsert(updated);
        assert_eq!(vectors.source_version(content.id), Some(1));

        assert_eq!(pipeline.reconcile(epoch), 1);
        pipeline.drain_once().await;
        assert_eq!(vectors.source_version(content.id), Some(2));
    }

    #[tokio::test]
    async fn test_reconcile_purges_deleted_leftovers() {
        let (store, vectors, pipeline, _dir) = pipeline();
        let epoch = DateTime::<Utc>::MIN_UTC;

        let content = item("to be deleted");
        let change = store.upsert(content.clone());
        pipeline.handle_change(&change);
        pipeline.drain_once().await;
        assert_eq!(vectors.len(), 1);

        // Delete in the store without notifying the pipeline.
        store.remove(content.id).unwrap();
        assert_eq!(pipeline.reconcile(epoch), 1);
        pipeline.drain_once().await;
        assert_eq!(vectors.len(), 0);
    }
}
