use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::CoreError;
use crate::models::{SearchFilters, Visibility};

/// Payload stored next to each vector for filtered retrieval.
#[derive(Debug, Clone)]
pub struct VectorPayload {
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub hashtags: BTreeSet<String>,
    pub visibility: Visibility,
}

/// One point written by the indexing pipeline. `source_version` is copied
/// from the content item at embedding time; a mismatch with the store's
/// current version means the entry is stale.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
    pub source_version: u64,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: Uuid,
    pub similarity: f32,
}

/// Nearest-neighbor lookup with filtered payload storage. Written only by
/// the indexing pipeline; query paths never mutate entries.
pub trait VectorIndex: Send + Sync {
    fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), CoreError>;
    fn delete(&self, id: Uuid) -> Result<(), CoreError>;
    fn query(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<VectorMatch>, CoreError>;
    /// Version stamped on the stored entry, if one exists.
    fn source_version(&self, id: Uuid) -> Option<u64>;
}

/// In-memory cosine-similarity index. The availability flag lets tests and
/// operators simulate an index outage; queries then fail transient and the
/// search engine degrades to lexical-only.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<Uuid, VectorPoint>>,
    unavailable: AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    fn check_available(&self) -> Result<(), CoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CoreError::TransientIndex(
                "vector index unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn matches_filters(payload: &VectorPayload, filters: &SearchFilters) -> bool {
    if let Some(author_id) = filters.author_id {
        if payload.author_id != author_id {
            return false;
        }
    }
    if let Some(after) = filters.after {
        if payload.created_at < after {
            return false;
        }
    }
    if let Some(before) = filters.before {
        if payload.created_at > before {
            return false;
        }
    }
    if let Some(hashtag) = &filters.hashtag {
        if !payload.hashtags.contains(hashtag) {
            return false;
        }
    }
    if let Some(visibility) = filters.visibility {
        if payload.visibility != visibility {
            return false;
        }
    }
    true
}

impl VectorIndex for InMemoryVectorIndex {
    fn upsert(&self, new_points: Vec<VectorPoint>) -> Result<(), CoreError> {
        self.check_available()?;
        let mut points = self.points.write();
        for point in new_points {
            points.insert(point.id, point);
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        self.check_available()?;
        self.points.write().remove(&id);
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<VectorMatch>, CoreError> {
        self.check_available()?;
        let points = self.points.read();

        let mut matches: Vec<VectorMatch> = points
            .values()
            .filter(|p| matches_filters(&p.payload, filters))
            .map(|p| VectorMatch {
                id: p.id,
                similarity: cosine_similarity(vector, &p.vector),
            })
            .filter(|m| m.similarity >= min_similarity)
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    fn source_version(&self, id: Uuid) -> Option<u64> {
        self.points.read().get(&id).map(|p| p.source_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: Uuid, vector: Vec<f32>, hashtags: &[&str], version: u64) -> VectorPoint {
        VectorPoint {
            id,
            vector,
            payload: VectorPayload {
                author_id: Uuid::new_v4(),
                created_at: Utc::now(),
                hashtags: hashtags.iter().map(|t| t.to_string()).collect(),
                visibility: Visibility::Public,
            },
            source_version: version,
        }
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let index = InMemoryVectorIndex::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index
            .upsert(vec![
                point(near, vec![0.9, 0.1, 0.0], &[], 1),
                point(far, vec![0.0, 0.1, 0.9], &[], 1),
            ])
            .unwrap();

        let matches = index
            .query(&[1.0, 0.0, 0.0], &SearchFilters::default(), 10, 0.0)
            .unwrap();
        assert_eq!(matches[0].id, near);
        assert!(matches[0].similarity > matches[1].similarity);
    }

    #[test]
    fn test_min_similarity_floor_excludes() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![point(Uuid::new_v4(), vec![0.0, 1.0], &[], 1)])
            .unwrap();

        let matches = index
            .query(&[1.0, 0.0], &SearchFilters::default(), 10, 0.5)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_hashtag_filter_applies() {
        let index = InMemoryVectorIndex::new();
        let tagged = Uuid::new_v4();
        index
            .upsert(vec![
                point(tagged, vec![1.0, 0.0], &["rust"], 1),
                point(Uuid::new_v4(), vec![1.0, 0.0], &["news"], 1),
            ])
            .unwrap();

        let filters = SearchFilters {
            hashtag: Some("rust".to_string()),
            ..Default::default()
        };
        let matches = index.query(&[1.0, 0.0], &filters, 10, 0.0).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, tagged);
    }

    #[test]
    fn test_upsert_overwrites_and_stamps_version() {
        let index = InMemoryVectorIndex::new();
        let id = Uuid::new_v4();
        index.upsert(vec![point(id, vec![1.0, 0.0], &[], 1)]).unwrap();
        index.upsert(vec![point(id, vec![0.0, 1.0], &[], 2)]).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.source_version(id), Some(2));
    }

    #[test]
    fn test_unavailable_index_fails_transient() {
        let index = InMemoryVectorIndex::new();
        index.set_available(false);
        let err = index
            .query(&[1.0], &SearchFilters::default(), 5, 0.0)
            .unwrap_err();
        assert!(matches!(err, CoreError::TransientIndex(_)));

        index.set_available(true);
        assert!(index.query(&[1.0], &SearchFilters::default(), 5, 0.0).is_ok());
    }
}
