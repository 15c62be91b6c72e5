use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::{
    ChangeNotification, ChangeOp, ContentItem, ContentStatus, EngagementStats,
};

/// Read access to canonical content records. The store itself is an external
/// collaborator; the pipeline and engines only consume this contract.
pub trait ContentStore: Send + Sync {
    fn get(&self, id: Uuid) -> Option<ContentItem>;
    fn get_many(&self, ids: &[Uuid]) -> Vec<ContentItem>;
    /// Items created or updated strictly after `watermark`, ordered by
    /// `updated_at` ascending.
    fn changed_since(&self, watermark: DateTime<Utc>) -> Vec<ContentItem>;
}

/// Read-only per-content engagement counters, supplied by a collaborator.
pub trait EngagementProvider: Send + Sync {
    fn stats(&self, id: Uuid) -> EngagementStats;
}

/// In-memory content store for local runs and tests. Mutations bump the
/// per-item version and return the change notification the caller forwards
/// to the indexing pipeline.
#[derive(Default)]
pub struct InMemoryContentStore {
    items: RwLock<HashMap<Uuid, ContentItem>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an item. Missing hashtags/mentions are extracted from
    /// the body; `version` and `updated_at` are managed here.
    pub fn upsert(&self, mut item: ContentItem) -> ChangeNotification {
        if item.hashtags.is_empty() {
            item.hashtags = extract_hashtags(&item.body);
        }
        if item.mentions.is_empty() {
            item.mentions = extract_mentions(&item.body);
        }

        let mut items = self.items.write();
        let op = match items.get(&item.id) {
            Some(existing) => {
                item.version = existing.version + 1;
                item.created_at = existing.created_at;
                ChangeOp::Update
            }
            None => {
                item.version = 1;
                ChangeOp::Create
            }
        };
        item.updated_at = Utc::now();

        let notification = ChangeNotification {
            id: item.id,
            version: item.version,
            op,
        };
        items.insert(item.id, item);
        notification
    }

    /// Soft-delete an item. Returns `None` when the id is unknown.
    pub fn remove(&self, id: Uuid) -> Option<ChangeNotification> {
        let mut items = self.items.write();
        let item = items.get_mut(&id)?;
        item.status = ContentStatus::Deleted;
        item.version += 1;
        item.updated_at = Utc::now();
        Some(ChangeNotification {
            id,
            version: item.version,
            op: ChangeOp::Delete,
        })
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl ContentStore for InMemoryContentStore {
    fn get(&self, id: Uuid) -> Option<ContentItem> {
        self.items.read().get(&id).cloned()
    }

    fn get_many(&self, ids: &[Uuid]) -> Vec<ContentItem> {
        let items = self.items.read();
        ids.iter().filter_map(|id| items.get(id).cloned()).collect()
    }

    fn changed_since(&self, watermark: DateTime<Utc>) -> Vec<ContentItem> {
        let items = self.items.read();
        let mut changed: Vec<ContentItem> = items
            .values()
            .filter(|item| item.updated_at > watermark)
            .cloned()
            .collect();
        changed.sort_by_key(|item| item.updated_at);
        changed
    }
}

/// In-memory engagement counters, settable for tests and local runs.
#[derive(Default)]
pub struct InMemoryEngagement {
    stats: RwLock<HashMap<Uuid, EngagementStats>>,
}

impl InMemoryEngagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: Uuid, stats: EngagementStats) {
        self.stats.write().insert(id, stats);
    }

    pub fn record_view(&self, id: Uuid) {
        self.stats.write().entry(id).or_default().views += 1;
    }

    pub fn record_like(&self, id: Uuid) {
        self.stats.write().entry(id).or_default().likes += 1;
    }
}

impl EngagementProvider for InMemoryEngagement {
    fn stats(&self, id: Uuid) -> EngagementStats {
        self.stats.read().get(&id).copied().unwrap_or_default()
    }
}

/// Extract `#hashtag` tokens from body text, lowercased, without the marker.
pub fn extract_hashtags(text: &str) -> BTreeSet<String> {
    extract_marked(text, '#')
}

/// Extract `@mention` tokens from body text, lowercased, without the marker.
pub fn extract_mentions(text: &str) -> BTreeSet<String> {
    extract_marked(text, '@')
}

fn extract_marked(text: &str, marker: char) -> BTreeSet<String> {
    text.split_whitespace()
        .filter_map(|word| word.strip_prefix(marker))
        .map(|tag| {
            tag.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_lowercase()
        })
        .filter(|tag| !tag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Visibility;

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

    #[test]
    fn test_extract_hashtags() {
        let tags = extract_hashtags("big #News today, #Rust! and #rust again");
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["news".to_string(), "rust".to_string()]
        );
    }

    #[test]
    fn test_extract_mentions() {
        let mentions = extract_mentions("cc @alice and @Bob.");
        assert!(mentions.contains("alice"));
        assert!(mentions.contains("bob"));
    }

    #[test]
    fn test_upsert_bumps_version_and_reports_op() {
        let store = InMemoryContentStore::new();
        let first = item("hello #world");

        let created = store.upsert(first.clone());
        assert_eq!(created.op, ChangeOp::Create);
        assert_eq!(created.version, 1);

        let mut updated = store.get(first.id).unwrap();
        updated.body = "hello again".to_string();
        let change = store.upsert(updated);
        assert_eq!(change.op, ChangeOp::Update);
        assert_eq!(change.version, 2);
        assert_eq!(store.get(first.id).unwrap().version, 2);
    }

    #[test]
    fn test_remove_soft_deletes() {
        let store = InMemoryContentStore::new();
        let it = item("bye");
        store.upsert(it.clone());

        let change = store.remove(it.id).unwrap();
        assert_eq!(change.op, ChangeOp::Delete);
        assert_eq!(store.get(it.id).unwrap().status, ContentStatus::Deleted);
        assert!(store.remove(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_changed_since_filters_and_orders() {
        let store = InMemoryContentStore::new();
        let before = Utc::now();
        store.upsert(item("one"));
        store.upsert(item("two"));

        let changed = store.changed_since(before);
        assert_eq!(changed.len(), 2);
        assert!(changed[0].updated_at <= changed[1].updated_at);
        assert!(store.changed_since(Utc::now()).is_empty());
    }
}
