use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::TrendsConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::CoreError;
use crate::models::{ClassificationResult, ContentItem, ContentStatus, TrendingEntry};
use crate::store::ContentStore;

/// Immutable trending snapshot, replaced wholesale each batch cycle so
/// readers never observe a partially rebuilt list.
#[derive(Debug, Default)]
pub struct TrendingSnapshot {
    pub entries: Vec<TrendingEntry>,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Embedded centroid for one topic label.
struct TopicCentroid {
    label: String,
    vector: Vec<f32>,
}

/// The label set and window one item currently contributes to the trending
/// buckets. Reprocessing an item replaces this contribution instead of
/// stacking a new one on top.
struct CountedItem {
    labels: BTreeSet<String>,
    window: i64,
}

/// Periodic batch engine for topic classification and trending scores.
///
/// Each cycle processes content changed since the last successful run
/// (watermark-based), classifies items against fixed topic centroids, folds
/// hashtag and topic occurrences into fixed-width time windows, and swaps in
/// a fresh top-K snapshot computed with exponential per-window decay. A cycle
/// already in progress suppresses a new one. Items whose classification hit
/// a retryable failure are revisited on the next cycle regardless of the
/// watermark.
pub struct TrendingEngine {
    store: Arc<dyn ContentStore>,
    embedder: Arc<Embedder>,
    config: TrendsConfig,
    /// Embedded lazily on first use, so an unreachable model delays
    /// classification instead of failing startup.
    centroids: RwLock<Vec<TopicCentroid>>,
    /// label -> window start (unix secs) -> occurrence count
    buckets: Mutex<HashMap<String, HashMap<i64, u64>>>,
    /// Current per-item contribution to `buckets`.
    counted: Mutex<HashMap<Uuid, CountedItem>>,
    /// Items whose last classification attempt failed retryably.
    retry: Mutex<HashSet<Uuid>>,
    snapshot: RwLock<Arc<TrendingSnapshot>>,
    classifications: RwLock<HashMap<Uuid, ClassificationResult>>,
    /// All labels ever seen, feeding prefix suggestions.
    labels: RwLock<HashMap<String, ()>>,
    watermark: Mutex<DateTime<Utc>>,
    /// Held for the duration of one cycle; try-locked so runs never overlap.
    run_guard: tokio::sync::Mutex<()>,
}

impl TrendingEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        embedder: Arc<Embedder>,
        config: TrendsConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            centroids: RwLock::new(Vec::new()),
            buckets: Mutex::new(HashMap::new()),
            counted: Mutex::new(HashMap::new()),
            retry: Mutex::new(HashSet::new()),
            snapshot: RwLock::new(Arc::new(TrendingSnapshot::default())),
            classifications: RwLock::new(HashMap::new()),
            labels: RwLock::new(HashMap::new()),
            watermark: Mutex::new(DateTime::<Utc>::MIN_UTC),
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Record an item's labels at submit time so suggestions can see them
    /// before the next batch cycle.
    pub fn register_labels(&self, item: &ContentItem) {
        let mut labels = self.labels.write();
        for tag in &item.hashtags {
            labels.insert(tag.clone(), ());
        }
        for mention in &item.mentions {
            labels.insert(mention.clone(), ());
        }
    }

    /// Current trending snapshot (atomic pointer read; never partial).
    pub fn trending(&self) -> Arc<TrendingSnapshot> {
        self.snapshot.read().clone()
    }

    /// Top labels starting with `prefix`, ordered by decayed trending score
    /// then alphabetically. No ranking fusion.
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Vec::new();
        }

        let snapshot = self.trending();
        let scores: HashMap<&str, f64> = snapshot
            .entries
            .iter()
            .map(|e| (e.label.as_str(), e.score))
            .collect();

        let labels = self.labels.read();
        let mut matches: Vec<(&String, f64)> = labels
            .keys()
            .filter(|label| label.starts_with(&prefix))
            .map(|label| (label, scores.get(label.as_str()).copied().unwrap_or(0.0)))
            .collect();

        matches.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        matches.truncate(limit);
        matches.into_iter().map(|(label, _)| label.clone()).collect()
    }

    pub fn classification(&self, id: Uuid) -> Option<ClassificationResult> {
        self.classifications.read().get(&id).cloned()
    }

    /// Items waiting for another classification attempt after a retryable
    /// failure.
    pub fn classification_backlog(&self) -> usize {
        self.retry.lock().len()
    }

    /// Run one batch cycle at `now`. Returns false when a cycle was already
    /// in progress and this window was skipped.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> bool {
        let Ok(_guard) = self.run_guard.try_lock() else {
            tracing::warn!("trending cycle already running, skipping this window");
            return false;
        };

        let since = *self.watermark.lock();
        let mut items = self.store.changed_since(since);
        // Re-fetch items parked for a classification retry; the watermark
        // has moved past them, so changed_since alone would never see them
        // again.
        let retry_ids: Vec<Uuid> = self.retry.lock().iter().copied().collect();
        if !retry_ids.is_empty() {
            let already: HashSet<Uuid> = items.iter().map(|i| i.id).collect();
            for item in self.store.get_many(&retry_ids) {
                if !already.contains(&item.id) {
                    items.push(item);
                }
            }
        }
        tracing::debug!(count = items.len(), since = %since, "trending cycle start");

        let mut max_seen = since;
        for item in &items {
            max_seen = max_seen.max(item.updated_at);
            if item.status != ContentStatus::Published {
                self.uncount(item.id);
                self.retry.lock().remove(&item.id);
                continue;
            }

            self.register_labels(item);

            let topic = match self.classify(item).await {
                Ok(topic) => {
                    self.retry.lock().remove(&item.id);
                    topic
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(content_id = %item.id, error = %e, "classification failed, will retry next cycle");
                    self.retry.lock().insert(item.id);
                    None
                }
                Err(e) => {
                    tracing::warn!(content_id = %item.id, error = %e, "content unclassifiable, leaving untagged");
                    self.retry.lock().remove(&item.id);
                    None
                }
            };

            let mut labels = item.hashtags.clone();
            if let Some(topic) = topic {
                labels.insert(topic);
            }
            self.recount(item.id, labels, self.window_start(item.created_at));
        }

        self.prune_windows(now);
        self.rebuild_snapshot(now);
        *self.watermark.lock() = max_seen;

        tracing::info!(processed = items.len(), "trending cycle complete");
        true
    }

    /// Periodic driver around [`run_cycle`](Self::run_cycle).
    pub async fn run(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.config.batch_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            self.run_cycle(Utc::now()).await;
        }
    }

    /// Assign the best topic iff its centroid similarity clears the
    /// configured threshold (boundary inclusive).
    async fn classify(&self, item: &ContentItem) -> Result<Option<String>, CoreError> {
        self.ensure_centroids().await?;
        let vector = self.embedder.embed_single(&item.body).await?;

        let centroids = self.centroids.read();
        let mut best: Option<(&str, f32)> = None;
        for centroid in centroids.iter() {
            let similarity = cosine_similarity(&vector, &centroid.vector);
            if best.map(|(_, s)| similarity > s).unwrap_or(true) {
                best = Some((&centroid.label, similarity));
            }
        }

        let Some((label, confidence)) = best else {
            return Ok(None);
        };
        if confidence < self.config.classification_threshold {
            return Ok(None);
        }
        let label = label.to_string();
        drop(centroids);

        self.classifications.write().insert(
            item.id,
            ClassificationResult {
                content_id: item.id,
                topic: label.clone(),
                confidence,
                threshold: self.config.classification_threshold,
                classified_at: Utc::now(),
            },
        );
        Ok(Some(label))
    }

    async fn ensure_centroids(&self) -> Result<(), CoreError> {
        if !self.centroids.read().is_empty() {
            return Ok(());
        }
        let mut embedded = Vec::with_capacity(self.config.topics.len());
        for label in &self.config.topics {
            let vector = self.embedder.embed_single(label).await?;
            embedded.push(TopicCentroid {
                label: label.clone(),
                vector,
            });
        }
        *self.centroids.write() = embedded;
        Ok(())
    }

    /// Replace `id`'s bucket contribution with `labels` at `window`. An
    /// unchanged edit nets to zero; a removed hashtag loses its count.
    fn recount(&self, id: Uuid, labels: BTreeSet<String>, window: i64) {
        let prev = self.counted.lock().insert(
            id,
            CountedItem {
                labels: labels.clone(),
                window,
            },
        );
        if let Some(prev) = prev {
            self.decrement(&prev);
        }

        let mut buckets = self.buckets.lock();
        for label in labels {
            *buckets.entry(label).or_default().entry(window).or_insert(0) += 1;
        }
    }

    /// Drop `id`'s bucket contribution and classification entirely.
    fn uncount(&self, id: Uuid) {
        if let Some(prev) = self.counted.lock().remove(&id) {
            self.decrement(&prev);
        }
        self.classifications.write().remove(&id);
    }

    fn decrement(&self, prev: &CountedItem) {
        let mut buckets = self.buckets.lock();
        for label in &prev.labels {
            if let Some(windows) = buckets.get_mut(label) {
                if let Some(count) = windows.get_mut(&prev.window) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        windows.remove(&prev.window);
                    }
                }
                if windows.is_empty() {
                    buckets.remove(label);
                }
            }
        }
    }

    fn window_start(&self, at: DateTime<Utc>) -> i64 {
        let secs = at.timestamp();
        secs - secs.rem_euclid(self.config.window_secs)
    }

    fn prune_windows(&self, now: DateTime<Utc>) {
        let horizon = self.window_start(now)
            - self.config.window_secs * self.config.window_count as i64;
        let mut buckets = self.buckets.lock();
        for windows in buckets.values_mut() {
            windows.retain(|start, _| *start > horizon);
        }
        buckets.retain(|_, windows| !windows.is_empty());
        drop(buckets);
        self.counted.lock().retain(|_, c| c.window > horizon);
    }

    /// Decayed score per label: each window's count weighted by
    /// `decay^age_in_windows`, so recent activity dominates while history
    /// fades gradually.
    fn rebuild_snapshot(&self, now: DateTime<Utc>) {
        let current_window = self.window_start(now);
        let buckets = self.buckets.lock();

        let mut entries: Vec<TrendingEntry> = buckets
            .iter()
            .map(|(label, windows)| {
                let score = windows
                    .iter()
                    .map(|(start, count)| {
                        let age = ((current_window - start) / self.config.window_secs).max(0);
                        *count as f64 * self.config.decay.powi(age as i32)
                    })
                    .sum();
                TrendingEntry {
                    label: label.clone(),
                    score,
                }
            })
            .collect();
        drop(buckets);

        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });
        entries.truncate(self.config.top_k);

        *self.snapshot.write() = Arc::new(TrendingSnapshot {
            entries,
            computed_at: Some(now),
        });
    }
}
