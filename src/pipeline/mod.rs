pub mod reconcile;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::embedding::Embedder;
use crate::error::CoreError;
use crate::index::lexical::LexicalIndex;
use crate::index::vector::{VectorIndex, VectorPayload, VectorPoint};
use crate::models::{ChangeNotification, ChangeOp, ContentItem, ContentStatus, EmbeddingJob, JobOp};
use crate::store::ContentStore;

/// A job removed from active retry after exhausting its attempts or being
/// rejected as unembeddable. Recovered only by reconciliation.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub content_id: Uuid,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Exclusive processing claim on one content id. At most one job per id is
/// queued or in flight; a concurrent update lands in `superseded` instead.
#[derive(Default)]
struct Lease {
    queued: bool,
    in_flight: bool,
    superseded: Option<EmbeddingJob>,
}

/// Keeps the vector index eventually consistent with the content store.
///
/// Jobs are micro-batched (up to `batch_size`, waiting at most
/// `batch_max_wait_ms` for a partial batch to fill), deduplicated by text,
/// embedded in one call, and upserted in one call. Retryable failures back
/// off exponentially with jitter; exhausted jobs dead-letter and mark the
/// item degraded (lexical-only) until reconciliation re-enqueues it.
pub struct IndexingPipeline {
    store: Arc<dyn ContentStore>,
    embedder: Arc<Embedder>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    config: PipelineConfig,
    // Lock order: `leases` before `queue`, everywhere both are held.
    queue: Mutex<VecDeque<EmbeddingJob>>,
    leases: Mutex<HashMap<Uuid, Lease>>,
    degraded: RwLock<HashSet<Uuid>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    wakeup: Notify,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        embedder: Arc<Embedder>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            vectors,
            lexical,
            config,
            queue: Mutex::new(VecDeque::new()),
            leases: Mutex::new(HashMap::new()),
            degraded: RwLock::new(HashSet::new()),
            dead_letters: RwLock::new(Vec::new()),
            wakeup: Notify::new(),
        }
    }

    /// Consume a change notification from the content store.
    pub fn handle_change(&self, change: &ChangeNotification) {
        let op = match change.op {
            ChangeOp::Create | ChangeOp::Update => JobOp::Upsert,
            ChangeOp::Delete => JobOp::Tombstone,
        };
        self.enqueue(EmbeddingJob::new(change.id, op, change.version));
    }

    /// Enqueue under the lease discipline: a queued job coalesces to the
    /// newest version, an in-flight job records the update as superseding.
    pub fn enqueue(&self, job: EmbeddingJob) {
        let mut leases = self.leases.lock();
        let lease = leases.entry(job.content_id).or_default();

        if lease.in_flight {
            tracing::debug!(
                content_id = %job.content_id,
                version = job.version,
                "update arrived mid-flight, scheduling follow-up"
            );
            lease.superseded = Some(job);
            return;
        }

        let mut queue = self.queue.lock();
        if lease.queued {
            if let Some(existing) = queue.iter_mut().find(|j| j.content_id == job.content_id) {
                // Coalesce: advance the queued job to the latest version. A
                // fresh enqueue also overrides any retry backoff still
                // pending on the queued job, making it due now.
                existing.version = existing.version.max(job.version);
                existing.op = job.op;
                existing.not_before = existing.not_before.min(job.not_before);
            }
        } else {
            lease.queued = true;
            queue.push_back(job);
        }
        drop(queue);
        drop(leases);
        self.wakeup.notify_one();
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_degraded(&self, id: Uuid) -> bool {
        self.degraded.read().contains(&id)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().clone()
    }

    /// Take up to one batch of due jobs and mark their leases in-flight.
    /// Split from [`process_batch`](Self::process_batch) so tests can drive
    /// the pipeline deterministically.
    pub fn take_batch(&self) -> Vec<EmbeddingJob> {
        let now = Utc::now();
        let mut leases = self.leases.lock();
        let mut queue = self.queue.lock();

        let mut batch = Vec::new();
        let mut rest = VecDeque::new();
        while let Some(job) = queue.pop_front() {
            if batch.len() < self.config.batch_size && job.is_due(now) {
                if let Some(lease) = leases.get_mut(&job.content_id) {
                    lease.queued = false;
                    lease.in_flight = true;
                }
                batch.push(job);
            } else {
                rest.push_back(job);
            }
        }
        *queue = rest;
        batch
    }

    /// Run enqueued work until the queue is drained. Returns the number of
    /// jobs taken. Used by tests and the reconciliation loop.
    pub async fn drain_once(&self) -> usize {
        let mut processed = 0;
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                return processed;
            }
            processed += batch.len();
            self.process_batch(batch).await;
        }
    }

    /// Worker loop: micro-batch formation then processing, forever.
    pub async fn run(self: Arc<Self>) {
        let max_wait = std::time::Duration::from_millis(self.config.batch_max_wait_ms);
        loop {
            let due = {
                let now = Utc::now();
                self.queue.lock().iter().filter(|j| j.is_due(now)).count()
            };

            if due >= self.config.batch_size {
                let batch = self.take_batch();
                self.process_batch(batch).await;
            } else if due > 0 {
                // Partial batch: wait for it to fill, then take what's there.
                tokio::time::sleep(max_wait).await;
                let batch = self.take_batch();
                if !batch.is_empty() {
                    self.process_batch(batch).await;
                }
            } else {
                // Idle; the timeout re-checks jobs parked behind a backoff.
                let _ = tokio::time::timeout(
                    std::time::Duration::from_millis(200),
                    self.wakeup.notified(),
                )
                .await;
            }
        }
    }

    /// Process one batch: tombstones first, then a deduplicated embed call
    /// and a single bulk vector upsert.
    pub async fn process_batch(&self, jobs: Vec<EmbeddingJob>) {
        let (tombstones, upserts): (Vec<_>, Vec<_>) =
            jobs.into_iter().partition(|j| j.op == JobOp::Tombstone);

        for job in tombstones {
            self.process_tombstone(job).await;
        }
        if !upserts.is_empty() {
            self.process_upserts(upserts).await;
        }
    }

    async fn process_tombstone(&self, job: EmbeddingJob) {
        let id = job.content_id;
        if let Err(e) = self.vectors.delete(id) {
            tracing::warn!(content_id = %id, error = %e, "vector delete failed, retrying");
            self.retry_or_dead_letter(job, &e);
            return;
        }

        let lexical = self.lexical.clone();
        let lexical_result =
            tokio::task::spawn_blocking(move || lexical.delete(id)).await;
        match lexical_result {
            Ok(Ok(())) => {
                self.degraded.write().remove(&id);
                self.complete_lease(id);
            }
            Ok(Err(e)) => {
                tracing::warn!(content_id = %id, error = %e, "lexical delete failed, retrying");
                self.retry_or_dead_letter(job, &e);
            }
            Err(e) => {
                tracing::warn!(content_id = %id, error = %e, "lexical delete task failed");
                self.retry_or_dead_letter(job, &CoreError::TransientIndex(e.to_string()));
            }
        }
    }

    async fn process_upserts(&self, jobs: Vec<EmbeddingJob>) {
        let ids: Vec<Uuid> = jobs.iter().map(|j| j.content_id).collect();
        let items: HashMap<Uuid, ContentItem> = self
            .store
            .get_many(&ids)
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        // Sort jobs into embeddable work and housekeeping.
        let mut workable: Vec<(EmbeddingJob, ContentItem)> = Vec::new();
        for job in jobs {
            match items.get(&job.content_id) {
                Some(item) if item.status == ContentStatus::Published => {
                    workable.push((job, item.clone()));
                }
                Some(item) => {
                    // Draft or deleted: nothing to embed; drop any stale vector.
                    tracing::debug!(content_id = %item.id, status = ?item.status, "skipping unpublished item");
                    let _ = self.vectors.delete(item.id);
                    self.complete_lease(job.content_id);
                }
                None => {
                    tracing::warn!(content_id = %job.content_id, "job for unknown content, dropping");
                    self.complete_lease(job.content_id);
                }
            }
        }
        if workable.is_empty() {
            return;
        }

        // Dedup identical texts within the batch: one embed per distinct text.
        let mut distinct: Vec<String> = Vec::new();
        let mut text_slot: HashMap<&str, usize> = HashMap::new();
        let mut slots: Vec<usize> = Vec::with_capacity(workable.len());
        for (_, item) in &workable {
            let slot = *text_slot.entry(item.body.as_str()).or_insert_with(|| {
                distinct.push(item.body.clone());
                distinct.len() - 1
            });
            slots.push(slot);
        }

        let vectors = match self.embedder.embed_batch(&distinct).await {
            Ok(vectors) => vectors,
            Err(e @ CoreError::InputTooLarge { .. }) => {
                // Isolate the oversized texts and re-run the rest one by one;
                // an entire batch must not fail for one pathological body.
                tracing::warn!(error = %e, "batch contained oversized input, splitting");
                self.process_individually(workable).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, count = workable.len(), "batch embedding failed");
                for (job, _) in workable {
                    self.retry_or_dead_letter(job, &e);
                }
                return;
            }
        };

        let mut points = Vec::with_capacity(workable.len());
        let mut completed = Vec::with_capacity(workable.len());
        for ((job, item), slot) in workable.into_iter().zip(slots) {
            if self.was_superseded(job.content_id) {
                // Expected concurrency outcome: discard the stale result; the
                // follow-up job re-embeds the newest version.
                tracing::debug!(content_id = %job.content_id, "stale write discarded");
                self.complete_lease(job.content_id);
                continue;
            }
            let Some(vector) = vectors.get(slot) else {
                self.retry_or_dead_letter(
                    job,
                    &CoreError::ModelUnavailable("embedding missing from batch".to_string()),
                );
                continue;
            };
            points.push(VectorPoint {
                id: item.id,
                vector: vector.clone(),
                payload: VectorPayload {
                    author_id: item.author_id,
                    created_at: item.created_at,
                    hashtags: item.hashtags.clone(),
                    visibility: item.visibility,
                },
                source_version: item.version,
            });
            completed.push(job);
        }

        if points.is_empty() {
            return;
        }

        let count = points.len();
        match self.vectors.upsert(points) {
            Ok(()) => {
                tracing::info!(count, "indexed embedding batch");
                let mut degraded = self.degraded.write();
                for job in &completed {
                    degraded.remove(&job.content_id);
                }
                drop(degraded);
                for job in completed {
                    self.complete_lease(job.content_id);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, count, "vector upsert failed");
                for job in completed {
                    self.retry_or_dead_letter(job, &e);
                }
            }
        }
    }

    /// Fallback path when a batch mixes embeddable and oversized texts:
    /// embed one at a time so only the oversized jobs are dropped.
    async fn process_individually(&self, workable: Vec<(EmbeddingJob, ContentItem)>) {
        for (job, item) in workable {
            match self.embedder.embed_single(&item.body).await {
                Ok(vector) => {
                    if self.was_superseded(job.content_id) {
                        self.complete_lease(job.content_id);
                        continue;
                    }
                    let point = VectorPoint {
                        id: item.id,
                        vector,
                        payload: VectorPayload {
                            author_id: item.author_id,
                            created_at: item.created_at,
                            hashtags: item.hashtags.clone(),
                            visibility: item.visibility,
                        },
                        source_version: item.version,
                    };
                    match self.vectors.upsert(vec![point]) {
                        Ok(()) => {
                            self.degraded.write().remove(&job.content_id);
                            self.complete_lease(job.content_id);
                        }
                        Err(e) => self.retry_or_dead_letter(job, &e),
                    }
                }
                Err(e @ CoreError::InputTooLarge { .. }) => {
                    tracing::warn!(content_id = %job.content_id, error = %e, "content skipped as unembeddable");
                    self.dead_letter(job.content_id, e.to_string());
                }
                Err(e) => self.retry_or_dead_letter(job, &e),
            }
        }
    }

    fn was_superseded(&self, id: Uuid) -> bool {
        self.leases
            .lock()
            .get(&id)
            .map(|l| l.superseded.is_some())
            .unwrap_or(false)
    }

    /// Release the lease; a superseding update becomes the follow-up job.
    fn complete_lease(&self, id: Uuid) {
        let follow_up = {
            let mut leases = self.leases.lock();
            match leases.get_mut(&id) {
                Some(lease) => {
                    lease.in_flight = false;
                    let follow_up = lease.superseded.take();
                    if follow_up.is_none() && !lease.queued {
                        leases.remove(&id);
                    }
                    follow_up
                }
                None => None,
            }
        };
        if let Some(job) = follow_up {
            self.enqueue(job);
        }
    }

    fn retry_or_dead_letter(&self, mut job: EmbeddingJob, error: &CoreError) {
        if !error.is_retryable() || job.attempts + 1 >= self.config.max_attempts {
            self.dead_letter(job.content_id, error.to_string());
            return;
        }
        job.attempts += 1;
        let delay = self.backoff_delay(job.attempts);
        job.not_before = Some(Utc::now() + delay);
        tracing::info!(
            content_id = %job.content_id,
            attempt = job.attempts,
            delay_ms = delay.num_milliseconds(),
            "retrying embedding job"
        );
        self.requeue(job);
    }

    fn requeue(&self, job: EmbeddingJob) {
        let mut leases = self.leases.lock();
        let lease = leases.entry(job.content_id).or_default();
        lease.in_flight = false;
        // A superseding update wins over the retry of an older version.
        let job = lease.superseded.take().unwrap_or(job);
        lease.queued = true;
        self.queue.lock().push_back(job);
        drop(leases);
        self.wakeup.notify_one();
    }

    /// Exponential backoff with a cap and up to 50% random jitter.
    fn backoff_delay(&self, attempts: u32) -> ChronoDuration {
        let base = self.config.backoff_base_ms;
        let exp = base.saturating_mul(1u64 << (attempts.saturating_sub(1)).min(16));
        let capped = exp.min(self.config.backoff_cap_ms);
        let jitter = rand::rng().random_range(0..=capped / 2);
        ChronoDuration::milliseconds((capped + jitter) as i64)
    }

    fn dead_letter(&self, id: Uuid, reason: String) {
        tracing::warn!(content_id = %id, reason = %reason, "dead-lettering embedding job, item stays lexical-only");
        self.degraded.write().insert(id);
        self.dead_letters.write().push(DeadLetter {
            content_id: id,
            reason,
            at: Utc::now(),
        });
        self.complete_lease(id);
    }

    /// Clear degraded/dead-letter bookkeeping for an id that reconciliation
    /// is about to re-enqueue with fresh attempts.
    pub(crate) fn reset_for_reconcile(&self, id: Uuid) {
        self.degraded.write().remove(&id);
        self.dead_letters.write().retain(|d| d.content_id != id);
    }
}
