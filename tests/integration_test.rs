//! Integration tests for the full indexing and search flow.
//!
//! These tests run the pipeline drain loop deterministically against the
//! in-memory stores and the hashed embedder, so no external services are
//! required.

use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use pulse_search::config::Config;
use pulse_search::index::vector::VectorIndex;
use pulse_search::models::{
    ContentItem, ContentStatus, EngagementStats, SearchFilters, SearchQuery, Visibility,
};
use pulse_search::state::AppState;

async fn app() -> (TempDir, AppState) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_dir = tmp.path().to_path_buf();
    let state = AppState::new(config).unwrap();
    (tmp, state)
}

fn post(body: &str) -> ContentItem {
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

fn query(text: &str) -> SearchQuery {
    SearchQuery {
        query: text.to_string(),
        filters: SearchFilters::default(),
        semantic: true,
        cursor: None,
        page_size: 20,
    }
}

#[tokio::test]
async fn test_semantic_recall_and_lexical_precision() {
    let (_tmp, state) = app().await;

    let news = state
        .submit_content(post("breaking news about elections"))
        .await
        .unwrap();
    let pasta = state
        .submit_content(post("cooking pasta tonight"))
        .await
        .unwrap();
    state.pipeline.drain_once().await;

    // "election results" shares no indexed keyword with the news post, so
    // only the semantic leg can surface it. The pasta post clears neither
    // leg.
    let page = state.search.search(query("election results")).await.unwrap();
    assert!(page.semantic_applied);
    let ids: Vec<Uuid> = page.results.iter().map(|r| r.id).collect();
    assert!(ids.contains(&news.id));
    assert!(!ids.contains(&pasta.id));

    let hit = page.results.iter().find(|r| r.id == news.id).unwrap();
    assert!(hit.semantic_score > 0.0);
}

#[tokio::test]
async fn test_freshness_no_published_item_left_behind() {
    let (_tmp, state) = app().await;

    let mut items = Vec::new();
    for i in 0..10 {
        items.push(
            state
                .submit_content(post(&format!("election dispatch {i}")))
                .await
                .unwrap(),
        );
    }
    state.pipeline.drain_once().await;

    // Every published item ends up in the vector index at its current
    // version, and the pipeline queue is empty.
    assert_eq!(state.pipeline.pending_count(), 0);
    for item in &items {
        assert_eq!(state.vectors.source_version(item.id), Some(item.version));
    }
}

#[tokio::test]
async fn test_rapid_update_indexes_only_latest_version() {
    let (_tmp, state) = app().await;

    let v1 = state
        .submit_content(post("first draft of the announcement"))
        .await
        .unwrap();
    let mut edited = v1.clone();
    edited.body = "final version of the announcement".to_string();
    edited.hashtags.clear();
    edited.mentions.clear();
    let v2 = state.submit_content(edited).await.unwrap();
    assert_eq!(v2.version, v1.version + 1);

    // Both notifications coalesced into one queued job.
    assert_eq!(state.pipeline.pending_count(), 1);
    state.pipeline.drain_once().await;

    assert_eq!(state.vectors.source_version(v1.id), Some(v2.version));
}

#[tokio::test]
async fn test_vector_outage_retries_then_recovers() {
    let (_tmp, state) = app().await;

    let item = state
        .submit_content(post("resilient election coverage"))
        .await
        .unwrap();

    state.vectors.set_available(false);
    // First drain fails the upsert and schedules a retry; search degrades
    // to lexical-only in the meantime.
    state.pipeline.process_batch(state.pipeline.take_batch()).await;
    assert!(state.vectors.source_version(item.id).is_none());

    let page = state.search.search(query("election")).await.unwrap();
    assert!(!page.semantic_applied);
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].id, item.id);

    // Index comes back; reconciliation re-enqueues and the item converges.
    state.vectors.set_available(true);
    state.pipeline.reconcile(Utc::now() - Duration::hours(1));
    state.pipeline.drain_once().await;
    assert_eq!(state.vectors.source_version(item.id), Some(item.version));

    let page = state.search.search(query("election")).await.unwrap();
    assert!(page.semantic_applied);
}

#[tokio::test]
async fn test_pagination_no_duplicates_across_pages() {
    let (_tmp, state) = app().await;

    for i in 0..12u64 {
        let mut item = post(&format!("election briefing part {i}"));
        // Spread engagement so fused scores are well separated.
        state
            .engagement
            .set(item.id, EngagementStats { likes: i * 10, views: i * 100 });
        item.created_at = Utc::now() - Duration::minutes(i as i64);
        state.submit_content(item).await.unwrap();
    }
    state.pipeline.drain_once().await;

    let mut q = query("election briefing");
    q.page_size = 5;

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        q.cursor = cursor;
        let page = state.search.search(q.clone()).await.unwrap();
        for result in &page.results {
            assert!(!seen.contains(&result.id), "duplicate across pages");
            seen.push(result.id);
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen.len(), 12);
}

#[tokio::test]
async fn test_deleted_content_disappears_from_both_legs() {
    let (_tmp, state) = app().await;

    let item = state
        .submit_content(post("ephemeral election take"))
        .await
        .unwrap();
    state.pipeline.drain_once().await;

    state.remove_content(item.id).await.unwrap();
    state.pipeline.drain_once().await;

    let page = state.search.search(query("election")).await.unwrap();
    assert!(page.results.is_empty());
    assert!(state.vectors.source_version(item.id).is_none());
}

#[tokio::test]
async fn test_trending_and_suggest_after_batch_cycle() {
    let (_tmp, state) = app().await;

    for _ in 0..5 {
        state
            .submit_content(post("big night for #elections2026"))
            .await
            .unwrap();
    }
    state
        .submit_content(post("quiet day for #gardening"))
        .await
        .unwrap();

    assert!(state.trends.run_cycle(Utc::now()).await);

    let snapshot = state.trends.trending();
    let top = &snapshot.entries[0];
    assert_eq!(top.label, "elections2026");

    let suggestions = state.search.suggest("elect", 5);
    assert_eq!(suggestions[0], "elections2026");
}

#[tokio::test]
async fn test_author_and_time_filters() {
    let (_tmp, state) = app().await;

    let mine = state
        .submit_content(post("my election essay"))
        .await
        .unwrap();
    state
        .submit_content(post("someone else's election essay"))
        .await
        .unwrap();
    state.pipeline.drain_once().await;

    let mut q = query("election essay");
    q.filters.author_id = Some(mine.author_id);
    let page = state.search.search(q).await.unwrap();
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].id, mine.id);

    let mut q = query("election essay");
    q.filters.before = Some(Utc::now() - Duration::hours(1));
    let page = state.search.search(q).await.unwrap();
    assert!(page.results.is_empty());
}
