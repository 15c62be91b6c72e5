use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::models::{SearchPage, SearchQuery, TrendingEntry};
use crate::state::AppState;

/// POST /api/search - Hybrid lexical + semantic search with cursor
/// pagination. A failing semantic leg degrades to lexical-only rather than
/// erroring; only an empty query or a malformed cursor is rejected.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchQuery>,
) -> Result<Json<SearchPage>, (StatusCode, String)> {
    if req.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let page = state
        .search
        .search(req)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    pub prefix: String,
    #[serde(default = "default_suggest_limit")]
    pub limit: usize,
}

fn default_suggest_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<String>,
}

/// GET /api/suggest?prefix= - Prefix completions over known labels, ordered
/// by trending score.
pub async fn suggest(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Json<SuggestResponse> {
    let suggestions = state.search.suggest(&params.prefix, params.limit.min(50));
    Json(SuggestResponse { suggestions })
}

#[derive(Debug, Serialize)]
pub struct TrendingResponse {
    pub entries: Vec<TrendingEntry>,
    pub computed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// GET /api/trending - Current trending snapshot.
pub async fn trending(State(state): State<AppState>) -> Json<TrendingResponse> {
    let snapshot = state.trends.trending();
    Json(TrendingResponse {
        entries: snapshot.entries.clone(),
        computed_at: snapshot.computed_at,
    })
}
