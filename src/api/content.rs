use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{ContentItem, ContentStatus, Visibility};
use crate::state::AppState;
use crate::store::ContentStore;

#[derive(Debug, Deserialize)]
pub struct SubmitContentRequest {
    pub author_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub thread_id: Option<Uuid>,
    pub thread_position: Option<u32>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default = "default_status")]
    pub status: ContentStatus,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

fn default_status() -> ContentStatus {
    ContentStatus::Published
}

#[derive(Debug, Deserialize)]
pub struct UpdateContentRequest {
    pub body: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub visibility: Option<Visibility>,
    pub status: Option<ContentStatus>,
}

/// POST /api/content - Submit new content. Lexically searchable on return;
/// the semantic index catches up through the pipeline.
pub async fn submit_content(
    State(state): State<AppState>,
    Json(req): Json<SubmitContentRequest>,
) -> Result<(StatusCode, Json<ContentItem>), (StatusCode, String)> {
    if req.body.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Body is required".to_string()));
    }

    let now = Utc::now();
    let item = ContentItem {
        id: Uuid::new_v4(),
        author_id: req.author_id,
        body: req.body,
        media: req.media,
        created_at: now,
        updated_at: now,
        version: 0,
        status: req.status,
        thread_id: req.thread_id,
        thread_position: req.thread_position,
        hashtags: Default::default(),
        mentions: Default::default(),
        visibility: req.visibility,
    };

    let stored = state
        .submit_content(item)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// PUT /api/content/{id} - Update existing content.
pub async fn update_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateContentRequest>,
) -> Result<Json<ContentItem>, (StatusCode, String)> {
    if req.body.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Body is required".to_string()));
    }
    let Some(existing) = state.store.get(id) else {
        return Err((StatusCode::NOT_FOUND, "Content not found".to_string()));
    };

    let mut item = existing;
    item.body = req.body;
    item.media = req.media;
    // Hashtags/mentions are re-extracted from the new body by the store.
    item.hashtags.clear();
    item.mentions.clear();
    if let Some(visibility) = req.visibility {
        item.visibility = visibility;
    }
    if let Some(status) = req.status {
        item.status = status;
    }

    let stored = state
        .submit_content(item)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(stored))
}

/// DELETE /api/content/{id} - Soft-delete; indexes are purged through the
/// pipeline tombstone.
pub async fn remove_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    match state
        .remove_content(id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, "Content not found".to_string())),
    }
}

/// GET /api/content/{id}
pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContentItem>, (StatusCode, String)> {
    match state.store.get(id) {
        Some(item) if item.status != ContentStatus::Deleted => Ok(Json(item)),
        _ => Err((StatusCode::NOT_FOUND, "Content not found".to_string())),
    }
}
