//! Feed management.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Redirect,
    Form, Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Feed;
use crate::web::error::ApiError;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct FeedsView {
    pub feeds: Vec<Feed>,
}

/// GET /feeds
pub async fn feeds_list(State(state): State<Arc<AppState>>) -> Result<Json<FeedsView>, ApiError> {
    let feeds = state.repo.get_all_feeds().await?;
    Ok(Json(FeedsView { feeds }))
}

#[derive(Debug, Deserialize)]
pub struct AddFeedForm {
    pub url: String,
    pub title: Option<String>,
    pub filter_keywords: Option<String>,
}

/// POST /feeds/add - Registers the feed and stores its first entries.
pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AddFeedForm>,
) -> Result<Redirect, ApiError> {
    let filter = form
        .filter_keywords
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());

    match state
        .jobs
        .add_feed(&form.url, form.title.as_deref(), filter)
        .await
    {
        Ok(_) => Ok(Redirect::to("/feeds")),
        Err(AppError::Conflict(_)) => Err(ApiError::bad_request("Feed already exists")),
        Err(e @ (AppError::Http(_) | AppError::FeedParse(_) | AppError::Other(_) | AppError::Config(_))) => {
            Err(ApiError::bad_request(format!("Could not add feed: {}", e)))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct FilterForm {
    pub filter_keywords: Option<String>,
}

/// POST /feeds/:id/update-filter
pub async fn update_filter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Form(form): Form<FilterForm>,
) -> Result<Redirect, ApiError> {
    if !state.repo.update_feed_filter(id, form.filter_keywords).await? {
        return Err(ApiError::not_found("Feed not found"));
    }
    Ok(Redirect::to("/feeds"))
}

/// POST /feeds/:id/toggle
pub async fn toggle_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    match state.repo.toggle_feed_active(id).await? {
        Some(active) => {
            tracing::info!("Feed {} is now {}", id, if active { "active" } else { "inactive" });
            Ok(Redirect::to("/feeds"))
        }
        None => Err(ApiError::not_found("Feed not found")),
    }
}

/// POST /feeds/:id/delete - Removes the feed with its articles.
pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    if !state.repo.delete_feed(id).await? {
        return Err(ApiError::not_found("Feed not found"));
    }
    tracing::info!("Feed {} deleted", id);
    Ok(Redirect::to("/feeds"))
}
