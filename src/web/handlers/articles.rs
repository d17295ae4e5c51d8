//! Article pages and article actions.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    Form, Json,
};
use serde::{Deserialize, Serialize};

use crate::models::{Article, ArticleQuery, Feed, Summary};
use crate::web::error::ApiError;

use super::{local_redirect, AppState};

#[derive(Debug, Serialize)]
pub struct StatsSummary {
    pub total_articles: usize,
    pub unread_articles: usize,
    pub total_feeds: usize,
}

impl StatsSummary {
    pub(super) async fn load(state: &AppState) -> Result<Self, ApiError> {
        Ok(Self {
            total_articles: state.repo.count_articles().await?,
            unread_articles: state.repo.count_unread_articles().await?,
            total_feeds: state.repo.count_active_feeds().await?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HomeView {
    pub articles: Vec<Article>,
    pub stats: StatsSummary,
}

/// GET / - Recent articles and counters.
pub async fn home(State(state): State<Arc<AppState>>) -> Result<Json<HomeView>, ApiError> {
    let articles = state
        .repo
        .recent_articles(state.config.web.home_articles_limit)
        .await?;
    let stats = StatsSummary::load(&state).await?;
    Ok(Json(HomeView { articles, stats }))
}

#[derive(Debug, Deserialize)]
pub struct ArticlesParams {
    pub page: Option<usize>,
    pub keyword: Option<String>,
    /// Raw value; blank means all feeds.
    pub feed_id: Option<String>,
    /// `true`/`1`/`on`/`yes` or `false`/`0`/`off`/`no`.
    pub unread_only: Option<String>,
    pub favorite_only: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ArticlesView {
    pub articles: Vec<Article>,
    pub feeds: Vec<Feed>,
    pub keywords: Vec<String>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_articles: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub selected_keyword: String,
    pub selected_feed_id: Option<i64>,
    pub unread_only: bool,
    pub favorite_only: bool,
}

/// GET /articles - Filtered, paginated article list.
pub async fn articles_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ArticlesParams>,
) -> Result<Json<ArticlesView>, ApiError> {
    let per_page = state.config.web.articles_per_page;
    let page = params.page.unwrap_or(1).max(1);
    let unread_only = query_flag(params.unread_only.as_deref(), "unread_only", true)?;
    let favorite_only = query_flag(params.favorite_only.as_deref(), "favorite_only", false)?;

    let feed_id = match params.feed_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| ApiError::bad_request("Invalid feed ID"))?,
        ),
    };
    let keyword = params
        .keyword
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    let offset = (page - 1)
        .checked_mul(per_page)
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| ApiError::bad_request("Invalid page"))?;
    let (articles, total) = state
        .repo
        .list_articles(ArticleQuery {
            unread_only,
            favorite_only,
            feed_id,
            keyword: keyword.clone(),
            offset,
            limit: per_page,
        })
        .await?;

    let feeds = state.repo.get_active_feeds().await?;
    let keywords = state.repo.distinct_keywords().await?;

    let (start_index, end_index) = if !articles.is_empty() {
        (
            offset.saturating_add(1),
            offset.saturating_add(articles.len()).min(total),
        )
    } else {
        (0, 0)
    };

    Ok(Json(ArticlesView {
        articles,
        feeds,
        keywords,
        current_page: page,
        total_pages: total.div_ceil(per_page),
        total_articles: total,
        start_index,
        end_index,
        selected_keyword: keyword.unwrap_or_default(),
        selected_feed_id: feed_id,
        unread_only,
        favorite_only,
    }))
}

#[derive(Debug, Serialize)]
pub struct ArticleDetailView {
    pub article: Article,
    pub summary: Option<Summary>,
}

/// GET /article/:id - Article detail. Viewing marks the article read.
pub async fn article_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ArticleDetailView>, ApiError> {
    if !state.repo.mark_article_read(id).await? {
        return Err(ApiError::not_found("Article not found"));
    }

    let article = state
        .repo
        .get_article(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Article not found"))?;
    let summary = state.repo.get_summary(id).await?;

    Ok(Json(ArticleDetailView { article, summary }))
}

/// POST /article/:id/delete
pub async fn delete_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    if !state.repo.delete_article(id).await? {
        return Err(ApiError::not_found("Article not found"));
    }
    tracing::info!("Article {} deleted", id);
    Ok(Redirect::to("/articles"))
}

#[derive(Debug, Deserialize)]
pub struct FavoriteForm {
    pub favorite: String,
    pub redirect_url: Option<String>,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn parse_flag(value: &str) -> bool {
    parse_bool(value).unwrap_or(false)
}

/// A blank value means the default.
fn query_flag(value: Option<&str>, name: &str, default: bool) -> Result<bool, ApiError> {
    match value.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => {
            parse_bool(raw).ok_or_else(|| ApiError::bad_request(format!("Invalid {}", name)))
        }
    }
}

/// POST /article/:id/favorite
pub async fn set_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Form(form): Form<FavoriteForm>,
) -> Result<Redirect, ApiError> {
    if !state
        .repo
        .set_article_favorite(id, parse_flag(&form.favorite))
        .await?
    {
        return Err(ApiError::not_found("Article not found"));
    }
    Ok(Redirect::to(&local_redirect(
        form.redirect_url.as_deref(),
        "/articles",
    )))
}

/// Body of a bulk delete: a list of ids, or a single id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ArticleIds {
    Many(Vec<i64>),
    One(i64),
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

/// POST /articles/delete-multiple
pub async fn delete_multiple(
    State(state): State<Arc<AppState>>,
    Json(ids): Json<ArticleIds>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let ids = match ids {
        ArticleIds::Many(ids) => ids,
        ArticleIds::One(id) => vec![id],
    };
    let deleted = state.repo.delete_articles(ids).await?;
    tracing::info!("Deleted {} article(s)", deleted);
    Ok(Json(DeletedResponse { deleted }))
}
