use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_favorite: bool,
    pub keywords: Vec<String>,
    pub pdf_link: Option<String>,
    pub summary: Option<String>,
}

impl Article {
    pub fn is_summarized(&self) -> bool {
        self.summary.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub keywords: Vec<String>,
}

/// Row created by a fetch, used for follow-up enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedArticle {
    pub id: i64,
    pub url: String,
}

/// Listing filter used by the article pages.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub unread_only: bool,
    pub favorite_only: bool,
    pub feed_id: Option<i64>,
    pub keyword: Option<String>,
    pub offset: usize,
    pub limit: usize,
}
