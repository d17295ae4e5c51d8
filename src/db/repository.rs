use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    Article, ArticleQuery, EmailKind, EmailLog, EmailStatus, Feed, InsertedArticle, NewArticle,
    NewEmailLog, NewFeed, OchiaiSections, Summary,
};

use super::schema::{PRAGMAS, SCHEMA};
use super::{db_timestamp, parse_datetime};

const ARTICLE_SELECT: &str = r#"SELECT a.id, a.feed_id, f.title, a.guid, a.title, a.url, a.description,
       a.author, a.published_at, a.fetched_at, a.is_read, a.read_at, a.is_favorite,
       a.keywords, a.pdf_link, s.content
FROM articles a
JOIN feeds f ON a.feed_id = f.id
LEFT JOIN summaries s ON s.article_id = a.id"#;

const FEED_SELECT: &str = r#"SELECT id, url, title, description, is_active, filter_keywords,
       last_fetched_at, last_error, created_at, updated_at
FROM feeds"#;

/// Result of a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub unread_remaining: usize,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Registers a feed; a URL that is already registered is a conflict.
    pub async fn insert_feed(&self, feed: NewFeed) -> Result<i64> {
        let url = feed.url.clone();
        let now = db_timestamp(Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    r#"INSERT INTO feeds (url, title, description, filter_keywords, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                       ON CONFLICT(url) DO NOTHING"#,
                    params![
                        feed.url,
                        feed.title,
                        feed.description,
                        normalize_filter(feed.filter_keywords),
                        now
                    ],
                )?;
                Ok((inserted > 0).then(|| conn.last_insert_rowid()))
            })
            .await?;

        id.ok_or_else(|| AppError::Conflict(format!("Feed already exists: {}", url)))
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", FEED_SELECT))?;
                Ok(stmt.query_row(params![id], feed_from_row).optional()?)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let url = url.to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE url = ?1", FEED_SELECT))?;
                Ok(stmt.query_row(params![url], feed_from_row).optional()?)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds(format!("{} ORDER BY created_at DESC, id DESC", FEED_SELECT))
            .await
    }

    pub async fn get_active_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds(format!("{} WHERE is_active = 1 ORDER BY id", FEED_SELECT))
            .await
    }

    async fn query_feeds(&self, sql: String) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn count_active_feeds(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM feeds WHERE is_active = 1")
            .await
    }

    /// Refreshes title/description from the parsed channel, keeping stored
    /// values for missing fields.
    pub async fn update_feed_metadata(
        &self,
        id: i64,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        let now = db_timestamp(Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE feeds SET title = COALESCE(?1, title),
                                        description = COALESCE(?2, description),
                                        updated_at = ?3
                       WHERE id = ?4"#,
                    params![title, description, now, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn record_feed_success(&self, id: i64) -> Result<()> {
        let now = db_timestamp(Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET last_fetched_at = ?1, last_error = NULL WHERE id = ?2",
                    params![now, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn record_feed_error(&self, id: i64, message: &str) -> Result<()> {
        let now = db_timestamp(Utc::now());
        let message = message.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET last_fetched_at = ?1, last_error = ?2 WHERE id = ?3",
                    params![now, message, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Returns `false` when the feed does not exist.
    pub async fn update_feed_filter(&self, id: i64, filter: Option<String>) -> Result<bool> {
        let now = db_timestamp(Utc::now());
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE feeds SET filter_keywords = ?1, updated_at = ?2 WHERE id = ?3",
                    params![normalize_filter(filter), now, id],
                )?)
            })
            .await?;
        Ok(updated > 0)
    }

    /// Flips the active flag and returns the new state.
    pub async fn toggle_feed_active(&self, id: i64) -> Result<Option<bool>> {
        let now = db_timestamp(Utc::now());
        let state = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE feeds SET is_active = NOT is_active, updated_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                let active: bool =
                    conn.query_row("SELECT is_active FROM feeds WHERE id = ?1", params![id], |row| {
                        row.get(0)
                    })?;
                Ok(Some(active))
            })
            .await?;
        Ok(state)
    }

    /// Deletes the feed together with its articles, summaries and tombstones.
    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?))
            .await?;
        Ok(deleted > 0)
    }

    // Article operations

    /// Inserts the entries that are neither stored nor tombstoned for the
    /// feed. The `(feed_id, url)` unique constraint decides what is new.
    pub async fn insert_new_articles(
        &self,
        articles: Vec<NewArticle>,
    ) -> Result<Vec<InsertedArticle>> {
        let now = db_timestamp(Utc::now());
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = Vec::new();
                {
                    let mut tombstoned = tx.prepare(
                        "SELECT 1 FROM deleted_articles WHERE feed_id = ?1 AND url = ?2",
                    )?;
                    let mut insert = tx.prepare(
                        r#"INSERT INTO articles (feed_id, guid, title, url, description, author,
                                                 published_at, fetched_at, keywords)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                           ON CONFLICT(feed_id, url) DO NOTHING"#,
                    )?;

                    for article in articles {
                        if tombstoned.exists(params![article.feed_id, article.url])? {
                            continue;
                        }
                        let changed = insert.execute(params![
                            article.feed_id,
                            article.guid,
                            article.title,
                            article.url,
                            article.description,
                            article.author,
                            article.published_at.map(db_timestamp),
                            now,
                            article.keywords.join(","),
                        ])?;
                        if changed > 0 {
                            inserted.push(InsertedArticle {
                                id: tx.last_insert_rowid(),
                                url: article.url,
                            });
                        }
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn set_pdf_link(&self, id: i64, pdf_link: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET pdf_link = ?1 WHERE id = ?2",
                    params![pdf_link, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE a.id = ?1", ARTICLE_SELECT))?;
                Ok(stmt.query_row(params![id], article_from_row).optional()?)
            })
            .await?;
        Ok(article)
    }

    /// Returns one page of articles matching the query and the total match
    /// count.
    pub async fn list_articles(&self, query: ArticleQuery) -> Result<(Vec<Article>, usize)> {
        let result = self
            .conn
            .call(move |conn| {
                let mut clauses = Vec::new();
                let mut values: Vec<Value> = Vec::new();

                if query.unread_only {
                    clauses.push("a.is_read = 0".to_string());
                }
                if query.favorite_only {
                    clauses.push("a.is_favorite = 1".to_string());
                }
                if let Some(feed_id) = query.feed_id {
                    values.push(Value::Integer(feed_id));
                    clauses.push(format!("a.feed_id = ?{}", values.len()));
                }
                if let Some(keyword) = query.keyword.filter(|k| !k.trim().is_empty()) {
                    values.push(Value::Text(format!("%{}%", keyword.trim())));
                    clauses.push(format!("a.keywords LIKE ?{}", values.len()));
                }

                let where_sql = if clauses.is_empty() {
                    String::new()
                } else {
                    format!(" WHERE {}", clauses.join(" AND "))
                };

                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM articles a{}", where_sql),
                    params_from_iter(values.iter()),
                    |row| row.get(0),
                )?;

                values.push(Value::Integer(query.limit as i64));
                let limit_idx = values.len();
                values.push(Value::Integer(query.offset as i64));
                let offset_idx = values.len();

                let mut stmt = conn.prepare(&format!(
                    "{}{} ORDER BY a.fetched_at DESC, a.id DESC LIMIT ?{} OFFSET ?{}",
                    ARTICLE_SELECT, where_sql, limit_idx, offset_idx
                ))?;
                let articles = stmt
                    .query_map(params_from_iter(values.iter()), article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok((articles, total as usize))
            })
            .await?;
        Ok(result)
    }

    pub async fn recent_articles(&self, limit: usize) -> Result<Vec<Article>> {
        let (articles, _) = self
            .list_articles(ArticleQuery {
                limit,
                ..ArticleQuery::default()
            })
            .await?;
        Ok(articles)
    }

    /// Unread articles that already have a summary, newest first.
    pub async fn unread_summarized_articles(&self) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE a.is_read = 0 AND s.id IS NOT NULL
                     ORDER BY COALESCE(a.published_at, a.fetched_at) DESC, a.id DESC",
                    ARTICLE_SELECT
                ))?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Marks the article read and stamps `read_at`. Returns `false` when the
    /// article does not exist.
    pub async fn mark_article_read(&self, id: i64) -> Result<bool> {
        let now = db_timestamp(Utc::now());
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE articles SET is_read = 1, read_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?)
            })
            .await?;
        Ok(updated > 0)
    }

    pub async fn set_article_favorite(&self, id: i64, favorite: bool) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE articles SET is_favorite = ?1 WHERE id = ?2",
                    params![favorite, id],
                )?)
            })
            .await?;
        Ok(updated > 0)
    }

    /// Deletes articles by id, leaving tombstones so a later fetch does not
    /// bring them back. Returns the number of deleted rows.
    pub async fn delete_articles(&self, ids: Vec<i64>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = db_timestamp(Utc::now());
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                for id in ids {
                    tx.execute(
                        r#"INSERT OR IGNORE INTO deleted_articles (feed_id, url, deleted_at)
                           SELECT feed_id, url, ?1 FROM articles WHERE id = ?2"#,
                        params![now, id],
                    )?;
                    deleted += tx.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn delete_article(&self, id: i64) -> Result<bool> {
        Ok(self.delete_articles(vec![id]).await? > 0)
    }

    /// Distinct classifier keywords across all stored articles, sorted.
    pub async fn distinct_keywords(&self) -> Result<Vec<String>> {
        let rows: Vec<String> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT DISTINCT keywords FROM articles WHERE keywords != ''")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut keywords: Vec<String> = rows.iter().flat_map(|k| split_keywords(k)).collect();
        keywords.sort();
        keywords.dedup();
        Ok(keywords)
    }

    pub async fn count_articles(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM articles").await
    }

    pub async fn count_unread_articles(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM articles WHERE is_read = 0")
            .await
    }

    async fn count(&self, sql: &'static str) -> Result<usize> {
        let count: i64 = self
            .conn
            .call(move |conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .await?;
        Ok(count as usize)
    }

    /// Fetch timestamps of articles stored at or after `since`.
    pub async fn fetched_since(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let since = db_timestamp(since);
        let rows: Vec<String> = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT fetched_at FROM articles WHERE fetched_at >= ?1")?;
                let rows = stmt
                    .query_map(params![since], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows.iter().filter_map(|s| parse_datetime(s)).collect())
    }

    // Summary operations

    /// Claims up to `limit` unread, unsummarized articles (newest first) for
    /// summarization. Claims taken before `stale_before` are treated as
    /// abandoned and may be taken again.
    pub async fn claim_articles_for_summary(
        &self,
        limit: Option<usize>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let now = db_timestamp(now);
        let stale_before = db_timestamp(stale_before);
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let articles = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let articles = {
                    let mut select = tx.prepare(
                        r#"SELECT a.id FROM articles a
                           LEFT JOIN summaries s ON s.article_id = a.id
                           WHERE a.is_read = 0 AND s.id IS NULL
                             AND (a.summary_claimed_at IS NULL OR a.summary_claimed_at < ?1)
                           ORDER BY COALESCE(a.published_at, a.fetched_at) DESC, a.id DESC
                           LIMIT ?2"#,
                    )?;
                    let ids = select
                        .query_map(params![stale_before, limit], |row| row.get::<_, i64>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;

                    let mut claim =
                        tx.prepare("UPDATE articles SET summary_claimed_at = ?1 WHERE id = ?2")?;
                    let mut load = tx.prepare(&format!("{} WHERE a.id = ?1", ARTICLE_SELECT))?;
                    let mut articles = Vec::with_capacity(ids.len());
                    for id in ids {
                        claim.execute(params![now, id])?;
                        articles.push(load.query_row(params![id], article_from_row)?);
                    }
                    articles
                };
                tx.commit()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn release_summary_claim(&self, article_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET summary_claimed_at = NULL WHERE id = ?1",
                    params![article_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Stores the summary and releases the claim. Returns `false` when the
    /// article was deleted in the meantime.
    pub async fn save_summary(
        &self,
        article_id: i64,
        content: String,
        sections: OchiaiSections,
        model: String,
    ) -> Result<bool> {
        let now = db_timestamp(Utc::now());
        let saved = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists = tx
                    .prepare("SELECT 1 FROM articles WHERE id = ?1")?
                    .exists(params![article_id])?;
                if !exists {
                    return Ok(false);
                }
                tx.execute(
                    r#"INSERT INTO summaries (article_id, content, overview, comparison, technique,
                                              validation, discussion, next_papers, model_version,
                                              generated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                       ON CONFLICT(article_id) DO UPDATE SET
                           content = excluded.content,
                           overview = excluded.overview,
                           comparison = excluded.comparison,
                           technique = excluded.technique,
                           validation = excluded.validation,
                           discussion = excluded.discussion,
                           next_papers = excluded.next_papers,
                           model_version = excluded.model_version,
                           generated_at = excluded.generated_at"#,
                    params![
                        article_id,
                        content,
                        sections.overview,
                        sections.comparison,
                        sections.technique,
                        sections.validation,
                        sections.discussion,
                        sections.next_papers,
                        model,
                        now
                    ],
                )?;
                tx.execute(
                    "UPDATE articles SET summary_claimed_at = NULL WHERE id = ?1",
                    params![article_id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(saved)
    }

    pub async fn get_summary(&self, article_id: i64) -> Result<Option<Summary>> {
        let summary = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT article_id, content, overview, comparison, technique, validation,
                              discussion, next_papers, model_version, generated_at
                       FROM summaries WHERE article_id = ?1"#,
                )?;
                Ok(stmt
                    .query_row(params![article_id], summary_from_row)
                    .optional()?)
            })
            .await?;
        Ok(summary)
    }

    // Retention

    /// Deletes read articles whose `read_at` is before `read_before`.
    /// Articles with a live summarization claim are kept.
    pub async fn delete_read_before(
        &self,
        read_before: DateTime<Utc>,
        claim_stale_before: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let now = db_timestamp(Utc::now());
        let read_before = db_timestamp(read_before);
        let stale = db_timestamp(claim_stale_before);

        let report = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let condition = r#"is_read = 1 AND read_at IS NOT NULL AND read_at < ?1
                    AND (summary_claimed_at IS NULL OR summary_claimed_at < ?2)"#;
                tx.execute(
                    &format!(
                        r#"INSERT OR IGNORE INTO deleted_articles (feed_id, url, deleted_at)
                           SELECT feed_id, url, ?3 FROM articles WHERE {}"#,
                        condition
                    ),
                    params![read_before, stale, now],
                )?;
                let deleted = tx.execute(
                    &format!("DELETE FROM articles WHERE {}", condition),
                    params![read_before, stale],
                )?;
                let unread: i64 =
                    tx.query_row("SELECT COUNT(*) FROM articles WHERE is_read = 0", [], |row| {
                        row.get(0)
                    })?;
                tx.commit()?;
                Ok(CleanupReport {
                    deleted,
                    unread_remaining: unread as usize,
                })
            })
            .await?;
        Ok(report)
    }

    /// Evicts the oldest unread articles (by published time, falling back to
    /// fetch time) until at most `limit` remain. Articles with a live
    /// summarization claim are skipped.
    pub async fn trim_unread(
        &self,
        limit: usize,
        claim_stale_before: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let now = db_timestamp(Utc::now());
        let stale = db_timestamp(claim_stale_before);

        let report = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let unread: i64 =
                    tx.query_row("SELECT COUNT(*) FROM articles WHERE is_read = 0", [], |row| {
                        row.get(0)
                    })?;
                let excess = unread - limit as i64;
                if excess <= 0 {
                    return Ok(CleanupReport {
                        deleted: 0,
                        unread_remaining: unread as usize,
                    });
                }

                let victims = r#"SELECT id FROM articles
                    WHERE is_read = 0
                      AND (summary_claimed_at IS NULL OR summary_claimed_at < ?1)
                    ORDER BY COALESCE(published_at, fetched_at) ASC, id ASC
                    LIMIT ?2"#;
                tx.execute(
                    &format!(
                        r#"INSERT OR IGNORE INTO deleted_articles (feed_id, url, deleted_at)
                           SELECT feed_id, url, ?3 FROM articles WHERE id IN ({})"#,
                        victims
                    ),
                    params![stale, excess, now],
                )?;
                let deleted = tx.execute(
                    &format!("DELETE FROM articles WHERE id IN ({})", victims),
                    params![stale, excess],
                )?;
                tx.commit()?;
                Ok(CleanupReport {
                    deleted,
                    unread_remaining: (unread as usize).saturating_sub(deleted),
                })
            })
            .await?;
        Ok(report)
    }

    pub async fn prune_tombstones(&self, before: DateTime<Utc>) -> Result<usize> {
        let before = db_timestamp(before);
        let pruned = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM deleted_articles WHERE deleted_at < ?1",
                    params![before],
                )?)
            })
            .await?;
        Ok(pruned)
    }

    // Email log

    pub async fn insert_email_log(&self, log: NewEmailLog) -> Result<i64> {
        let now = db_timestamp(Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO email_logs (sent_at, recipient, subject, content_excerpt,
                                               articles_count, status, error, kind, period)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                    params![
                        now,
                        log.recipient,
                        log.subject,
                        log.content_excerpt,
                        log.articles_count,
                        log.status.as_str(),
                        log.error,
                        log.kind.as_str(),
                        log.period
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn recent_email_logs(&self, limit: usize) -> Result<Vec<EmailLog>> {
        let logs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, sent_at, recipient, subject, content_excerpt, articles_count,
                              status, error, kind, period
                       FROM email_logs ORDER BY sent_at DESC, id DESC LIMIT ?1"#,
                )?;
                let logs = stmt
                    .query_map(params![limit as i64], email_log_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(logs)
            })
            .await?;
        Ok(logs)
    }

    /// Whether a digest for `period` has already gone out successfully.
    pub async fn digest_sent_for_period(&self, period: &str) -> Result<bool> {
        let period = period.to_string();
        let sent = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .prepare(
                        "SELECT 1 FROM email_logs WHERE kind = 'digest' AND status = 'sent' AND period = ?1",
                    )?
                    .exists(params![period])?)
            })
            .await?;
        Ok(sent)
    }
}

fn normalize_filter(filter: Option<String>) -> Option<String> {
    filter
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
}

fn split_keywords(s: &str) -> Vec<String> {
    s.split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn opt_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| parse_datetime(&s))
}

fn datetime_or_now(value: String) -> DateTime<Utc> {
    parse_datetime(&value).unwrap_or_else(Utc::now)
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        filter_keywords: row.get(5)?,
        last_fetched_at: opt_datetime(row.get(6)?),
        last_error: row.get(7)?,
        created_at: datetime_or_now(row.get(8)?),
        updated_at: datetime_or_now(row.get(9)?),
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    let keywords: String = row.get(13)?;
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        feed_title: row.get(2)?,
        guid: row.get(3)?,
        title: row.get(4)?,
        url: row.get(5)?,
        description: row.get(6)?,
        author: row.get(7)?,
        published_at: opt_datetime(row.get(8)?),
        fetched_at: datetime_or_now(row.get(9)?),
        is_read: row.get(10)?,
        read_at: opt_datetime(row.get(11)?),
        is_favorite: row.get(12)?,
        keywords: split_keywords(&keywords),
        pdf_link: row.get(14)?,
        summary: row.get(15)?,
    })
}

fn summary_from_row(row: &Row) -> rusqlite::Result<Summary> {
    Ok(Summary {
        article_id: row.get(0)?,
        content: row.get(1)?,
        sections: OchiaiSections {
            overview: row.get(2)?,
            comparison: row.get(3)?,
            technique: row.get(4)?,
            validation: row.get(5)?,
            discussion: row.get(6)?,
            next_papers: row.get(7)?,
        },
        model_version: row.get(8)?,
        generated_at: datetime_or_now(row.get(9)?),
    })
}

fn email_log_from_row(row: &Row) -> rusqlite::Result<EmailLog> {
    let status: String = row.get(6)?;
    let kind: String = row.get(8)?;
    Ok(EmailLog {
        id: row.get(0)?,
        sent_at: datetime_or_now(row.get(1)?),
        recipient: row.get(2)?,
        subject: row.get(3)?,
        content_excerpt: row.get(4)?,
        articles_count: row.get(5)?,
        status: EmailStatus::parse(&status),
        error: row.get(7)?,
        kind: EmailKind::parse(&kind),
        period: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn repo_with_feed() -> (Repository, i64) {
        let repo = Repository::open_in_memory().await.unwrap();
        let feed_id = repo
            .insert_feed(NewFeed {
                url: "https://example.com/feed.xml".to_string(),
                title: "Example".to_string(),
                ..NewFeed::default()
            })
            .await
            .unwrap();
        (repo, feed_id)
    }

    fn entry(feed_id: i64, n: u32, published_days_ago: i64) -> NewArticle {
        NewArticle {
            feed_id,
            guid: format!("guid-{}", n),
            title: format!("Article {}", n),
            url: format!("https://example.com/articles/{}", n),
            description: Some(format!("Description {}", n)),
            author: None,
            published_at: Some(Utc::now() - Duration::days(published_days_ago)),
            keywords: vec![],
        }
    }

    async fn backdate_read(repo: &Repository, id: i64, days: i64) {
        let read_at = db_timestamp(Utc::now() - Duration::days(days));
        repo.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET is_read = 1, read_at = ?1 WHERE id = ?2",
                    params![read_at, id],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_feed_is_conflict() {
        let (repo, _) = repo_with_feed().await;
        let err = repo
            .insert_feed(NewFeed {
                url: "https://example.com/feed.xml".to_string(),
                title: "Again".to_string(),
                ..NewFeed::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_insert_skips_existing_urls() {
        let (repo, feed_id) = repo_with_feed().await;

        let first = repo
            .insert_new_articles(vec![entry(feed_id, 1, 1), entry(feed_id, 2, 1)])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let batch = (1..=5).map(|n| entry(feed_id, n, 1)).collect();
        let second = repo.insert_new_articles(batch).await.unwrap();

        assert_eq!(second.len(), 3);
        assert_eq!(repo.count_articles().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_same_url_in_other_feed_is_not_duplicate() {
        let (repo, feed_id) = repo_with_feed().await;
        let other = repo
            .insert_feed(NewFeed {
                url: "https://other.example.com/rss".to_string(),
                title: "Other".to_string(),
                ..NewFeed::default()
            })
            .await
            .unwrap();

        repo.insert_new_articles(vec![entry(feed_id, 1, 0)]).await.unwrap();
        let inserted = repo.insert_new_articles(vec![entry(other, 1, 0)]).await.unwrap();
        assert_eq!(inserted.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_article_is_not_reinserted() {
        let (repo, feed_id) = repo_with_feed().await;
        let inserted = repo.insert_new_articles(vec![entry(feed_id, 1, 0)]).await.unwrap();

        assert!(repo.delete_article(inserted[0].id).await.unwrap());
        let again = repo.insert_new_articles(vec![entry(feed_id, 1, 0)]).await.unwrap();

        assert!(again.is_empty());
        assert_eq!(repo.count_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_read_before_keeps_recent_and_unread() {
        let (repo, feed_id) = repo_with_feed().await;
        let ids: Vec<i64> = repo
            .insert_new_articles((1..=3).map(|n| entry(feed_id, n, 30)).collect())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();

        backdate_read(&repo, ids[0], 10).await;
        backdate_read(&repo, ids[1], 2).await;

        let now = Utc::now();
        let report = repo
            .delete_read_before(now - Duration::days(7), now - Duration::minutes(30))
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert!(repo.get_article(ids[0]).await.unwrap().is_none());
        assert!(repo.get_article(ids[1]).await.unwrap().is_some());
        assert!(repo.get_article(ids[2]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_trim_unread_evicts_oldest_first() {
        let (repo, feed_id) = repo_with_feed().await;
        // article n was published n days ago
        let inserted = repo
            .insert_new_articles((1..=6).map(|n| entry(feed_id, n, n as i64)).collect())
            .await
            .unwrap();

        let report = repo
            .trim_unread(4, Utc::now() - Duration::minutes(30))
            .await
            .unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.unread_remaining, 4);
        assert_eq!(repo.count_unread_articles().await.unwrap(), 4);
        // the two oldest (6 and 5 days) are gone
        assert!(repo.get_article(inserted[5].id).await.unwrap().is_none());
        assert!(repo.get_article(inserted[4].id).await.unwrap().is_none());
        assert!(repo.get_article(inserted[0].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_trim_unread_under_limit_is_noop() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.insert_new_articles(vec![entry(feed_id, 1, 0)]).await.unwrap();

        let report = repo
            .trim_unread(10, Utc::now() - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(report, CleanupReport { deleted: 0, unread_remaining: 1 });
    }

    #[tokio::test]
    async fn test_claimed_article_survives_trim() {
        let (repo, feed_id) = repo_with_feed().await;
        let inserted = repo
            .insert_new_articles((1..=3).map(|n| entry(feed_id, n, n as i64)).collect())
            .await
            .unwrap();

        let now = Utc::now();
        let stale = now - Duration::minutes(30);
        // claim everything, then release all but the oldest
        let claimed = repo.claim_articles_for_summary(None, now, stale).await.unwrap();
        assert_eq!(claimed.len(), 3);
        repo.release_summary_claim(inserted[0].id).await.unwrap();
        repo.release_summary_claim(inserted[1].id).await.unwrap();

        let report = repo.trim_unread(2, stale).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(repo.get_article(inserted[2].id).await.unwrap().is_some());
        assert!(repo.get_article(inserted[1].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_existing_claims() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.insert_new_articles((1..=5).map(|n| entry(feed_id, n, n as i64)).collect())
            .await
            .unwrap();

        let now = Utc::now();
        let stale = now - Duration::minutes(30);
        let first = repo.claim_articles_for_summary(Some(2), now, stale).await.unwrap();
        assert_eq!(first.len(), 2);
        // newest first
        assert_eq!(first[0].title, "Article 1");

        let second = repo.claim_articles_for_summary(None, now, stale).await.unwrap();
        assert_eq!(second.len(), 3);

        // a claim older than the stale cutoff is taken again
        let later = now + Duration::hours(1);
        let retaken = repo
            .claim_articles_for_summary(None, later, later - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(retaken.len(), 5);
    }

    #[tokio::test]
    async fn test_save_summary_marks_article_summarized() {
        let (repo, feed_id) = repo_with_feed().await;
        let inserted = repo.insert_new_articles(vec![entry(feed_id, 1, 0)]).await.unwrap();
        let id = inserted[0].id;

        let sections = OchiaiSections {
            overview: "A new thing".to_string(),
            ..OchiaiSections::default()
        };
        assert!(repo
            .save_summary(id, "full text".to_string(), sections.clone(), "model-x".to_string())
            .await
            .unwrap());

        let article = repo.get_article(id).await.unwrap().unwrap();
        assert!(article.is_summarized());
        let summary = repo.get_summary(id).await.unwrap().unwrap();
        assert_eq!(summary.sections, sections);

        assert_eq!(repo.unread_summarized_articles().await.unwrap().len(), 1);
        repo.mark_article_read(id).await.unwrap();
        assert!(repo.unread_summarized_articles().await.unwrap().is_empty());

        assert!(!repo
            .save_summary(9999, "x".to_string(), OchiaiSections::default(), "m".to_string())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_articles_filters_and_paginates() {
        let (repo, feed_id) = repo_with_feed().await;
        let mut batch: Vec<NewArticle> = (1..=5).map(|n| entry(feed_id, n, 0)).collect();
        batch[0].keywords = vec!["rust".to_string(), "llm".to_string()];
        let inserted = repo.insert_new_articles(batch).await.unwrap();

        repo.mark_article_read(inserted[1].id).await.unwrap();
        repo.set_article_favorite(inserted[2].id, true).await.unwrap();

        let (unread, total) = repo
            .list_articles(ArticleQuery {
                unread_only: true,
                limit: 2,
                ..ArticleQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(unread.len(), 2);

        let (favorites, _) = repo
            .list_articles(ArticleQuery {
                favorite_only: true,
                limit: 10,
                ..ArticleQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(favorites.len(), 1);

        let (tagged, _) = repo
            .list_articles(ArticleQuery {
                keyword: Some("LLM".to_string()),
                feed_id: Some(feed_id),
                limit: 10,
                ..ArticleQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].keywords, vec!["rust", "llm"]);

        assert_eq!(repo.distinct_keywords().await.unwrap(), vec!["llm", "rust"]);
    }

    #[tokio::test]
    async fn test_feed_delete_cascades() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.insert_new_articles(vec![entry(feed_id, 1, 0)]).await.unwrap();

        assert!(repo.delete_feed(feed_id).await.unwrap());
        assert_eq!(repo.count_articles().await.unwrap(), 0);
        assert!(!repo.delete_feed(feed_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_toggle_and_filter_update() {
        let (repo, feed_id) = repo_with_feed().await;

        assert_eq!(repo.toggle_feed_active(feed_id).await.unwrap(), Some(false));
        assert_eq!(repo.count_active_feeds().await.unwrap(), 0);
        assert_eq!(repo.toggle_feed_active(feed_id).await.unwrap(), Some(true));
        assert_eq!(repo.toggle_feed_active(404).await.unwrap(), None);

        assert!(repo
            .update_feed_filter(feed_id, Some("  rust OR go ".to_string()))
            .await
            .unwrap());
        let feed = repo.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.filter_keywords.as_deref(), Some("rust OR go"));

        repo.update_feed_filter(feed_id, Some("   ".to_string())).await.unwrap();
        let feed = repo.get_feed(feed_id).await.unwrap().unwrap();
        assert!(feed.filter_keywords.is_none());
    }

    #[tokio::test]
    async fn test_digest_period_tracking() {
        let repo = Repository::open_in_memory().await.unwrap();
        let log = |status| NewEmailLog {
            recipient: "reader@example.com".to_string(),
            subject: "digest".to_string(),
            content_excerpt: "...".to_string(),
            articles_count: 3,
            status,
            error: None,
            kind: EmailKind::Digest,
            period: Some("2026-10-17".to_string()),
        };

        repo.insert_email_log(log(EmailStatus::Failed)).await.unwrap();
        assert!(!repo.digest_sent_for_period("2026-10-17").await.unwrap());

        repo.insert_email_log(log(EmailStatus::Sent)).await.unwrap();
        assert!(repo.digest_sent_for_period("2026-10-17").await.unwrap());
        assert!(!repo.digest_sent_for_period("2026-10-18").await.unwrap());

        let logs = repo.recent_email_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, EmailStatus::Sent);
    }
}
