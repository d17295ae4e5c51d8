//! The units of background work: feed fetching, summarization with the daily
//! digest, and the two retention passes. Each job holds its own lock so a
//! trigger that arrives while the same job is running is skipped.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::ai::SummaryBackend;
use crate::config::Config;
use crate::db::{CleanupReport, Repository};
use crate::error::{AppError, Result};
use crate::feed::{parse_opml_file, FeedFetcher, ParsedFeed};
use crate::mail::digest::{self, TEST_SUBJECT};
use crate::mail::{compose_digest, MailTransport, OutgoingEmail};
use crate::models::{EmailKind, EmailStatus, Feed, InsertedArticle, NewEmailLog, NewFeed};

/// Summarization claims older than this are considered abandoned.
pub const CLAIM_TIMEOUT_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FetchFeeds,
    SummaryEmail,
    CleanupRead,
    CleanupUnread,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::FetchFeeds => "fetch_feeds",
            JobKind::SummaryEmail => "summary_email",
            JobKind::CleanupRead => "cleanup_read",
            JobKind::CleanupUnread => "cleanup_unread",
        }
    }
}

/// Result of triggering a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun<T> {
    Completed(T),
    /// The same job was already running; nothing was done.
    Busy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub feeds: usize,
    pub failed: usize,
    pub new_articles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummarizeReport {
    pub summarized: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DigestOutcome {
    Sent { articles: usize },
    Failed { error: String },
    AlreadySent { period: String },
    Disabled,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEmailReport {
    pub summaries: SummarizeReport,
    pub digest: DigestOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct JobLocks {
    fetch: Mutex<()>,
    summary: Mutex<()>,
    cleanup_read: Mutex<()>,
    cleanup_unread: Mutex<()>,
}

impl JobLocks {
    fn get(&self, kind: JobKind) -> &Mutex<()> {
        match kind {
            JobKind::FetchFeeds => &self.fetch,
            JobKind::SummaryEmail => &self.summary,
            JobKind::CleanupRead => &self.cleanup_read,
            JobKind::CleanupUnread => &self.cleanup_unread,
        }
    }
}

pub struct Jobs {
    repo: Arc<Repository>,
    fetcher: FeedFetcher,
    summarizer: Arc<dyn SummaryBackend>,
    mailer: Option<Arc<dyn MailTransport>>,
    config: Arc<Config>,
    tz: Tz,
    locks: JobLocks,
}

impl Jobs {
    pub fn new(
        repo: Arc<Repository>,
        config: Arc<Config>,
        summarizer: Arc<dyn SummaryBackend>,
        mailer: Option<Arc<dyn MailTransport>>,
    ) -> Result<Self> {
        let fetcher = FeedFetcher::new(&config.http)?;
        let tz = config.timezone()?;

        Ok(Self {
            repo,
            fetcher,
            summarizer,
            mailer,
            config,
            tz,
            locks: JobLocks::default(),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.locks.get(kind).try_lock().is_err()
    }

    // Fetching

    /// Fetches every active feed and stores the new, accepted entries.
    pub async fn fetch_all_feeds(&self) -> Result<JobRun<FetchReport>> {
        let Ok(_guard) = self.locks.fetch.try_lock() else {
            info!("Feed fetch already running, skipping");
            return Ok(JobRun::Busy);
        };

        let feeds = self.repo.get_active_feeds().await?;
        let mut report = FetchReport {
            feeds: feeds.len(),
            ..FetchReport::default()
        };

        for (feed, result) in self.fetcher.fetch_all(feeds).await {
            let outcome = match result {
                Ok(parsed) => self.ingest(&feed, parsed, None).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(inserted) => report.new_articles += inserted.len(),
                Err(e) => {
                    warn!("Failed to update feed {} ({}): {}", feed.id, feed.url, e);
                    report.failed += 1;
                    if let Err(err) = self.repo.record_feed_error(feed.id, &e.to_string()).await {
                        error!("Failed to record error for feed {}: {}", feed.id, err);
                    }
                }
            }
        }

        info!(
            "Feed fetch completed: {} feed(s), {} failed, {} new article(s)",
            report.feeds, report.failed, report.new_articles
        );
        Ok(JobRun::Completed(report))
    }

    async fn ingest(
        &self,
        feed: &Feed,
        parsed: ParsedFeed,
        limit: Option<usize>,
    ) -> Result<Vec<InsertedArticle>> {
        self.repo
            .update_feed_metadata(feed.id, parsed.title.clone(), parsed.description.clone())
            .await?;

        let mut articles = parsed.classified_articles(feed);
        if let Some(limit) = limit {
            articles.truncate(limit);
        }

        let inserted = self.repo.insert_new_articles(articles).await?;
        self.repo.record_feed_success(feed.id).await?;

        if inserted.is_empty() {
            debug!("Feed {} has no new articles", feed.id);
        } else {
            info!("Feed {}: {} new article(s)", feed.title, inserted.len());
        }

        if self.config.summary.extract_pdf_links {
            for article in &inserted {
                self.attach_pdf_link(article).await;
            }
        }

        Ok(inserted)
    }

    async fn attach_pdf_link(&self, article: &InsertedArticle) {
        if !article.url.starts_with("http") {
            return;
        }
        match self.fetcher.find_pdf_link(&article.url).await {
            Ok(Some(link)) => {
                debug!("PDF link for article {}: {}", article.id, link);
                if let Err(e) = self.repo.set_pdf_link(article.id, link).await {
                    warn!("Failed to store PDF link for article {}: {}", article.id, e);
                }
            }
            Ok(None) => debug!("No PDF link on {}", article.url),
            Err(e) => warn!("Failed to extract PDF link from {}: {}", article.url, e),
        }
    }

    /// Registers a feed and immediately stores its first few entries. A blank
    /// title is discovered from the feed; HTML pages are searched for their
    /// feed link.
    pub async fn add_feed(
        &self,
        url: &str,
        title: Option<&str>,
        filter_keywords: Option<String>,
    ) -> Result<Feed> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::Config("Feed URL is required".to_string()));
        }
        if self.repo.get_feed_by_url(url).await?.is_some() {
            return Err(AppError::Conflict(format!("Feed already exists: {}", url)));
        }

        let new_feed = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => NewFeed {
                url: url.to_string(),
                title: title.to_string(),
                description: None,
                filter_keywords,
            },
            None => {
                let discovered = self.fetcher.discover_feed(url).await?;
                NewFeed {
                    filter_keywords,
                    ..discovered
                }
            }
        };

        let id = self.repo.insert_feed(new_feed).await?;
        let feed = self
            .repo
            .get_feed(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {}", id)))?;
        info!("Added feed {} ({})", feed.title, feed.url);

        let limit = Some(self.config.web.initial_feed_articles);
        let initial = match self.fetcher.fetch_feed(&feed.url).await {
            Ok(parsed) => self.ingest(&feed, parsed, limit).await,
            Err(e) => Err(e),
        };
        if let Err(e) = initial {
            warn!("Initial fetch of {} failed: {}", feed.url, e);
            self.repo.record_feed_error(feed.id, &e.to_string()).await?;
        }

        Ok(self.repo.get_feed(id).await?.unwrap_or(feed))
    }

    /// Registers every feed of an OPML file; already registered URLs are
    /// skipped.
    pub async fn import_opml(&self, path: &Path) -> Result<ImportReport> {
        let feeds = parse_opml_file(path)?;
        let mut report = ImportReport::default();

        for feed in feeds {
            match self.repo.insert_feed(feed).await {
                Ok(_) => report.added += 1,
                Err(AppError::Conflict(msg)) => {
                    debug!("{}", msg);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to insert feed: {}", e);
                    report.skipped += 1;
                }
            }
        }

        info!(
            "OPML import: {} added, {} skipped",
            report.added, report.skipped
        );
        Ok(report)
    }

    // Summaries and digest

    /// Summarizes pending articles, at most `limit` of them (all when `None`).
    pub async fn summarize_pending(&self, limit: Option<usize>) -> Result<JobRun<SummarizeReport>> {
        let Ok(_guard) = self.locks.summary.try_lock() else {
            info!("Summarization already running, skipping");
            return Ok(JobRun::Busy);
        };
        Ok(JobRun::Completed(self.summarize(limit).await?))
    }

    async fn summarize(&self, limit: Option<usize>) -> Result<SummarizeReport> {
        let now = Utc::now();
        let stale_before = now - ChronoDuration::minutes(CLAIM_TIMEOUT_MINUTES);
        let articles = self
            .repo
            .claim_articles_for_summary(limit, now, stale_before)
            .await?;

        let mut report = SummarizeReport::default();
        if articles.is_empty() {
            debug!("No articles to summarize");
            return Ok(report);
        }
        info!("Summarizing {} article(s)", articles.len());

        for article in articles {
            match self.summarizer.summarize(&article).await {
                Ok(summary) => {
                    let saved = self
                        .repo
                        .save_summary(
                            article.id,
                            summary.content,
                            summary.sections,
                            self.summarizer.model_version().to_string(),
                        )
                        .await?;
                    if saved {
                        info!("Summarized article {}: {}", article.id, article.title);
                        report.summarized += 1;
                    } else {
                        debug!("Article {} was deleted before its summary was saved", article.id);
                    }
                }
                Err(e) => {
                    warn!("Failed to summarize article {}: {}", article.id, e);
                    report.failed += 1;
                    self.repo.release_summary_claim(article.id).await?;
                }
            }
        }

        Ok(report)
    }

    /// The scheduled summary job: summarize up to the configured number of
    /// articles, then send the digest for today.
    pub async fn run_summary_email(&self) -> Result<JobRun<SummaryEmailReport>> {
        let Ok(_guard) = self.locks.summary.try_lock() else {
            info!("Summary email job already running, skipping");
            return Ok(JobRun::Busy);
        };

        let summaries = self
            .summarize(Some(self.config.summary.max_articles_to_summarize))
            .await?;
        let digest = self.deliver_digest(Utc::now()).await?;

        Ok(JobRun::Completed(SummaryEmailReport { summaries, digest }))
    }

    /// Local calendar date a digest sent at `now` belongs to.
    pub fn digest_period(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.tz).date_naive().format("%Y-%m-%d").to_string()
    }

    async fn deliver_digest(&self, now: DateTime<Utc>) -> Result<DigestOutcome> {
        if !self.config.email.enabled {
            info!("Email sending is disabled");
            return Ok(DigestOutcome::Disabled);
        }

        let period = self.digest_period(now);
        if self.repo.digest_sent_for_period(&period).await? {
            info!("Digest for {} already sent, skipping", period);
            return Ok(DigestOutcome::AlreadySent { period });
        }

        let articles = self.repo.unread_summarized_articles().await?;
        let Some(digest) = compose_digest(&articles, now.with_timezone(&self.tz).date_naive()) else {
            info!("No summarized unread articles, digest not sent");
            return Ok(DigestOutcome::Empty);
        };

        let email = OutgoingEmail {
            to: self.config.email.to.clone(),
            subject: digest.subject.clone(),
            markdown: digest.markdown.clone(),
        };
        let result = self.send(&email).await;

        let (status, error) = match &result {
            Ok(()) => (EmailStatus::Sent, None),
            Err(e) => (EmailStatus::Failed, Some(e.to_string())),
        };
        self.log_email(&email, digest.articles_count, status, error, EmailKind::Digest, Some(period))
            .await?;

        match result {
            Ok(()) => {
                info!("Digest with {} article(s) sent to {}", digest.articles_count, email.to);
                Ok(DigestOutcome::Sent {
                    articles: digest.articles_count,
                })
            }
            Err(e) => {
                error!("Failed to send digest: {}", e);
                Ok(DigestOutcome::Failed { error: e.to_string() })
            }
        }
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        match &self.mailer {
            Some(mailer) => mailer.send(email).await,
            None => Err(AppError::Email("SMTP transport is not configured".to_string())),
        }
    }

    async fn log_email(
        &self,
        email: &OutgoingEmail,
        articles_count: usize,
        status: EmailStatus,
        error: Option<String>,
        kind: EmailKind,
        period: Option<String>,
    ) -> Result<()> {
        self.repo
            .insert_email_log(NewEmailLog {
                recipient: email.to.clone(),
                subject: email.subject.clone(),
                content_excerpt: digest::excerpt(&email.markdown, self.config.email.log_content_length),
                articles_count: articles_count as i64,
                status,
                error,
                kind,
                period,
            })
            .await?;
        Ok(())
    }

    /// Checks SMTP connectivity, then sends a test message to the sender
    /// address. Every attempt is logged.
    pub async fn send_test_email(&self) -> Result<()> {
        let sender = if self.config.email.from.is_empty() {
            self.config.email.user.clone()
        } else {
            self.config.email.from.clone()
        };
        let email = OutgoingEmail {
            to: sender,
            subject: TEST_SUBJECT.to_string(),
            markdown: digest::test_email_markdown(),
        };

        let result = match &self.mailer {
            Some(mailer) => match mailer.test_connection().await {
                Ok(()) => mailer.send(&email).await,
                Err(e) => Err(e),
            },
            None => Err(AppError::Email("SMTP transport is not configured".to_string())),
        };

        let (status, error) = match &result {
            Ok(()) => (EmailStatus::Sent, None),
            Err(e) => (EmailStatus::Failed, Some(e.to_string())),
        };
        self.log_email(&email, 0, status, error, EmailKind::Test, None)
            .await?;

        match &result {
            Ok(()) => info!("Test email sent to {}", email.to),
            Err(e) => error!("Test email failed: {}", e),
        }
        result
    }

    // Retention

    /// Deletes read articles older than the retention window and prunes
    /// expired tombstones.
    pub async fn cleanup_read(&self) -> Result<JobRun<CleanupReport>> {
        let Ok(_guard) = self.locks.cleanup_read.try_lock() else {
            info!("Read cleanup already running, skipping");
            return Ok(JobRun::Busy);
        };

        let now = Utc::now();
        let days = self.config.retention.read_articles_days;
        let report = self
            .repo
            .delete_read_before(
                now - ChronoDuration::days(days as i64),
                now - ChronoDuration::minutes(CLAIM_TIMEOUT_MINUTES),
            )
            .await?;
        info!(
            "Deleted {} read article(s) older than {} days",
            report.deleted, days
        );

        let pruned = self
            .repo
            .prune_tombstones(now - ChronoDuration::days(self.config.retention.tombstone_days as i64))
            .await?;
        if pruned > 0 {
            debug!("Pruned {} tombstone(s)", pruned);
        }

        Ok(JobRun::Completed(report))
    }

    /// Evicts the oldest unread articles beyond the configured cap.
    pub async fn cleanup_unread(&self) -> Result<JobRun<CleanupReport>> {
        let Ok(_guard) = self.locks.cleanup_unread.try_lock() else {
            info!("Unread cleanup already running, skipping");
            return Ok(JobRun::Busy);
        };

        let limit = self.config.retention.unread_articles_limit;
        let report = self
            .repo
            .trim_unread(
                limit,
                Utc::now() - ChronoDuration::minutes(CLAIM_TIMEOUT_MINUTES),
            )
            .await?;
        info!(
            "Deleted {} unread article(s) beyond the limit of {} ({} remaining)",
            report.deleted, limit, report.unread_remaining
        );

        Ok(JobRun::Completed(report))
    }

    /// Runs one job, logging instead of returning failures. A failed run
    /// still counts as completed; only a busy job reports `Busy`.
    pub async fn run(&self, kind: JobKind) -> JobRun<()> {
        let result = match kind {
            JobKind::FetchFeeds => self.fetch_all_feeds().await.map(|r| matches!(r, JobRun::Busy)),
            JobKind::SummaryEmail => self.run_summary_email().await.map(|r| matches!(r, JobRun::Busy)),
            JobKind::CleanupRead => self.cleanup_read().await.map(|r| matches!(r, JobRun::Busy)),
            JobKind::CleanupUnread => self.cleanup_unread().await.map(|r| matches!(r, JobRun::Busy)),
        };
        match result {
            Ok(true) => {
                debug!("Job {} skipped", kind.name());
                return JobRun::Busy;
            }
            Ok(false) => debug!("Job {} finished", kind.name()),
            Err(e) => error!("Job {} failed: {}", kind.name(), e),
        }
        JobRun::Completed(())
    }

    /// Takes a job's lock as a concurrent run would.
    #[cfg(test)]
    pub(crate) fn try_hold(&self, kind: JobKind) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.locks.get(kind).try_lock().ok()
    }
}
