//! Admin page, manual job triggers and the stats API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, response::Redirect, Json};
use chrono::{Duration, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::jobs::{JobKind, JobRun};
use crate::models::EmailLog;
use crate::scheduler::ScheduleInfo;
use crate::web::error::ApiError;

use super::articles::StatsSummary;
use super::AppState;

const REDACTED: &str = "********";

#[derive(Debug, Serialize)]
pub struct AdminView {
    pub email_logs: Vec<EmailLog>,
    pub schedule: Vec<ScheduleInfo>,
    pub settings: Config,
}

fn redacted(config: &Config) -> Config {
    let mut settings = config.clone();
    if settings.llm.api_key.is_some() {
        settings.llm.api_key = Some(REDACTED.to_string());
    }
    if !settings.email.password.is_empty() {
        settings.email.password = REDACTED.to_string();
    }
    settings
}

/// Stamps the admin schedule view; busy triggers did not run.
fn record_run<T>(state: &AppState, kind: JobKind, run: &JobRun<T>) {
    if let (Some(scheduler), JobRun::Completed(_)) = (&state.scheduler, run) {
        scheduler.record_run(kind, Utc::now());
    }
}

/// GET /admin
pub async fn admin_page(State(state): State<Arc<AppState>>) -> Result<Json<AdminView>, ApiError> {
    let email_logs = state
        .repo
        .recent_email_logs(state.config.web.admin_email_logs_limit)
        .await?;
    let schedule = state
        .scheduler
        .as_ref()
        .map(|s| s.info(Utc::now()))
        .unwrap_or_default();

    Ok(Json(AdminView {
        email_logs,
        schedule,
        settings: redacted(&state.config),
    }))
}

/// POST /admin/fetch-rss
pub async fn fetch_rss(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let run = state.jobs.fetch_all_feeds().await?;
    record_run(&state, JobKind::FetchFeeds, &run);
    if let JobRun::Completed(report) = run {
        tracing::info!("Manual fetch: {} new article(s)", report.new_articles);
    }
    Ok(Redirect::to("/admin"))
}

/// POST /admin/send-summary
pub async fn send_summary(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let run = state.jobs.run_summary_email().await?;
    record_run(&state, JobKind::SummaryEmail, &run);
    if let JobRun::Completed(report) = run {
        tracing::info!(
            "Manual summary: {} summarized, digest {:?}",
            report.summaries.summarized,
            report.digest
        );
    }
    Ok(Redirect::to("/admin"))
}

/// POST /admin/test-email - The outcome is visible in the email log.
pub async fn test_email(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    if let Err(e) = state.jobs.send_test_email().await {
        tracing::warn!("Test email failed: {}", e);
    }
    Ok(Redirect::to("/admin"))
}

/// POST /admin/summarize-all - Summarizes every pending article.
pub async fn summarize_all(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    if let JobRun::Completed(report) = state.jobs.summarize_pending(None).await? {
        tracing::info!("Summarized {} article(s)", report.summarized);
    }
    Ok(Redirect::to("/admin"))
}

/// POST /admin/cleanup-read
pub async fn cleanup_read(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let run = state.jobs.cleanup_read().await?;
    record_run(&state, JobKind::CleanupRead, &run);
    Ok(Redirect::to("/admin"))
}

/// POST /admin/cleanup-unread
pub async fn cleanup_unread(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let run = state.jobs.cleanup_unread().await?;
    record_run(&state, JobKind::CleanupUnread, &run);
    Ok(Redirect::to("/admin"))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub totals: StatsSummary,
    /// Articles fetched per local day over the stats period.
    pub articles_by_day: BTreeMap<String, usize>,
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let totals = StatsSummary::load(&state).await?;

    let since = Utc::now() - Duration::days(state.config.web.stats_days_period as i64);
    let tz = state.jobs.timezone();
    let mut articles_by_day = BTreeMap::new();
    for fetched_at in state.repo.fetched_since(since).await? {
        let day = fetched_at.with_timezone(&tz).format("%Y-%m-%d").to_string();
        *articles_by_day.entry(day).or_insert(0) += 1;
    }

    Ok(Json(StatsResponse {
        totals,
        articles_by_day,
    }))
}
