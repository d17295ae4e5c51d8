//! Background scheduler.
//!
//! A single loop polls at the configured interval. Daily jobs fire at the
//! first poll at or after their local time, once per local day; the feed
//! fetch runs every `rss_fetch_interval_hours`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::ScheduleConfig;
use crate::error::{AppError, Result};
use crate::jobs::{JobKind, JobRun, Jobs};

#[derive(Debug, Clone)]
struct DailySlot {
    kind: JobKind,
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

#[derive(Debug)]
struct ScheduleState {
    daily: Vec<DailySlot>,
    next_fetch: DateTime<Utc>,
    last_runs: HashMap<JobKind, DateTime<Utc>>,
}

/// Per-job schedule shown on the admin page.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub job: JobKind,
    pub schedule: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
}

pub struct Scheduler {
    jobs: Arc<Jobs>,
    tz: Tz,
    check_interval: Duration,
    fetch_interval: ChronoDuration,
    state: Mutex<ScheduleState>,
}

fn daily_time(hour: u32, minute: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| AppError::Config(format!("invalid time {:02}:{:02}", hour, minute)))
}

impl Scheduler {
    /// Builds the schedule as of `now`. Daily jobs whose time has already
    /// passed today first fire tomorrow.
    pub fn new(jobs: Arc<Jobs>, config: &ScheduleConfig, now: DateTime<Utc>) -> Result<Self> {
        let tz = jobs.timezone();
        let today = now.with_timezone(&tz);

        let mut daily = Vec::new();
        for (kind, hour, minute) in [
            (JobKind::SummaryEmail, config.summary_email_hour, config.summary_email_minute),
            (
                JobKind::CleanupRead,
                config.cleanup_read_articles_hour,
                config.cleanup_read_articles_minute,
            ),
            (
                JobKind::CleanupUnread,
                config.cleanup_unread_articles_hour,
                config.cleanup_unread_articles_minute,
            ),
        ] {
            let at = daily_time(hour, minute)?;
            let last_fired = (today.time() >= at).then(|| today.date_naive());
            daily.push(DailySlot {
                kind,
                at,
                last_fired,
            });
        }

        let fetch_interval = ChronoDuration::hours(config.rss_fetch_interval_hours as i64);
        let next_fetch = if config.fetch_on_startup {
            now
        } else {
            now + fetch_interval
        };

        Ok(Self {
            jobs,
            tz,
            check_interval: Duration::from_secs(config.check_interval_secs),
            fetch_interval,
            state: Mutex::new(ScheduleState {
                daily,
                next_fetch,
                last_runs: HashMap::new(),
            }),
        })
    }

    /// Jobs due at `now`. A job stays due until [`Scheduler::mark_fired`]
    /// records a completed run for it.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobKind> {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();
        let mut due = Vec::new();

        let Ok(state) = self.state.lock() else {
            return due;
        };

        if now >= state.next_fetch {
            due.push(JobKind::FetchFeeds);
        }
        for slot in &state.daily {
            if local.time() >= slot.at && slot.last_fired != Some(today) {
                due.push(slot.kind);
            }
        }

        due
    }

    /// Records a completed run of a job that was due at `at`.
    pub fn mark_fired(&self, kind: JobKind, at: DateTime<Utc>) {
        let today = at.with_timezone(&self.tz).date_naive();
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if kind == JobKind::FetchFeeds {
            state.next_fetch = at + self.fetch_interval;
        }
        for slot in state.daily.iter_mut().filter(|slot| slot.kind == kind) {
            slot.last_fired = Some(today);
        }
        state.last_runs.insert(kind, at);
    }

    /// Last run shown on the admin page, for manual triggers.
    pub fn record_run(&self, kind: JobKind, at: DateTime<Utc>) {
        if let Ok(mut state) = self.state.lock() {
            state.last_runs.insert(kind, at);
        }
    }

    /// Runs a job that was due at `at`. A busy job is left due and retried
    /// on the next poll.
    pub async fn fire(&self, kind: JobKind, at: DateTime<Utc>) -> JobRun<()> {
        let run = self.jobs.run(kind).await;
        match run {
            JobRun::Completed(()) => self.mark_fired(kind, at),
            JobRun::Busy => debug!("Job {} is busy, retrying on the next poll", kind.name()),
        }
        run
    }

    fn next_daily_run(&self, slot: &DailySlot, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();
        let date = if slot.last_fired == Some(today) || local.time() >= slot.at {
            today.succ_opt()?
        } else {
            today
        };
        self.tz
            .from_local_datetime(&date.and_time(slot.at))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn info(&self, now: DateTime<Utc>) -> Vec<ScheduleInfo> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };

        let mut infos = vec![ScheduleInfo {
            job: JobKind::FetchFeeds,
            schedule: format!("every {} hour(s)", self.fetch_interval.num_hours()),
            last_run: state.last_runs.get(&JobKind::FetchFeeds).copied(),
            next_run: Some(state.next_fetch.max(now)),
            running: self.jobs.is_running(JobKind::FetchFeeds),
        }];

        for slot in &state.daily {
            infos.push(ScheduleInfo {
                job: slot.kind,
                schedule: format!("daily {} ({})", slot.at.format("%H:%M"), self.tz.name()),
                last_run: state.last_runs.get(&slot.kind).copied(),
                next_run: self.next_daily_run(slot, now),
                running: self.jobs.is_running(slot.kind),
            });
        }

        infos
    }

    /// Polls until `shutdown` flips to `true` or its sender is dropped. Due
    /// jobs run on their own tasks so a slow fetch does not delay the daily
    /// jobs; running jobs are awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started (check interval: {} seconds, timezone: {})",
            self.check_interval.as_secs(),
            self.tz.name()
        );

        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    while tasks.try_join_next().is_some() {}

                    let now = Utc::now();
                    for kind in self.due_jobs(now) {
                        if self.jobs.is_running(kind) {
                            continue;
                        }
                        debug!("Job {} is due", kind.name());
                        let scheduler = Arc::clone(&self);
                        tasks.spawn(async move {
                            scheduler.fire(kind, now).await;
                        });
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} running job(s)", tasks.len());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Scheduled job task failed: {}", e);
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::ai::{GeneratedSummary, SummaryBackend};
    use crate::config::Config;
    use crate::db::Repository;
    use crate::models::Article;

    struct NoSummaries;

    #[async_trait]
    impl SummaryBackend for NoSummaries {
        async fn summarize(&self, _article: &Article) -> Result<GeneratedSummary> {
            Err(AppError::LlmApi("disabled".to_string()))
        }

        fn model_version(&self) -> &str {
            "none"
        }
    }

    // Asia/Tokyo is UTC+9 with no DST
    fn tokyo(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Tokyo
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn daily_only() -> ScheduleConfig {
        ScheduleConfig {
            fetch_on_startup: false,
            rss_fetch_interval_hours: 24 * 365,
            ..ScheduleConfig::default()
        }
    }

    /// Polls and records a completed run for every due job.
    fn poll(s: &Scheduler, now: DateTime<Utc>) -> Vec<JobKind> {
        let due = s.due_jobs(now);
        for kind in &due {
            s.mark_fired(*kind, now);
        }
        due
    }

    async fn scheduler(config: ScheduleConfig, now: DateTime<Utc>) -> Scheduler {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let jobs = Jobs::new(repo, Arc::new(Config::default()), Arc::new(NoSummaries), None).unwrap();
        Scheduler::new(Arc::new(jobs), &config, now).unwrap()
    }

    #[tokio::test]
    async fn test_daily_jobs_fire_once_per_day() {
        let config = daily_only();
        let s = scheduler(config, tokyo(2026, 1, 10, 4, 0)).await;

        assert!(poll(&s, tokyo(2026, 1, 10, 4, 59)).is_empty());
        assert_eq!(poll(&s, tokyo(2026, 1, 10, 5, 0)), vec![JobKind::SummaryEmail]);
        assert!(poll(&s, tokyo(2026, 1, 10, 5, 1)).is_empty());
        assert!(poll(&s, tokyo(2026, 1, 10, 23, 0)).is_empty());

        assert_eq!(
            poll(&s, tokyo(2026, 1, 11, 3, 0)),
            vec![JobKind::CleanupRead]
        );
        assert_eq!(
            poll(&s, tokyo(2026, 1, 11, 3, 10)),
            vec![JobKind::CleanupUnread]
        );
        assert_eq!(poll(&s, tokyo(2026, 1, 11, 5, 0)), vec![JobKind::SummaryEmail]);
    }

    #[tokio::test]
    async fn test_late_poll_still_fires() {
        let config = daily_only();
        let s = scheduler(config, tokyo(2026, 1, 10, 2, 0)).await;

        // a poll interval longer than the gap between 03:00 and 03:10
        let due = poll(&s, tokyo(2026, 1, 10, 3, 25));
        assert_eq!(due, vec![JobKind::CleanupRead, JobKind::CleanupUnread]);
    }

    #[tokio::test]
    async fn test_start_after_time_waits_for_next_day() {
        let config = daily_only();
        let s = scheduler(config, tokyo(2026, 1, 10, 12, 0)).await;
        assert!(poll(&s, tokyo(2026, 1, 10, 12, 1)).is_empty());

        let info = s.info(tokyo(2026, 1, 10, 12, 1));
        let summary = info.iter().find(|i| i.job == JobKind::SummaryEmail).unwrap();
        assert_eq!(summary.next_run, Some(tokyo(2026, 1, 11, 5, 0)));
        assert!(summary.last_run.is_none());
        assert!(!summary.running);
    }

    #[tokio::test]
    async fn test_fetch_runs_at_startup_then_on_interval() {
        let config = ScheduleConfig {
            rss_fetch_interval_hours: 6,
            ..ScheduleConfig::default()
        };
        let start = tokyo(2026, 1, 10, 12, 0);
        let s = scheduler(config, start).await;

        assert_eq!(poll(&s, start), vec![JobKind::FetchFeeds]);
        assert!(poll(&s, start + ChronoDuration::hours(5)).is_empty());
        assert_eq!(
            poll(&s, start + ChronoDuration::hours(6)),
            vec![JobKind::FetchFeeds]
        );

        let info = s.info(start + ChronoDuration::hours(6));
        assert_eq!(info[0].last_run, Some(start + ChronoDuration::hours(6)));
        assert_eq!(info[0].next_run, Some(start + ChronoDuration::hours(12)));
    }

    #[tokio::test]
    async fn test_due_job_stays_due_until_completed() {
        let s = scheduler(daily_only(), tokyo(2026, 1, 10, 4, 0)).await;
        let at = tokyo(2026, 1, 10, 5, 0);
        assert_eq!(s.due_jobs(at), vec![JobKind::SummaryEmail]);

        {
            // summarize-all holds the summary lock at the scheduled time
            let _held = s.jobs.try_hold(JobKind::SummaryEmail).unwrap();
            assert_eq!(s.fire(JobKind::SummaryEmail, at).await, JobRun::Busy);
        }

        let retry = tokyo(2026, 1, 10, 5, 1);
        assert_eq!(s.due_jobs(retry), vec![JobKind::SummaryEmail]);
        assert_eq!(s.fire(JobKind::SummaryEmail, retry).await, JobRun::Completed(()));

        assert!(s.due_jobs(tokyo(2026, 1, 10, 6, 0)).is_empty());
        assert!(s.due_jobs(tokyo(2026, 1, 10, 23, 59)).is_empty());
        let info = s.info(tokyo(2026, 1, 10, 6, 0));
        let summary = info.iter().find(|i| i.job == JobKind::SummaryEmail).unwrap();
        assert_eq!(summary.last_run, Some(retry));
    }

    #[tokio::test]
    async fn test_busy_fetch_keeps_its_slot() {
        let config = ScheduleConfig {
            rss_fetch_interval_hours: 6,
            ..ScheduleConfig::default()
        };
        let start = tokyo(2026, 1, 10, 12, 0);
        let s = scheduler(config, start).await;

        {
            let _held = s.jobs.try_hold(JobKind::FetchFeeds).unwrap();
            assert_eq!(s.fire(JobKind::FetchFeeds, start).await, JobRun::Busy);
        }
        let later = start + ChronoDuration::minutes(1);
        assert_eq!(s.due_jobs(later), vec![JobKind::FetchFeeds]);

        assert_eq!(s.fire(JobKind::FetchFeeds, later).await, JobRun::Completed(()));
        assert!(s.due_jobs(later + ChronoDuration::hours(5)).is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = ScheduleConfig {
            check_interval_secs: 1,
            ..daily_only()
        };
        let s = Arc::new(scheduler(config, Utc::now()).await);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(
                        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Slow</title></channel></rss>"#,
                    )
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let feed_id = repo
            .insert_feed(crate::models::NewFeed {
                url: format!("{}/feed.xml", server.uri()),
                title: "Slow".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let jobs = Jobs::new(repo.clone(), Arc::new(Config::default()), Arc::new(NoSummaries), None)
            .unwrap();
        let config = ScheduleConfig {
            check_interval_secs: 60,
            ..ScheduleConfig::default()
        };
        let s = Arc::new(Scheduler::new(Arc::new(jobs), &config, Utc::now()).unwrap());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();

        let feed = repo.get_feed(feed_id).await.unwrap().unwrap();
        assert!(feed.last_fetched_at.is_some());
    }
}
