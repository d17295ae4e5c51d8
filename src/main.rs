use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use rss_summarizer::ai::{Summarizer, SummaryBackend};
use rss_summarizer::config::Config;
use rss_summarizer::db::Repository;
use rss_summarizer::error::Result;
use rss_summarizer::jobs::{JobKind, Jobs};
use rss_summarizer::logging;
use rss_summarizer::mail::{MailTransport, SmtpMailer};
use rss_summarizer::scheduler::Scheduler;
use rss_summarizer::web::{self, AppState};

#[derive(Parser)]
#[command(name = "rss-summarizer", version, about = "RSS paper reader with LLM summaries and a daily digest")]
struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the web server (default)
    Serve,
    /// Fetch all active feeds once
    Fetch,
    /// Summarize pending articles without sending mail
    Summarize {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Summarize and send today's digest
    Digest,
    /// Run both retention passes
    Cleanup,
    /// Import feeds from an OPML file, then fetch them
    ImportOpml { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging)?;
    let config = Arc::new(config);

    let repo = Arc::new(Repository::new(&config.database.path).await?);
    let summarizer: Arc<dyn SummaryBackend> = Arc::new(Summarizer::new(
        &config.llm,
        config.summary.article_description_limit,
    )?);
    let mailer = build_mailer(&config);
    let jobs = Arc::new(Jobs::new(repo.clone(), config.clone(), summarizer, mailer)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(repo, jobs, config).await?,
        Command::Fetch => {
            jobs.run(JobKind::FetchFeeds).await;
        }
        Command::Summarize { limit } => {
            let report = jobs.summarize_pending(limit).await?;
            tracing::info!("Summarize finished: {:?}", report);
        }
        Command::Digest => {
            jobs.run(JobKind::SummaryEmail).await;
        }
        Command::Cleanup => {
            jobs.run(JobKind::CleanupRead).await;
            jobs.run(JobKind::CleanupUnread).await;
        }
        Command::ImportOpml { path } => {
            let report = jobs.import_opml(&path).await?;
            println!(
                "Imported {} feed(s) from {} ({} already registered)",
                report.added,
                path.display(),
                report.skipped
            );
            jobs.run(JobKind::FetchFeeds).await;
        }
    }

    Ok(())
}

fn build_mailer(config: &Config) -> Option<Arc<dyn MailTransport>> {
    let timeout = Duration::from_secs(config.http.request_timeout_secs);
    match SmtpMailer::new(&config.email, timeout) {
        Ok(mailer) => Some(Arc::new(mailer)),
        Err(e) if config.email.enabled => {
            tracing::warn!("SMTP settings are unusable, digests will fail: {}", e);
            None
        }
        Err(e) => {
            tracing::debug!("No SMTP transport: {}", e);
            None
        }
    }
}

async fn serve(repo: Arc<Repository>, jobs: Arc<Jobs>, config: Arc<Config>) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(jobs.clone(), &config.schedule, Utc::now())?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_rx));

    let state = Arc::new(AppState {
        repo,
        jobs,
        scheduler: Some(scheduler),
        config: config.clone(),
    });

    let addr = format!("{}:{}", config.web.host, config.web.port);
    let result = web::serve(state, &addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutting down");
    })
    .await;

    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {}", e);
    }
    result
}
