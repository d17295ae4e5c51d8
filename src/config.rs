use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_email_host")]
    pub host: String,
    #[serde(default = "default_email_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    /// Characters of the email body kept in the email log.
    #[serde(default = "default_log_content_length")]
    pub log_content_length: usize,
}

/// Time-of-day settings are interpreted in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_fetch_interval_hours")]
    pub rss_fetch_interval_hours: u32,
    #[serde(default = "default_summary_email_hour")]
    pub summary_email_hour: u32,
    #[serde(default)]
    pub summary_email_minute: u32,
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_read_articles_hour: u32,
    #[serde(default)]
    pub cleanup_read_articles_minute: u32,
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_unread_articles_hour: u32,
    #[serde(default = "default_cleanup_unread_minute")]
    pub cleanup_unread_articles_minute: u32,
    #[serde(default = "default_true")]
    pub fetch_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_read_days")]
    pub read_articles_days: u32,
    #[serde(default = "default_unread_limit")]
    pub unread_articles_limit: usize,
    #[serde(default = "default_tombstone_days")]
    pub tombstone_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_max_articles")]
    pub max_articles_to_summarize: usize,
    #[serde(default = "default_description_limit")]
    pub article_description_limit: usize,
    #[serde(default = "default_true")]
    pub extract_pdf_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_page_size")]
    pub articles_per_page: usize,
    #[serde(default = "default_page_size")]
    pub home_articles_limit: usize,
    #[serde(default = "default_initial_feed_articles")]
    pub initial_feed_articles: usize,
    #[serde(default = "default_stats_days")]
    pub stats_days_period: u32,
    #[serde(default = "default_admin_logs")]
    pub admin_email_logs_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rss-summarizer");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "o4-mini-2025-04-16".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_email_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_email_port() -> u16 {
    587
}

fn default_log_content_length() -> usize {
    1000
}

fn default_timezone() -> String {
    "Asia/Tokyo".to_string()
}

fn default_check_interval() -> u64 {
    60
}

fn default_fetch_interval_hours() -> u32 {
    6
}

fn default_summary_email_hour() -> u32 {
    5
}

fn default_cleanup_hour() -> u32 {
    3
}

fn default_cleanup_unread_minute() -> u32 {
    10
}

fn default_read_days() -> u32 {
    7
}

fn default_unread_limit() -> usize {
    1000
}

fn default_tombstone_days() -> u32 {
    90
}

fn default_max_articles() -> usize {
    10
}

fn default_description_limit() -> usize {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3045
}

fn default_page_size() -> usize {
    20
}

fn default_initial_feed_articles() -> usize {
    5
}

fn default_stats_days() -> u32 {
    7
}

fn default_admin_logs() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "RSS Summarizer Bot 1.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_email_host(),
            port: default_email_port(),
            user: String::new(),
            password: String::new(),
            from: String::new(),
            to: String::new(),
            log_content_length: default_log_content_length(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            check_interval_secs: default_check_interval(),
            rss_fetch_interval_hours: default_fetch_interval_hours(),
            summary_email_hour: default_summary_email_hour(),
            summary_email_minute: 0,
            cleanup_read_articles_hour: default_cleanup_hour(),
            cleanup_read_articles_minute: 0,
            cleanup_unread_articles_hour: default_cleanup_hour(),
            cleanup_unread_articles_minute: default_cleanup_unread_minute(),
            fetch_on_startup: true,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            read_articles_days: default_read_days(),
            unread_articles_limit: default_unread_limit(),
            tombstone_days: default_tombstone_days(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_articles_to_summarize: default_max_articles(),
            article_description_limit: default_description_limit(),
            extract_pdf_links: true,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            articles_per_page: default_page_size(),
            home_articles_limit: default_page_size(),
            initial_feed_articles: default_initial_feed_articles(),
            stats_days_period: default_stats_days(),
            admin_email_logs_limit: default_admin_logs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the configuration file (defaults when it does not exist), then
    /// apply environment variable overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)?
        } else {
            if path.is_some() {
                return Err(AppError::Config(format!(
                    "config file not found: {}",
                    config_path.display()
                )));
            }
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rss-summarizer")
            .join("config.toml")
    }

    /// Environment variables use the flat names of the deployment `.env`
    /// (`OPENAI_API_KEY`, `EMAIL_HOST`, `SUMMARY_EMAIL_HOUR`, ...).
    pub fn apply_env_overrides(&mut self) {
        override_from_env("DATABASE_PATH", &mut self.database.path);

        if let Some(key) = env_value("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        override_from_env("OPENAI_BASE_URL", &mut self.llm.base_url);
        override_from_env("GPT_MODEL", &mut self.llm.model);
        override_from_env("OPENAI_TEMPERATURE", &mut self.llm.temperature);

        override_from_env("EMAIL_ENABLED", &mut self.email.enabled);
        override_from_env("EMAIL_HOST", &mut self.email.host);
        override_from_env("EMAIL_PORT", &mut self.email.port);
        override_from_env("EMAIL_USER", &mut self.email.user);
        override_from_env("EMAIL_PASSWORD", &mut self.email.password);
        override_from_env("EMAIL_FROM", &mut self.email.from);
        override_from_env("EMAIL_TO", &mut self.email.to);
        override_from_env(
            "EMAIL_LOG_CONTENT_LENGTH",
            &mut self.email.log_content_length,
        );

        let schedule = &mut self.schedule;
        override_from_env("TIMEZONE", &mut schedule.timezone);
        override_from_env("SCHEDULER_CHECK_INTERVAL", &mut schedule.check_interval_secs);
        override_from_env("RSS_FETCH_INTERVAL_HOUR", &mut schedule.rss_fetch_interval_hours);
        override_from_env("SUMMARY_EMAIL_HOUR", &mut schedule.summary_email_hour);
        override_from_env("SUMMARY_EMAIL_MINUTE", &mut schedule.summary_email_minute);
        override_from_env(
            "CLEANUP_READ_ARTICLES_HOUR",
            &mut schedule.cleanup_read_articles_hour,
        );
        override_from_env(
            "CLEANUP_READ_ARTICLES_MINUTE",
            &mut schedule.cleanup_read_articles_minute,
        );
        override_from_env(
            "CLEANUP_UNREAD_ARTICLES_HOUR",
            &mut schedule.cleanup_unread_articles_hour,
        );
        override_from_env(
            "CLEANUP_UNREAD_ARTICLES_MINUTE",
            &mut schedule.cleanup_unread_articles_minute,
        );

        override_from_env(
            "CLEANUP_READ_ARTICLES_DAYS",
            &mut self.retention.read_articles_days,
        );
        override_from_env(
            "CLEANUP_UNREAD_ARTICLES_LIMIT",
            &mut self.retention.unread_articles_limit,
        );

        override_from_env(
            "MAX_ARTICLES_TO_SUMMARIZE",
            &mut self.summary.max_articles_to_summarize,
        );
        override_from_env(
            "ARTICLE_DESCRIPTION_LIMIT",
            &mut self.summary.article_description_limit,
        );

        override_from_env("APP_HOST", &mut self.web.host);
        override_from_env("APP_PORT", &mut self.web.port);
        override_from_env("ARTICLES_PER_PAGE", &mut self.web.articles_per_page);
        override_from_env("HOME_ARTICLES_LIMIT", &mut self.web.home_articles_limit);
        override_from_env("INITIAL_FEED_ARTICLES", &mut self.web.initial_feed_articles);
        override_from_env("STATS_DAYS_PERIOD", &mut self.web.stats_days_period);
        override_from_env("ADMIN_EMAIL_LOGS_LIMIT", &mut self.web.admin_email_logs_limit);

        override_from_env("REQUEST_TIMEOUT", &mut self.http.request_timeout_secs);
        override_from_env("LOG_LEVEL", &mut self.logging.level);
    }

    pub fn validate(&self) -> Result<()> {
        self.timezone()?;

        let schedule = &self.schedule;
        let times = [
            (
                "summary_email",
                schedule.summary_email_hour,
                schedule.summary_email_minute,
            ),
            (
                "cleanup_read_articles",
                schedule.cleanup_read_articles_hour,
                schedule.cleanup_read_articles_minute,
            ),
            (
                "cleanup_unread_articles",
                schedule.cleanup_unread_articles_hour,
                schedule.cleanup_unread_articles_minute,
            ),
        ];
        for (name, hour, minute) in times {
            if hour > 23 || minute > 59 {
                return Err(AppError::Config(format!(
                    "{} time {:02}:{:02} is out of range",
                    name, hour, minute
                )));
            }
        }

        if schedule.check_interval_secs == 0 {
            return Err(AppError::Config(
                "check_interval_secs must be positive".to_string(),
            ));
        }
        if schedule.rss_fetch_interval_hours == 0 {
            return Err(AppError::Config(
                "rss_fetch_interval_hours must be positive".to_string(),
            ));
        }
        if self.web.articles_per_page == 0 {
            return Err(AppError::Config(
                "articles_per_page must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(|_| AppError::Config(format!("unknown timezone: {}", self.schedule.timezone)))
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn override_from_env<T: FromStr>(name: &str, target: &mut T) {
    let Some(raw) = env_value(name) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", name, raw),
    }
}
