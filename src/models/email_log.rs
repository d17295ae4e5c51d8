use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => EmailStatus::Sent,
            _ => EmailStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailKind {
    Digest,
    Test,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::Digest => "digest",
            EmailKind::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "digest" => EmailKind::Digest,
            _ => EmailKind::Test,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: i64,
    pub sent_at: DateTime<Utc>,
    pub recipient: String,
    pub subject: String,
    pub content_excerpt: String,
    pub articles_count: i64,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub kind: EmailKind,
    /// Local calendar date (`YYYY-MM-DD`) a digest belongs to.
    pub period: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEmailLog {
    pub recipient: String,
    pub subject: String,
    pub content_excerpt: String,
    pub articles_count: i64,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub kind: EmailKind,
    pub period: Option<String>,
}
