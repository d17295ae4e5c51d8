pub const PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
"#;

pub const SCHEMA: &str = r#"
-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    filter_keywords TEXT,
    last_fetched_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- articles table; (feed_id, url) is the dedup key
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    description TEXT,
    author TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    read_at TEXT,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    keywords TEXT NOT NULL DEFAULT '',
    pdf_link TEXT,
    summary_claimed_at TEXT,
    UNIQUE(feed_id, url)
);

CREATE INDEX IF NOT EXISTS idx_articles_feed_id ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_articles_is_read ON articles(is_read);
CREATE INDEX IF NOT EXISTS idx_articles_fetched_at ON articles(fetched_at DESC);

-- summaries table
CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL UNIQUE REFERENCES articles(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    overview TEXT NOT NULL DEFAULT '',
    comparison TEXT NOT NULL DEFAULT '',
    technique TEXT NOT NULL DEFAULT '',
    validation TEXT NOT NULL DEFAULT '',
    discussion TEXT NOT NULL DEFAULT '',
    next_papers TEXT NOT NULL DEFAULT '',
    model_version TEXT NOT NULL,
    generated_at TEXT NOT NULL
);

-- deleted_articles table (prevents re-adding deleted articles on refresh)
CREATE TABLE IF NOT EXISTS deleted_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    deleted_at TEXT NOT NULL,
    UNIQUE(feed_id, url)
);

-- email_logs table (append-only)
CREATE TABLE IF NOT EXISTS email_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sent_at TEXT NOT NULL,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL,
    content_excerpt TEXT NOT NULL,
    articles_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error TEXT,
    kind TEXT NOT NULL,
    period TEXT
);

CREATE INDEX IF NOT EXISTS idx_email_logs_period ON email_logs(kind, period, status);
"#;
