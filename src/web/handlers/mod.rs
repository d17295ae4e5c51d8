//! Request handlers. Page endpoints return JSON view models; form posts
//! redirect with `303 See Other`.

mod admin;
mod articles;
mod feeds;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Repository;
use crate::jobs::Jobs;
use crate::scheduler::Scheduler;

pub use admin::{
    admin_page, cleanup_read, cleanup_unread, fetch_rss, send_summary, stats, summarize_all,
    test_email,
};
pub use articles::{
    article_detail, articles_list, delete_article, delete_multiple, home, set_favorite,
};
pub use feeds::{add_feed, delete_feed, feeds_list, toggle_feed, update_filter};

/// Shared application state.
pub struct AppState {
    pub repo: Arc<Repository>,
    pub jobs: Arc<Jobs>,
    /// Absent when the web layer runs without the background scheduler.
    pub scheduler: Option<Arc<Scheduler>>,
    pub config: Arc<Config>,
}

/// Only same-site paths are accepted as redirect targets.
fn local_redirect(target: Option<&str>, fallback: &str) -> String {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") && !t.starts_with("/\\") => {
            t.to_string()
        }
        _ => fallback.to_string(),
    }
}
