//! Router configuration.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_feed, admin_page, article_detail, articles_list, cleanup_read, cleanup_unread,
    delete_article, delete_feed, delete_multiple, feeds_list, fetch_rss, home, send_summary,
    set_favorite, stats, summarize_all, test_email, toggle_feed, update_filter, AppState,
};

pub fn create_router(state: Arc<AppState>) -> Router {
    let article_routes = Router::new()
        .route("/", get(home))
        .route("/articles", get(articles_list))
        .route("/articles/delete-multiple", post(delete_multiple))
        .route("/article/:id", get(article_detail))
        .route("/article/:id/delete", post(delete_article))
        .route("/article/:id/favorite", post(set_favorite));

    let feed_routes = Router::new()
        .route("/feeds", get(feeds_list))
        .route("/feeds/add", post(add_feed))
        .route("/feeds/:id/update-filter", post(update_filter))
        .route("/feeds/:id/toggle", post(toggle_feed))
        .route("/feeds/:id/delete", post(delete_feed));

    let admin_routes = Router::new()
        .route("/admin", get(admin_page))
        .route("/admin/fetch-rss", post(fetch_rss))
        .route("/admin/send-summary", post(send_summary))
        .route("/admin/test-email", post(test_email))
        .route("/admin/summarize-all", post(summarize_all))
        .route("/admin/cleanup-read", post(cleanup_read))
        .route("/admin/cleanup-unread", post(cleanup_unread))
        .route("/api/stats", get(stats));

    Router::new()
        .merge(article_routes)
        .merge(feed_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
