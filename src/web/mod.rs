//! HTTP layer: feed management, article browsing, admin triggers and stats.

pub mod error;
pub mod handlers;
pub mod router;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::Result;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;

/// Serves the API until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
