//! HTTP surface: the filter endpoint, the enclosure proxy and a status page.

mod error;
mod handlers;

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::feed::HttpFetcher;
use crate::filter::FeedFilter;

pub use error::{AppError, AppResult};

/// How often expired rejections and proxy entries are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct AppState {
    pub filter: Arc<FeedFilter>,
    /// Used by `/proxy` to stream enclosures.
    pub fetcher: HttpFetcher,
}

impl AppState {
    pub fn new(filter: Arc<FeedFilter>, fetcher: HttpFetcher) -> Self {
        Self { filter, fetcher }
    }
}

/// Any other `GET` path is treated as a feed to filter.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/proxy", get(handlers::proxy))
        .route("/status", get(handlers::status))
        .fallback(get(handlers::filter_feed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically evicts expired entries from the decision and proxy caches.
///
/// Lookups evict lazily as well; this only bounds memory for URLs that are
/// never asked about again.
pub fn spawn_sweeper(filter: Arc<FeedFilter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let rejected = filter.decisions().evict_expired();
            let proxied = filter.proxy_cache().evict_expired();
            if rejected + proxied > 0 {
                tracing::debug!(rejected = rejected, proxied = proxied, "Swept expired cache entries");
            }
        }
    })
}
