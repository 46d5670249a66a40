use axum::{
    body::Body,
    extract::{OriginalUri, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::{AppError, AppResult};
use super::AppState;
use crate::filter::FilterError;
use crate::util::{decode_request_path, validate_feed_url};

const FEED_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const TORRENT_CONTENT_TYPE: &str = "application/x-bittorrent";

/// `GET /<percent-encoded feed URL>`
pub async fn filter_feed(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> AppResult<Response> {
    let raw = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let feed = validate_feed_url(&decode_request_path(raw)?)?;

    tracing::info!(url = %feed.url, domain = %feed.domain, "Filter request");

    let body = state
        .filter
        .filter(&feed.domain, feed.url.as_str())
        .await
        .map_err(|e| match e {
            FilterError::NoPolicy(domain) => AppError::NoSiteConfig(domain),
            FilterError::NoTracker(domain) => AppError::NoTracker(domain),
        })?;

    Ok(([(header::CONTENT_TYPE, FEED_CONTENT_TYPE)], body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    url: Option<String>,
}

/// `GET /proxy?url=<enclosure URL>`
///
/// Downloads a published enclosure with the owning site's cookie and streams
/// it back as an attachment.
pub async fn proxy(
    State(state): State<AppState>,
    Query(params): Query<ProxyParams>,
) -> AppResult<Response> {
    let url = params
        .url
        .filter(|u| !u.is_empty())
        .ok_or(AppError::MissingParameter("url"))?;
    let entry = state.filter.proxy_cache().resolve(&url)?;
    let policy = state.filter.policy(&entry.domain).cloned();

    tracing::info!(url = %entry.target, domain = %entry.domain, "Proxying enclosure");
    let upstream = state
        .fetcher
        .get(&entry.target, policy.as_ref().map(|p| &p.cookie))
        .await?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(TORRENT_CONTENT_TYPE));
    // Keep the tracker's filename when it sends one.
    let disposition = upstream
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .filter(|v| v.as_bytes().starts_with(b"attachment"))
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct Status {
    accepted: usize,
    rejected: usize,
    proxy_entries: usize,
    in_flight_checks: usize,
    max_concurrent_checks: usize,
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    let filter = &state.filter;
    Json(Status {
        accepted: filter.decisions().accepted_len(),
        rejected: filter.decisions().rejected_len(),
        proxy_entries: filter.proxy_cache().len(),
        in_flight_checks: filter.scheduler().in_flight(),
        max_concurrent_checks: filter.scheduler().capacity(),
    })
}
