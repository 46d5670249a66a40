use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::feed::FetchError;
use crate::proxy::ProxyError;
use crate::util::FeedUrlError;

/// Errors surfaced to HTTP callers as plain-text responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// The feed's domain has no `[sites."<domain>"]` table.
    #[error("No domain config found")]
    NoSiteConfig(String),

    /// A site is configured but no tracker plugin knows how to read it.
    #[error("No tracker plugin found")]
    NoTracker(String),

    #[error("Invalid URL")]
    InvalidUrl(#[from] FeedUrlError),

    #[error("Missing query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Not found")]
    ProxyMiss(#[from] ProxyError),

    #[error("Upstream fetch failed")]
    Upstream(#[from] FetchError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            // Feed readers show the body of a 200 to the user; keep it that way.
            AppError::NoSiteConfig(domain) => {
                tracing::warn!(domain = %domain, "No site config for feed domain");
                StatusCode::OK
            }
            AppError::NoTracker(domain) => {
                tracing::warn!(domain = %domain, "No tracker plugin for configured site");
                StatusCode::OK
            }
            AppError::InvalidUrl(e) => {
                tracing::info!(error = %e, "Rejected filter request");
                StatusCode::BAD_REQUEST
            }
            AppError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            AppError::ProxyMiss(e) => {
                tracing::warn!(error = %e, "Proxy miss");
                StatusCode::NOT_FOUND
            }
            AppError::Upstream(e) => {
                tracing::error!(error = %e, "Proxied download failed");
                StatusCode::BAD_GATEWAY
            }
        };
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
